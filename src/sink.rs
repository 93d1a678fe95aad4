//! Submission Persistence Contract (spec §4.7): an abstract `SubmissionSink`
//! the orchestrator depends on, plus one concrete `SqliteSubmissionSink`
//! adapter. The `submissions` table here is the entire persisted schema
//! this crate owns — the problem/user/contest schema is out of scope
//! (spec §1) and lives outside this crate.

use sqlx::sqlite::{SqlitePoolOptions, SqlitePool};
use sqlx::Row;

use crate::model::{create_timestamp, Language, Verdict};

/// Fields the orchestrator hands to a sink after judging a `submit`-mode
/// request. Durability, uniqueness, and transactionality are the sink's
/// concern (spec §4.7).
pub struct SubmissionRecord {
    pub problem_id: u32,
    pub submitter_id: u32,
    pub language: Language,
    pub status: Verdict,
    pub score: u32,
    pub runtime_ms: u64,
    /// Serialized `Vec<CaseResult>` diagnostics.
    pub cases_json: String,
}

/// The orchestrator's only persistence dependency. `record` returns the
/// assigned submission id.
pub trait SubmissionSink: Send + Sync {
    fn record(&self, submission: SubmissionRecord) -> anyhow::Result<u32>;
}

/// A `SubmissionSink` backed by a single-writer SQLite pool, mirroring the
/// lineage's `database.rs::init_db` pragma sequence (WAL, busy_timeout,
/// single connection) but trimmed to the one table this crate's scope needs.
pub struct SqliteSubmissionSink {
    pool: SqlitePool,
    runtime: tokio::runtime::Handle,
}

impl SqliteSubmissionSink {
    pub async fn connect(database_path: &std::path::Path) -> anyhow::Result<Self> {
        if let Some(parent) = database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let url = format!("sqlite://{}?mode=rwc", database_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(0)
            .connect(&url)
            .await?;

        sqlx::query("PRAGMA foreign_keys = ON;").execute(&pool).await?;
        sqlx::query("PRAGMA busy_timeout = 2000;").execute(&pool).await?;
        sqlx::query("PRAGMA journal_mode = WAL;").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous = NORMAL;").execute(&pool).await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS submissions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                problem_id INTEGER NOT NULL,
                submitter_id INTEGER NOT NULL,
                language TEXT NOT NULL,
                status TEXT NOT NULL,
                score INTEGER NOT NULL,
                runtime_ms INTEGER NOT NULL,
                cases_json TEXT NOT NULL,
                created_time TEXT NOT NULL
            );",
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            runtime: tokio::runtime::Handle::current(),
        })
    }

    async fn record_async(&self, submission: SubmissionRecord) -> anyhow::Result<u32> {
        let language = match submission.language {
            Language::Cpp17 => "cpp17",
            Language::Python3 => "python3",
        };
        let row = sqlx::query(
            "INSERT INTO submissions
                (problem_id, submitter_id, language, status, score, runtime_ms, cases_json, created_time)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(submission.problem_id)
        .bind(submission.submitter_id)
        .bind(language)
        .bind(submission.status.to_string())
        .bind(submission.score)
        .bind(submission.runtime_ms as i64)
        .bind(submission.cases_json)
        .bind(create_timestamp())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<i64, _>("id")? as u32)
    }
}

impl SubmissionSink for SqliteSubmissionSink {
    fn record(&self, submission: SubmissionRecord) -> anyhow::Result<u32> {
        // `judge::run` executes on a `spawn_blocking` worker thread (see
        // worker.rs), so blocking on the async pool here is safe — it never
        // blocks the main runtime's reactor.
        self.runtime.block_on(self.record_async(submission))
    }
}

/// In-memory fake used by orchestrator tests; records everything it sees.
#[cfg(any(test, feature = "test-util"))]
pub struct InMemorySink {
    pub records: parking_lot::Mutex<Vec<(u32, String)>>,
    next_id: std::sync::atomic::AtomicU32,
}

#[cfg(any(test, feature = "test-util"))]
impl Default for InMemorySink {
    fn default() -> Self {
        Self {
            records: parking_lot::Mutex::new(Vec::new()),
            next_id: std::sync::atomic::AtomicU32::new(1),
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
impl SubmissionSink for InMemorySink {
    fn record(&self, submission: SubmissionRecord) -> anyhow::Result<u32> {
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.records.lock().push((id, submission.cases_json));
        Ok(id)
    }
}
