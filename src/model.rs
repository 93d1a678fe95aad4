//! Domain types shared across storage, the runner, and the orchestrator.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Difficulty tag on a `Problem`. Consumed, never computed, by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

/// A problem as seen by the judging core: consumed, not owned. The owning
/// schema (admin CRUD, user-facing metadata) lives outside this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub id: u32,
    pub slug: String,
    pub difficulty: Difficulty,
    pub tags: Vec<String>,
    pub is_spj: bool,
    pub checker_source: Option<String>,
    pub cases: Vec<TestCase>,
}

impl Problem {
    /// Cases ordered by `case_no` ascending, ties broken by case id.
    pub fn ordered_cases(&self) -> Vec<&TestCase> {
        let mut cases: Vec<&TestCase> = self.cases.iter().collect();
        cases.sort_by_key(|c| (c.case_no, c.id));
        cases
    }

    pub fn sample_cases(&self) -> Vec<&TestCase> {
        self.ordered_cases()
            .into_iter()
            .filter(|c| c.is_sample)
            .collect()
    }
}

/// One `(input, expected_output)` pair identified by `case_no` within a problem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub id: u32,
    pub problem_id: u32,
    pub case_no: u32,
    /// Relative to the storage root.
    pub in_path: String,
    pub out_path: String,
    pub in_size_bytes: Option<u64>,
    pub out_size_bytes: Option<u64>,
    pub in_sha256: Option<String>,
    pub out_sha256: Option<String>,
    pub is_sample: bool,
    pub score_weight: u32,
}

impl TestCase {
    pub const DEFAULT_SCORE_WEIGHT: u32 = 1;
}

/// The two languages wired into the judge. The runner itself is
/// language-agnostic behind `crate::language::Adapter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Cpp17,
    Python3,
}

impl Language {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "cpp17" => Some(Self::Cpp17),
            "python3" => Some(Self::Python3),
            _ => None,
        }
    }
}

/// What a `SubmissionRequest` is asking the orchestrator to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Submit,
    RunSample,
    Custom,
}

/// Input to the core: a request to judge one piece of source code.
///
/// `language` arrives as the raw wire string (spec §4.3: "Unknown languages
/// yield `\"unsupported language\"` synchronously") rather than the closed
/// `Language` enum, so an unrecognized value is a judging-time CE outcome
/// the orchestrator reports per submission, not a deserialization failure
/// that would reject the request before it ever reaches `judge::run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRequest {
    pub problem_id: u32,
    pub language: String,
    pub code: String,
    pub mode: Mode,
    pub custom_input: Option<String>,
    pub submitter_id: u32,
}

/// The fixed verdict set observable to callers (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Ac,
    Wa,
    Tle,
    Mle,
    Re,
    Ole,
    Ce,
    Custom,
    NotFound,
    Ok,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Verdict::Ac => "AC",
            Verdict::Wa => "WA",
            Verdict::Tle => "TLE",
            Verdict::Mle => "MLE",
            Verdict::Re => "RE",
            Verdict::Ole => "OLE",
            Verdict::Ce => "CE",
            Verdict::Custom => "CUSTOM",
            Verdict::NotFound => "NOT_FOUND",
            Verdict::Ok => "OK",
        };
        write!(f, "{s}")
    }
}

/// Bounded preview length used throughout `CaseResult` (spec §4.6 step h).
pub const PREVIEW_BYTES: usize = 200;
/// Bound on `CaseResult::full_output`, only populated for `custom` mode.
pub const CUSTOM_OUTPUT_BYTES: usize = 1024;

/// Per-case diagnostics produced while judging one `SubmissionRequest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseResult {
    pub case_id: u32,
    pub status: Verdict,
    pub input_preview: String,
    pub expected_preview: String,
    pub output_preview: String,
    pub runtime_ms: u64,
    pub error: Option<String>,
    pub full_output: Option<String>,
    pub score_weight: u32,
}

/// The outcome of judging one `SubmissionRequest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub overall_status: Verdict,
    pub runtime_ms: u64,
    pub compile_error: Option<String>,
    pub runtime_error: Option<String>,
    pub cases: Vec<CaseResult>,
    pub submission_id: Option<u32>,
}

impl SubmissionResult {
    pub fn not_found() -> Self {
        Self {
            overall_status: Verdict::NotFound,
            runtime_ms: 0,
            compile_error: None,
            runtime_error: None,
            cases: Vec::new(),
            submission_id: None,
        }
    }

    pub fn compile_error(message: String) -> Self {
        Self {
            overall_status: Verdict::Ce,
            runtime_ms: 0,
            compile_error: Some(message),
            runtime_error: None,
            cases: Vec::new(),
            submission_id: None,
        }
    }
}

/// RFC3339 millisecond timestamp, matching the lineage's logging/record
/// convention (`memory_optimization::create_timestamp`).
pub fn create_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Truncate `s` to at most `limit` bytes on a UTF-8 boundary, lossily.
pub fn bounded_preview(bytes: &[u8], limit: usize) -> String {
    let slice = &bytes[..bytes.len().min(limit)];
    String::from_utf8_lossy(slice).into_owned()
}
