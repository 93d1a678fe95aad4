use std::io::Read;
use std::sync::Arc;

use clap::Parser;
use serde::Deserialize;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use intcode::config::{CliArgs, Config};
use intcode::model::{Problem, SubmissionRequest};
use intcode::queue::{QueuedSubmission, SubmissionQueue};
use intcode::sink::{SqliteSubmissionSink, SubmissionSink};
use intcode::storage::TestCaseStorage;
use intcode::worker;

/// A one-shot submission description: the request plus the problem it
/// targets, since problem lookup is out of this crate's scope (spec §1) and
/// the CLI bootstrap has no database of its own to resolve one from.
#[derive(Deserialize)]
struct SubmissionInput {
    request: SubmissionRequest,
    problem: Option<Problem>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliArgs::parse();

    let default_filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(default_filter));

    let config = Config::load(&cli)?;

    if cli.flush_data && config.database_path.exists() {
        std::fs::remove_file(&config.database_path)?;
        log::info!("removed existing database at {}", config.database_path.display());
    }

    std::fs::create_dir_all(&config.work_dir)?;
    let storage = Arc::new(TestCaseStorage::new(
        config.testcase_root.clone(),
        config.max_zip_extract_bytes.0,
    )?);
    let sink: Arc<dyn SubmissionSink> = Arc::new(SqliteSubmissionSink::connect(&config.database_path).await?);

    let config = Arc::new(config);
    let queue = Arc::new(SubmissionQueue::new());
    let shutdown = CancellationToken::new();

    let handles = worker::spawn_pool(
        config.worker_threads,
        config.clone(),
        storage.clone(),
        sink.clone(),
        queue.clone(),
        shutdown.clone(),
    );
    log::info!("judging core started with {} worker(s)", config.worker_threads);

    let input_text = match &cli.submission_path {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let input: SubmissionInput = serde_json::from_str(&input_text)?;

    let (tx, rx) = oneshot::channel();
    queue.push(QueuedSubmission {
        request: input.request,
        problem: input.problem,
        responder: tx,
        cancellation: CancellationToken::new(),
    });

    let outcome = rx.await?;

    shutdown.cancel();
    for handle in handles {
        let _ = handle.await;
    }

    match outcome {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(e) => {
            log::error!("judging failed: {e}");
            Err(e.into())
        }
    }
}
