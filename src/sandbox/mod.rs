//! Sandboxed Runner (spec §4.2): execute an already-prepared command vector
//! with a stdin source and a stdout sink, enforcing limits, and classify the
//! result. Two entry points, `run` (in-memory, compile/custom) and
//! `run_stream` (streaming, graded cases).

pub mod unix_backend;

use std::io::{Read, Write};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{Bytes, MegaBytes, Seconds};
use crate::error::{JudgeError, JudgeResult};

use unix_backend::{spawn_limited, wait_with_timeout, ExecResult, Limits, ProcessOutcome};

/// Wall-clock safety margin added on top of the caller's timeout, matching
/// the lineage's isolate-backed runner (`wall_time_limit.0 + 0.5`).
const WALL_CLOCK_BUFFER: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Ok,
    Tle,
    Re,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: RunStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub runtime_ms: u64,
    pub exit_code: Option<i32>,
}

fn limits_for(timeout: Seconds, mem_mb: MegaBytes) -> Limits {
    Limits {
        cpu_seconds: timeout.0.ceil() as u64 + 1,
        mem_bytes: mem_mb.as_bytes(),
        wall_timeout: Duration::from(timeout) + WALL_CLOCK_BUFFER,
    }
}

fn classify(exec: ExecResult, stdout: Vec<u8>, stderr: Vec<u8>) -> JudgeResult<RunReport> {
    let (status, exit_code) = match exec.outcome {
        ProcessOutcome::Cancelled => return Err(JudgeError::Cancelled),
        ProcessOutcome::TimedOut => (RunStatus::Tle, None),
        ProcessOutcome::Exited(0) => (RunStatus::Ok, Some(0)),
        ProcessOutcome::Exited(code) => (RunStatus::Re, Some(code)),
        ProcessOutcome::Signaled(signal) => (RunStatus::Re, Some(-signal)),
    };
    Ok(RunReport {
        status,
        stdout,
        stderr,
        runtime_ms: exec.runtime_ms,
        exit_code,
    })
}

fn spawn_reader(mut pipe: impl Read + Send + 'static) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

/// In-memory entry point: used for `custom` mode and compile steps. The
/// captured stdout is bounded by `output_limit`; exceeding it truncates and
/// appends a marker to stderr rather than failing the run (spec §4.2).
pub fn run(
    cmd: &[String],
    stdin_text: &[u8],
    timeout: Seconds,
    output_limit: Bytes,
    mem_mb: MegaBytes,
) -> JudgeResult<RunReport> {
    run_cancellable(cmd, stdin_text, timeout, output_limit, mem_mb, None)
}

/// Same as `run`, but the wait loop also checks `cancellation` (spec §5:
/// orchestrator-level cancellation kills the candidate's process group and
/// discards any result).
pub fn run_cancellable(
    cmd: &[String],
    stdin_text: &[u8],
    timeout: Seconds,
    output_limit: Bytes,
    mem_mb: MegaBytes,
    cancellation: Option<&CancellationToken>,
) -> JudgeResult<RunReport> {
    let limits = limits_for(timeout, mem_mb);
    let mut child = spawn_limited(cmd, Stdio::piped(), Stdio::piped(), Stdio::piped(), &limits)?;

    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(stdin_text);
    }

    let stdout_handle = child.stdout.take().map(spawn_reader);
    let stderr_handle = child.stderr.take().map(spawn_reader);

    let exec = wait_with_timeout(&mut child, limits.wall_timeout, cancellation)?;

    let mut stdout_buf = stdout_handle.map(|h| h.join().unwrap_or_default()).unwrap_or_default();
    let mut stderr_buf = stderr_handle.map(|h| h.join().unwrap_or_default()).unwrap_or_default();

    if stdout_buf.len() as u64 > output_limit.0 {
        stdout_buf.truncate(output_limit.0 as usize);
        stderr_buf.extend_from_slice(b"\n[output truncated: exceeds output_limit]\n");
    }

    classify(exec, stdout_buf, stderr_buf)
}

/// Streaming entry point: used for graded cases. Stdout is redirected
/// directly to `stdout_path` so neither the candidate nor the judge holds
/// output in RAM; the returned `RunReport::stdout` is always empty.
pub fn run_stream(
    cmd: &[String],
    stdin_path: &Path,
    stdout_path: &Path,
    timeout: Seconds,
    mem_mb: MegaBytes,
) -> JudgeResult<RunReport> {
    run_stream_cancellable(cmd, stdin_path, stdout_path, timeout, mem_mb, None)
}

/// Same as `run_stream`, but the wait loop also checks `cancellation`.
pub fn run_stream_cancellable(
    cmd: &[String],
    stdin_path: &Path,
    stdout_path: &Path,
    timeout: Seconds,
    mem_mb: MegaBytes,
    cancellation: Option<&CancellationToken>,
) -> JudgeResult<RunReport> {
    let limits = limits_for(timeout, mem_mb);

    let stdin_file =
        std::fs::File::open(stdin_path).map_err(|e| crate::error::JudgeError::io(stdin_path, e))?;
    let stdout_file = std::fs::File::create(stdout_path)
        .map_err(|e| crate::error::JudgeError::io(stdout_path, e))?;

    let mut child = spawn_limited(
        cmd,
        Stdio::from(stdin_file),
        Stdio::from(stdout_file),
        Stdio::piped(),
        &limits,
    )?;

    let stderr_handle = child.stderr.take().map(spawn_reader);
    let exec = wait_with_timeout(&mut child, limits.wall_timeout, cancellation)?;
    let stderr_buf = stderr_handle.map(|h| h.join().unwrap_or_default()).unwrap_or_default();

    classify(exec, Vec::new(), stderr_buf)
}
