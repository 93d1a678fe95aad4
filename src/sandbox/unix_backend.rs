//! Process-level enforcement primitives: rlimits, process groups, and
//! guaranteed reap on timeout. Grounded on rlimit/process-group semantics in
//! `original_source/backend/app/runner/sandbox.py` and on the
//! fork/wait discipline in
//! `other_examples/85938c32_danobi-btrfs-fuzz__src-runner-src-main.rs.rs`
//! ("never return from the child branch, so the parent can reap our
//! status") — expressed here through `std::process::Command::pre_exec`
//! rather than a raw `fork()`, since the child still execs immediately.

use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio_util::sync::CancellationToken;

use crate::error::{JudgeError, JudgeResult};

/// Maximum open file descriptors granted to a candidate process (spec §4.2).
const MAX_OPEN_FILES: u64 = 64;

pub struct Limits {
    /// Hard CPU-time rlimit, seconds (spec: `timeout + 1`).
    pub cpu_seconds: u64,
    /// Hard address-space / data-segment rlimit, bytes.
    pub mem_bytes: u64,
    /// Wall-clock budget enforced by the parent, independent of the CPU rlimit.
    pub wall_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Exited(i32),
    Signaled(i32),
    TimedOut,
    Cancelled,
}

pub struct ExecResult {
    pub outcome: ProcessOutcome,
    pub runtime_ms: u64,
}

/// Spawn `cmd` in a new process group with the given resource limits applied
/// before `exec`, via an unsafe `pre_exec` hook running in the forked child.
pub fn spawn_limited(
    cmd: &[String],
    stdin: Stdio,
    stdout: Stdio,
    stderr: Stdio,
    limits: &Limits,
) -> JudgeResult<Child> {
    let (program, args) = cmd
        .split_first()
        .ok_or_else(|| JudgeError::SystemError("empty command vector".to_string()))?;

    let mut command = Command::new(program);
    command.args(args).stdin(stdin).stdout(stdout).stderr(stderr);

    let cpu_seconds = limits.cpu_seconds;
    let mem_bytes = limits.mem_bytes;

    // SAFETY: the closure runs in the forked child between fork and exec; it
    // only calls async-signal-safe libc functions (setrlimit, setpgid) and
    // never allocates or touches Rust-managed state from the parent.
    unsafe {
        command.pre_exec(move || {
            set_rlimit(libc::RLIMIT_CPU, cpu_seconds)?;
            set_rlimit(libc::RLIMIT_AS, mem_bytes)?;
            set_rlimit(libc::RLIMIT_DATA, mem_bytes)?;
            set_rlimit(libc::RLIMIT_CORE, 0)?;
            set_rlimit(libc::RLIMIT_NOFILE, MAX_OPEN_FILES)?;
            if libc::setpgid(0, 0) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    command
        .spawn()
        .map_err(|e| JudgeError::SystemError(format!("fork/exec failed: {e}")))
}

fn set_rlimit(resource: u32, value: u64) -> std::io::Result<()> {
    let rlim = libc::rlimit {
        rlim_cur: value as libc::rlim_t,
        rlim_max: value as libc::rlim_t,
    };
    let ret = unsafe { libc::setrlimit(resource, &rlim) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Poll the child until it exits, `wall_timeout` elapses, or `cancellation`
/// fires. On timeout or cancellation, kill the whole process group (spec
/// §4.2: the child was placed in its own group precisely so this is always
/// possible) and reap it before returning.
pub fn wait_with_timeout(
    child: &mut Child,
    wall_timeout: Duration,
    cancellation: Option<&CancellationToken>,
) -> JudgeResult<ExecResult> {
    let pgid = Pid::from_raw(child.id() as i32);
    let start = Instant::now();
    const POLL_INTERVAL: Duration = Duration::from_millis(15);

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                return Ok(ExecResult {
                    outcome: classify_exit_status(status),
                    runtime_ms: start.elapsed().as_millis() as u64,
                });
            }
            Ok(None) => {
                if let Some(token) = cancellation {
                    if token.is_cancelled() {
                        let _ = killpg(pgid, Signal::SIGKILL);
                        let _ = child.wait();
                        return Ok(ExecResult {
                            outcome: ProcessOutcome::Cancelled,
                            runtime_ms: start.elapsed().as_millis() as u64,
                        });
                    }
                }
                if start.elapsed() >= wall_timeout {
                    let _ = killpg(pgid, Signal::SIGKILL);
                    let _ = child.wait();
                    return Ok(ExecResult {
                        outcome: ProcessOutcome::TimedOut,
                        runtime_ms: start.elapsed().as_millis() as u64,
                    });
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                return Err(JudgeError::SystemError(format!("waitpid failed: {e}")));
            }
        }
    }
}

fn classify_exit_status(status: ExitStatus) -> ProcessOutcome {
    if let Some(code) = status.code() {
        ProcessOutcome::Exited(code)
    } else if let Some(signal) = status.signal() {
        ProcessOutcome::Signaled(signal)
    } else {
        ProcessOutcome::Exited(-1)
    }
}
