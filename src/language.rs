//! Language adapters (spec §4.3): a pure function
//! `(source_text, scratch_dir) -> (command_vector, compile_error?)` per
//! supported language. Grounded on the compile-step shape of
//! `original_source/backend/app/runner/cpp_runner.py` /
//! `py_runner.py`, executed through the Sandboxed Runner's `run` entry
//! point rather than a direct subprocess call.

use std::path::Path;

use crate::config::{Bytes, MegaBytes, Seconds};
use crate::model::Language;
use crate::sandbox::{self, RunStatus};

/// Result of invoking a language adapter.
pub enum AdapterOutcome {
    /// Ready to run: the command vector to invoke per test case.
    Ready { command: Vec<String> },
    /// Compilation failed; `message` is the compiler's stderr.
    CompileError { message: String },
}

/// Compile (if needed) source code written by the adapter into `scratch_dir`
/// and return the invocation vector for running one test case.
pub fn prepare(
    language: Language,
    code: &str,
    scratch_dir: &Path,
    compile_timeout: Seconds,
) -> AdapterOutcome {
    match language {
        Language::Cpp17 => prepare_cpp17(code, scratch_dir, compile_timeout),
        Language::Python3 => prepare_python3(code, scratch_dir),
    }
}

fn prepare_cpp17(code: &str, scratch_dir: &Path, compile_timeout: Seconds) -> AdapterOutcome {
    let source_path = scratch_dir.join("Main.cpp");
    if let Err(e) = std::fs::write(&source_path, code) {
        return AdapterOutcome::CompileError {
            message: format!("failed to write source: {e}"),
        };
    }

    let binary_path = scratch_dir.join("main.out");
    let cmd = vec![
        "g++".to_string(),
        "-std=c++17".to_string(),
        "-O2".to_string(),
        "-pipe".to_string(),
        "-o".to_string(),
        binary_path.to_string_lossy().into_owned(),
        source_path.to_string_lossy().into_owned(),
    ];

    let report = match sandbox::run(&cmd, b"", compile_timeout, Bytes(64 * 1024), MegaBytes(512)) {
        Ok(report) => report,
        Err(e) => {
            return AdapterOutcome::CompileError {
                message: format!("compiler invocation failed: {e}"),
            };
        }
    };

    match report.status {
        RunStatus::Ok => AdapterOutcome::Ready {
            command: vec![binary_path.to_string_lossy().into_owned()],
        },
        RunStatus::Tle => AdapterOutcome::CompileError {
            message: "compilation timed out".to_string(),
        },
        RunStatus::Re => AdapterOutcome::CompileError {
            message: String::from_utf8_lossy(&report.stderr).into_owned(),
        },
    }
}

fn prepare_python3(code: &str, scratch_dir: &Path) -> AdapterOutcome {
    let source_path = scratch_dir.join("main.py");
    if let Err(e) = std::fs::write(&source_path, code) {
        return AdapterOutcome::CompileError {
            message: format!("failed to write source: {e}"),
        };
    }
    AdapterOutcome::Ready {
        command: vec!["python3".to_string(), source_path.to_string_lossy().into_owned()],
    }
}
