//! Checker Host (spec §4.5): runs a problem-supplied checker program inside
//! the Sandboxed Runner with `{input, user_output}` on stdin and interprets
//! its exit code. Grounded on
//! `original_source/backend/app/runner/checker.py` for the wire protocol
//! and, in particular, its `WRAPPER` constant: the problem author's
//! `checker_source` defines a `check(input_text, user_output_text) -> bool`
//! function, never a raw script, and a fixed wrapper does the importing,
//! stdin decoding, and bool-to-exit-code translation around it.

use serde::Serialize;

use crate::config::{Bytes, MegaBytes, Seconds};
use crate::sandbox::{self, RunStatus};

/// Wall timeout for a checker invocation (spec §4.5: fixed at 2 seconds).
const CHECKER_TIMEOUT: Seconds = Seconds(2.0);
const CHECKER_MEMORY_MB: MegaBytes = MegaBytes(256);
const CHECKER_OUTPUT_LIMIT: Bytes = Bytes(64 * 1024);

/// Loads `checker_source` as a module, requires it to expose `check`, reads
/// the `{input, user_output}` payload from stdin, and exits 0/1 on the
/// boolean result or 2 (with the exception text on stderr) on any failure —
/// a direct port of `original_source/backend/app/runner/checker.py`'s
/// `WRAPPER` constant.
const WRAPPER: &str = r#"import importlib.util, json, sys
from pathlib import Path

def main():
    target = Path(sys.argv[1])
    spec = importlib.util.spec_from_file_location("checker", target)
    mod = importlib.util.module_from_spec(spec)
    spec.loader.exec_module(mod)
    if not hasattr(mod, "check"):
        sys.exit(2)
    payload = json.loads(sys.stdin.read())
    input_str = payload.get("input", "")
    user_output = payload.get("user_output", "")
    try:
        ok = bool(mod.check(input_str, user_output))
        sys.exit(0 if ok else 1)
    except Exception as exc:
        sys.stderr.write(str(exc))
        sys.exit(2)

if __name__ == "__main__":
    main()
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckerVerdict {
    Pass,
    Fail,
    /// Checker crashed, timed out, or exited with something other than 0/1.
    /// The judge treats this as WA with a descriptive error, never as an
    /// uncaught failure of the judging process itself.
    Error(String),
}

#[derive(Serialize)]
struct CheckerInput<'a> {
    input: &'a str,
    user_output: &'a str,
}

/// Write `checker_source` and the fixed wrapper into `scratch_dir`, then run
/// the wrapper under the wire protocol on stdin. `checker_source` is
/// interpreted as Python (the only language the judge's checker host
/// currently knows how to load) so it can call whatever comparison logic the
/// problem author wrote without a separate compile step — matching
/// `python3`'s no-compile-step adapter.
pub fn run_checker(checker_source: &str, input_text: &str, user_output: &str, scratch_dir: &std::path::Path) -> CheckerVerdict {
    let checker_path = scratch_dir.join("checker.py");
    if let Err(e) = std::fs::write(&checker_path, checker_source) {
        return CheckerVerdict::Error(format!("failed to stage checker: {e}"));
    }
    let wrapper_path = scratch_dir.join("runner.py");
    if let Err(e) = std::fs::write(&wrapper_path, WRAPPER) {
        return CheckerVerdict::Error(format!("failed to stage checker wrapper: {e}"));
    }

    let payload = match serde_json::to_vec(&CheckerInput {
        input: input_text,
        user_output,
    }) {
        Ok(bytes) => bytes,
        Err(e) => return CheckerVerdict::Error(format!("failed to encode checker input: {e}")),
    };

    let cmd = vec![
        "python3".to_string(),
        wrapper_path.to_string_lossy().into_owned(),
        checker_path.to_string_lossy().into_owned(),
    ];

    let report = match sandbox::run(&cmd, &payload, CHECKER_TIMEOUT, CHECKER_OUTPUT_LIMIT, CHECKER_MEMORY_MB) {
        Ok(report) => report,
        Err(e) => return CheckerVerdict::Error(format!("checker infrastructure failure: {e}")),
    };

    match report.status {
        RunStatus::Ok => CheckerVerdict::Pass,
        RunStatus::Tle => CheckerVerdict::Error("checker timed out".to_string()),
        RunStatus::Re => match report.exit_code {
            Some(1) => CheckerVerdict::Fail,
            _ => {
                let stderr = String::from_utf8_lossy(&report.stderr).into_owned();
                CheckerVerdict::Error(if stderr.is_empty() {
                    "checker exited with an error".to_string()
                } else {
                    stderr
                })
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passing_checker_exits_zero() {
        let dir = tempfile::tempdir().unwrap();
        let checker = "def check(input_text, user_output):\n    return True\n";
        let verdict = run_checker(checker, "4\n2 7 11 15\n9\n", "1 0\n", dir.path());
        assert_eq!(verdict, CheckerVerdict::Pass);
    }

    #[test]
    fn failing_checker_exits_one() {
        let dir = tempfile::tempdir().unwrap();
        let checker = "def check(input_text, user_output):\n    return False\n";
        let verdict = run_checker(checker, "in", "out", dir.path());
        assert_eq!(verdict, CheckerVerdict::Fail);
    }

    #[test]
    fn crashing_checker_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let checker = "def check(input_text, user_output):\n    raise RuntimeError('boom')\n";
        let verdict = run_checker(checker, "in", "out", dir.path());
        assert!(matches!(verdict, CheckerVerdict::Error(_)));
    }

    #[test]
    fn checker_missing_check_function_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let checker = "def not_check(input_text, user_output):\n    return True\n";
        let verdict = run_checker(checker, "in", "out", dir.path());
        assert!(matches!(verdict, CheckerVerdict::Error(_)));
    }
}
