//! Judge Orchestrator (spec §4.6): per-submission pipeline — select cases,
//! compile once, loop cases without short-circuiting, aggregate a verdict,
//! persist. Grounded on
//! `original_source/backend/app/services/judge_service.py` for pipeline
//! shape; deliberately diverges from it (and from the lineage's
//! `sandbox/testing.rs::run_test_cases`) on short-circuiting — see
//! DESIGN.md.

use std::io::Read;
use std::path::Path;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::checker::{self, CheckerVerdict};
use crate::compare;
use crate::config::Config;
use crate::error::{JudgeError, JudgeResult};
use crate::language::{self, AdapterOutcome};
use crate::model::{
    bounded_preview, CaseResult, Language, Mode, Problem, SubmissionRequest, SubmissionResult,
    TestCase, Verdict, CUSTOM_OUTPUT_BYTES, PREVIEW_BYTES,
};
use crate::sandbox::{self, RunStatus};
use crate::sink::{SubmissionRecord, SubmissionSink};
use crate::storage::TestCaseStorage;

const MEMORY_SIGNATURES: [&str; 2] = ["memory", "cannot allocate memory"];

/// Judge one `SubmissionRequest` against an already-resolved `Problem`
/// (problem lookup is an external collaborator's job — see spec §1).
///
/// `cancellation` is checked between cases and inside the runner's wait
/// loop (spec §5): once fired, the candidate's process group is killed and
/// `JudgeError::Cancelled` is returned with no partial result persisted.
pub fn run(
    config: &Config,
    storage: &TestCaseStorage,
    sink: &dyn SubmissionSink,
    problem: Option<&Problem>,
    request: &SubmissionRequest,
    cancellation: &CancellationToken,
) -> JudgeResult<SubmissionResult> {
    let problem = match problem {
        Some(p) => p,
        None => return Ok(SubmissionResult::not_found()),
    };

    std::fs::create_dir_all(&config.work_dir).map_err(|e| JudgeError::io(&config.work_dir, e))?;
    let scratch = tempfile::Builder::new()
        .prefix("judge-")
        .tempdir_in(&config.work_dir)
        .map_err(|e| JudgeError::SystemError(format!("failed to create scratch dir: {e}")))?;

    let language = match Language::parse(&request.language) {
        Some(language) => language,
        None => {
            let message = JudgeError::UnsupportedLanguage(request.language.clone()).to_string();
            return Ok(SubmissionResult::compile_error(message));
        }
    };

    let command = match language::prepare(language, &request.code, scratch.path(), config.compile_timeout) {
        AdapterOutcome::CompileError { message } => return Ok(SubmissionResult::compile_error(message)),
        AdapterOutcome::Ready { command } => command,
    };

    let cases = select_cases(problem, request);
    let mut case_results = Vec::with_capacity(cases.len().max(1));

    match request.mode {
        Mode::Custom => {
            let input = request.custom_input.clone().unwrap_or_default();
            case_results.push(run_custom_case(&command, &input, config, cancellation)?);
        }
        Mode::Submit | Mode::RunSample => {
            for case in cases {
                if cancellation.is_cancelled() {
                    return Err(JudgeError::Cancelled);
                }
                case_results.push(run_graded_case(
                    &command,
                    case,
                    storage,
                    scratch.path(),
                    config,
                    problem,
                    cancellation,
                )?);
            }
        }
    }

    let overall_status = aggregate(request.mode, &case_results);
    let runtime_ms = case_results.iter().map(|c| c.runtime_ms).max().unwrap_or(0);
    let runtime_error = case_results
        .iter()
        .find(|c| !matches!(c.status, Verdict::Ac | Verdict::Wa | Verdict::Ok))
        .and_then(|c| c.error.clone());

    let mut result = SubmissionResult {
        overall_status,
        runtime_ms,
        compile_error: None,
        runtime_error,
        cases: case_results,
        submission_id: None,
    };

    if request.mode == Mode::Submit {
        let score = if overall_status == Verdict::Ac { 100 } else { 0 };
        let cases_json = serde_json::to_string(&result.cases)
            .map_err(|e| JudgeError::SystemError(format!("failed to serialize case results: {e}")))?;
        let submission_id = sink
            .record(SubmissionRecord {
                problem_id: request.problem_id,
                submitter_id: request.submitter_id,
                language,
                status: overall_status,
                score,
                runtime_ms,
                cases_json,
            })
            .map_err(|e| JudgeError::SystemError(format!("failed to persist submission: {e}")))?;
        result.submission_id = Some(submission_id);
    }

    // `scratch` drops here, removing the scratch directory unconditionally.
    Ok(result)
}

fn select_cases<'p>(problem: &'p Problem, request: &SubmissionRequest) -> Vec<&'p TestCase> {
    match request.mode {
        Mode::Submit => problem.ordered_cases(),
        Mode::RunSample => problem.sample_cases(),
        Mode::Custom => Vec::new(),
    }
}

fn is_memory_signature(stderr: &[u8]) -> bool {
    let text = String::from_utf8_lossy(stderr).to_lowercase();
    MEMORY_SIGNATURES.iter().any(|sig| text.contains(sig))
}

enum ExecOutcome {
    RanOk,
    Failed(Verdict, Option<String>),
}

fn classify_exec(status: RunStatus, stderr: &[u8]) -> ExecOutcome {
    match status {
        RunStatus::Ok => ExecOutcome::RanOk,
        RunStatus::Tle => ExecOutcome::Failed(Verdict::Tle, Some("time limit exceeded".to_string())),
        RunStatus::Re => {
            if is_memory_signature(stderr) {
                ExecOutcome::Failed(Verdict::Mle, Some("memory limit exceeded".to_string()))
            } else {
                let message = String::from_utf8_lossy(stderr).trim().to_string();
                let message = if message.is_empty() {
                    "runtime error".to_string()
                } else {
                    message
                };
                ExecOutcome::Failed(Verdict::Re, Some(message))
            }
        }
    }
}

fn read_preview(path: &Path) -> String {
    match std::fs::File::open(path) {
        Ok(mut file) => {
            let mut buf = vec![0u8; PREVIEW_BYTES];
            let n = file.read(&mut buf).unwrap_or(0);
            bounded_preview(&buf[..n], PREVIEW_BYTES)
        }
        Err(_) => String::new(),
    }
}

fn run_custom_case(
    command: &[String],
    input: &str,
    config: &Config,
    cancellation: &CancellationToken,
) -> JudgeResult<CaseResult> {
    let start = Instant::now();
    let outcome = sandbox::run_cancellable(
        command,
        input.as_bytes(),
        config.case_timeout,
        config.output_limit,
        config.memory_limit_mb,
        Some(cancellation),
    );
    let elapsed_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Err(JudgeError::Cancelled) => Err(JudgeError::Cancelled),
        Err(e) => Ok(CaseResult {
            case_id: 0,
            status: Verdict::Re,
            input_preview: bounded_preview(input.as_bytes(), PREVIEW_BYTES),
            expected_preview: String::new(),
            output_preview: String::new(),
            runtime_ms: elapsed_ms,
            error: Some(e.to_string()),
            full_output: None,
            score_weight: TestCase::DEFAULT_SCORE_WEIGHT,
        }),
        Ok(report) => {
            let (status, error) = match classify_exec(report.status, &report.stderr) {
                ExecOutcome::RanOk => (Verdict::Ok, None),
                ExecOutcome::Failed(status, error) => (status, error),
            };
            Ok(CaseResult {
                case_id: 0,
                status,
                input_preview: bounded_preview(input.as_bytes(), PREVIEW_BYTES),
                expected_preview: String::new(),
                output_preview: bounded_preview(&report.stdout, PREVIEW_BYTES),
                runtime_ms: report.runtime_ms,
                error,
                full_output: Some(bounded_preview(&report.stdout, CUSTOM_OUTPUT_BYTES)),
                score_weight: TestCase::DEFAULT_SCORE_WEIGHT,
            })
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_graded_case(
    command: &[String],
    case: &TestCase,
    storage: &TestCaseStorage,
    scratch_dir: &Path,
    config: &Config,
    problem: &Problem,
    cancellation: &CancellationToken,
) -> JudgeResult<CaseResult> {
    let resolved = storage
        .resolve(&case.in_path)
        .and_then(|in_path| storage.resolve(&case.out_path).map(|out_path| (in_path, out_path)));

    let (in_path, out_path) = match resolved {
        Ok((in_path, out_path)) if in_path.exists() && out_path.exists() => (in_path, out_path),
        _ => {
            return Ok(CaseResult {
                case_id: case.id,
                status: Verdict::Re,
                input_preview: String::new(),
                expected_preview: String::new(),
                output_preview: String::new(),
                runtime_ms: 0,
                error: Some("missing testdata".to_string()),
                full_output: None,
                score_weight: case.score_weight,
            });
        }
    };

    let input_preview = read_preview(&in_path);
    let expected_preview = read_preview(&out_path);
    let stdout_path = scratch_dir.join(format!("{}.actual", case.case_no));

    let start = Instant::now();
    let outcome = sandbox::run_stream_cancellable(
        command,
        &in_path,
        &stdout_path,
        config.case_timeout,
        config.memory_limit_mb,
        Some(cancellation),
    );
    let elapsed_ms = start.elapsed().as_millis() as u64;

    let result = match outcome {
        Err(JudgeError::Cancelled) => {
            let _ = std::fs::remove_file(&stdout_path);
            return Err(JudgeError::Cancelled);
        }
        Err(e) => CaseResult {
            case_id: case.id,
            status: Verdict::Re,
            input_preview,
            expected_preview,
            output_preview: String::new(),
            runtime_ms: elapsed_ms,
            error: Some(e.to_string()),
            full_output: None,
            score_weight: case.score_weight,
        },
        Ok(report) => {
            let runtime_ms = report.runtime_ms.max(elapsed_ms);
            match classify_exec(report.status, &report.stderr) {
                ExecOutcome::Failed(status, error) => CaseResult {
                    case_id: case.id,
                    status,
                    input_preview,
                    expected_preview,
                    output_preview: String::new(),
                    runtime_ms,
                    error,
                    full_output: None,
                    score_weight: case.score_weight,
                },
                ExecOutcome::RanOk => finish_ok_case(
                    case,
                    problem,
                    &in_path,
                    &out_path,
                    &stdout_path,
                    scratch_dir,
                    input_preview,
                    expected_preview,
                    runtime_ms,
                    config,
                ),
            }
        }
    };

    let _ = std::fs::remove_file(&stdout_path);
    Ok(result)
}

#[allow(clippy::too_many_arguments)]
fn finish_ok_case(
    case: &TestCase,
    problem: &Problem,
    in_path: &Path,
    out_path: &Path,
    stdout_path: &Path,
    scratch_dir: &Path,
    input_preview: String,
    expected_preview: String,
    runtime_ms: u64,
    config: &Config,
) -> CaseResult {
    let output_size = std::fs::metadata(stdout_path).map(|m| m.len()).unwrap_or(0);
    if output_size > config.max_output_bytes.0 {
        return CaseResult {
            case_id: case.id,
            status: Verdict::Ole,
            input_preview,
            expected_preview,
            output_preview: read_preview(stdout_path),
            runtime_ms,
            error: Some("output limit exceeded".to_string()),
            full_output: None,
            score_weight: case.score_weight,
        };
    }

    if problem.is_spj {
        let input_text = std::fs::read_to_string(in_path).unwrap_or_default();
        let output_text = std::fs::read_to_string(stdout_path).unwrap_or_default();
        let checker_source = problem.checker_source.as_deref().unwrap_or("");
        let output_preview = read_preview(stdout_path);
        return match checker::run_checker(checker_source, &input_text, &output_text, scratch_dir) {
            CheckerVerdict::Pass => CaseResult {
                case_id: case.id,
                status: Verdict::Ac,
                input_preview,
                expected_preview,
                output_preview,
                runtime_ms,
                error: None,
                full_output: None,
                score_weight: case.score_weight,
            },
            CheckerVerdict::Fail => CaseResult {
                case_id: case.id,
                status: Verdict::Wa,
                input_preview,
                expected_preview,
                output_preview,
                runtime_ms,
                error: Some("wrong answer".to_string()),
                full_output: None,
                score_weight: case.score_weight,
            },
            CheckerVerdict::Error(message) => CaseResult {
                case_id: case.id,
                status: Verdict::Wa,
                input_preview,
                expected_preview,
                output_preview,
                runtime_ms,
                error: Some(message),
                full_output: None,
                score_weight: case.score_weight,
            },
        };
    }

    match compare::compare(out_path, stdout_path) {
        Ok((true, _)) => CaseResult {
            case_id: case.id,
            status: Verdict::Ac,
            input_preview,
            expected_preview,
            output_preview: read_preview(stdout_path),
            runtime_ms,
            error: None,
            full_output: None,
            score_weight: case.score_weight,
        },
        Ok((false, diag)) => CaseResult {
            case_id: case.id,
            status: Verdict::Wa,
            input_preview,
            expected_preview,
            output_preview: diag.actual_preview,
            runtime_ms,
            error: Some(format!("mismatch at offset {}", diag.mismatch_pos.unwrap_or(0))),
            full_output: None,
            score_weight: case.score_weight,
        },
        Err(e) => CaseResult {
            case_id: case.id,
            status: Verdict::Re,
            input_preview,
            expected_preview,
            output_preview: String::new(),
            runtime_ms,
            error: Some(e.to_string()),
            full_output: None,
            score_weight: case.score_weight,
        },
    }
}

/// `custom` -> `CUSTOM`; otherwise `AC` unless one of the priority statuses
/// (`RE > MLE > OLE > TLE > WA`) is present among the case results.
fn aggregate(mode: Mode, cases: &[CaseResult]) -> Verdict {
    if mode == Mode::Custom {
        return Verdict::Custom;
    }
    const PRIORITY: [Verdict; 5] = [Verdict::Re, Verdict::Mle, Verdict::Ole, Verdict::Tle, Verdict::Wa];
    for verdict in PRIORITY {
        if cases.iter().any(|c| c.status == verdict) {
            return verdict;
        }
    }
    Verdict::Ac
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Difficulty;
    use crate::sink::InMemorySink;
    use std::io::Cursor;

    fn base_config(work_dir: &Path) -> Config {
        Config {
            work_dir: work_dir.to_path_buf(),
            testcase_root: work_dir.join("cases"),
            compile_timeout: crate::config::Seconds(15.0),
            case_timeout: crate::config::Seconds(2.0),
            output_limit: crate::config::Bytes(20_000),
            max_output_bytes: crate::config::Bytes(16 * 1024 * 1024),
            max_zip_extract_bytes: crate::config::Bytes(200 * 1024 * 1024),
            memory_limit_mb: crate::config::MegaBytes(256),
            worker_threads: 1,
            database_path: work_dir.join("db.sqlite3"),
        }
    }

    fn two_sum_problem(storage: &TestCaseStorage) -> Problem {
        storage
            .save_single(
                "two-sum",
                1,
                Cursor::new(b"4\n2 7 11 15\n9\n".to_vec()),
                Cursor::new(b"0 1\n".to_vec()),
            )
            .unwrap();
        storage
            .save_single(
                "two-sum",
                2,
                Cursor::new(b"3\n3 2 4\n6\n".to_vec()),
                Cursor::new(b"1 2\n".to_vec()),
            )
            .unwrap();

        Problem {
            id: 1,
            slug: "two-sum".into(),
            difficulty: Difficulty::Easy,
            tags: vec![],
            is_spj: false,
            checker_source: None,
            cases: vec![
                TestCase {
                    id: 1,
                    problem_id: 1,
                    case_no: 1,
                    in_path: "two-sum/1.in".into(),
                    out_path: "two-sum/1.out".into(),
                    in_size_bytes: None,
                    out_size_bytes: None,
                    in_sha256: None,
                    out_sha256: None,
                    is_sample: true,
                    score_weight: 1,
                },
                TestCase {
                    id: 2,
                    problem_id: 1,
                    case_no: 2,
                    in_path: "two-sum/2.in".into(),
                    out_path: "two-sum/2.out".into(),
                    in_size_bytes: None,
                    out_size_bytes: None,
                    in_sha256: None,
                    out_sha256: None,
                    is_sample: false,
                    score_weight: 1,
                },
            ],
        }
    }

    const PY_ECHO_EXPECTED: &str = r#"
import sys
n = int(input())
nums = list(map(int, input().split()))
target = int(input())
for i in range(len(nums)):
    for j in range(i + 1, len(nums)):
        if nums[i] + nums[j] == target:
            print(i, j)
            sys.exit(0)
"#;

    #[test]
    fn submit_ac_both_cases() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TestCaseStorage::new(dir.path().join("cases"), 200 * 1024 * 1024).unwrap();
        let problem = two_sum_problem(&storage);
        let config = base_config(dir.path());
        let sink = InMemorySink::default();

        let request = SubmissionRequest {
            problem_id: 1,
            language: "python3".to_string(),
            code: PY_ECHO_EXPECTED.to_string(),
            mode: Mode::Submit,
            custom_input: None,
            submitter_id: 1,
        };

        let result = run(&config, &storage, &sink, Some(&problem), &request, &CancellationToken::new()).unwrap();
        assert_eq!(result.overall_status, Verdict::Ac);
        assert_eq!(result.cases.len(), 2);
        assert!(result.cases.iter().all(|c| c.status == Verdict::Ac));
        assert!(result.submission_id.is_some());

        let leftover_scratch_dirs = std::fs::read_dir(&config.work_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("judge-"))
            .count();
        assert_eq!(leftover_scratch_dirs, 0, "scratch directory must be removed after judging");
    }

    #[test]
    fn submit_wa_still_runs_remaining_cases() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TestCaseStorage::new(dir.path().join("cases"), 200 * 1024 * 1024).unwrap();
        let problem = two_sum_problem(&storage);
        let config = base_config(dir.path());
        let sink = InMemorySink::default();

        let code = "print('1 0')\nprint('1 2')\n";
        let request = SubmissionRequest {
            problem_id: 1,
            language: "python3".to_string(),
            code: code.to_string(),
            mode: Mode::Submit,
            custom_input: None,
            submitter_id: 1,
        };

        let result = run(&config, &storage, &sink, Some(&problem), &request, &CancellationToken::new()).unwrap();
        assert_eq!(result.overall_status, Verdict::Wa);
        assert_eq!(result.cases.len(), 2, "both cases must run, no short-circuit");
        assert_eq!(result.cases[0].status, Verdict::Wa);
        assert!(result.cases[0].error.as_ref().unwrap().contains("offset 0"));
    }

    #[test]
    fn problem_not_found_yields_not_found_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TestCaseStorage::new(dir.path().join("cases"), 200 * 1024 * 1024).unwrap();
        let config = base_config(dir.path());
        let sink = InMemorySink::default();
        let request = SubmissionRequest {
            problem_id: 99,
            language: "python3".to_string(),
            code: String::new(),
            mode: Mode::Submit,
            custom_input: None,
            submitter_id: 1,
        };
        let result = run(&config, &storage, &sink, None, &request, &CancellationToken::new()).unwrap();
        assert_eq!(result.overall_status, Verdict::NotFound);
    }

    #[test]
    fn custom_mode_runs_without_persisting() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TestCaseStorage::new(dir.path().join("cases"), 200 * 1024 * 1024).unwrap();
        let problem = two_sum_problem(&storage);
        let config = base_config(dir.path());
        let sink = InMemorySink::default();

        let request = SubmissionRequest {
            problem_id: 1,
            language: "python3".to_string(),
            code: "print(input())".to_string(),
            mode: Mode::Custom,
            custom_input: Some("hello\n".to_string()),
            submitter_id: 1,
        };

        let result = run(&config, &storage, &sink, Some(&problem), &request, &CancellationToken::new()).unwrap();
        assert_eq!(result.overall_status, Verdict::Custom);
        assert_eq!(result.cases.len(), 1);
        assert_eq!(result.cases[0].status, Verdict::Ok);
        assert!(result.cases[0].full_output.as_ref().unwrap().starts_with("hello"));
        assert!(result.submission_id.is_none());
        assert!(sink.records.lock().is_empty());
    }

    #[test]
    fn tle_candidate_is_killed_and_reaped() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TestCaseStorage::new(dir.path().join("cases"), 200 * 1024 * 1024).unwrap();
        let problem = two_sum_problem(&storage);
        let mut config = base_config(dir.path());
        config.case_timeout = crate::config::Seconds(1.0);
        let sink = InMemorySink::default();

        let request = SubmissionRequest {
            problem_id: 1,
            language: "python3".to_string(),
            code: "import time\ntime.sleep(5)\n".to_string(),
            mode: Mode::RunSample,
            custom_input: None,
            submitter_id: 1,
        };

        let start = Instant::now();
        let result = run(&config, &storage, &sink, Some(&problem), &request, &CancellationToken::new()).unwrap();
        assert!(start.elapsed() < std::time::Duration::from_secs(3));
        assert_eq!(result.overall_status, Verdict::Tle);
    }

    #[test]
    fn spj_accepts_symmetric_pair() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TestCaseStorage::new(dir.path().join("cases"), 200 * 1024 * 1024).unwrap();
        let mut problem = two_sum_problem(&storage);
        problem.is_spj = true;
        problem.checker_source = Some(
            "def check(input_text, user_output):\n    return sorted(user_output.split()) == ['0', '1']\n".to_string(),
        );

        let config = base_config(dir.path());
        let sink = InMemorySink::default();
        let request = SubmissionRequest {
            problem_id: 1,
            language: "python3".to_string(),
            code: "print('1 0')".to_string(),
            mode: Mode::RunSample,
            custom_input: None,
            submitter_id: 1,
        };

        let result = run(&config, &storage, &sink, Some(&problem), &request, &CancellationToken::new()).unwrap();
        assert_eq!(result.overall_status, Verdict::Ac);
    }

    #[test]
    fn pre_cancelled_token_aborts_without_persisting() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TestCaseStorage::new(dir.path().join("cases"), 200 * 1024 * 1024).unwrap();
        let problem = two_sum_problem(&storage);
        let config = base_config(dir.path());
        let sink = InMemorySink::default();

        let request = SubmissionRequest {
            problem_id: 1,
            language: "python3".to_string(),
            code: PY_ECHO_EXPECTED.to_string(),
            mode: Mode::Submit,
            custom_input: None,
            submitter_id: 1,
        };

        let token = CancellationToken::new();
        token.cancel();
        let result = run(&config, &storage, &sink, Some(&problem), &request, &token);
        assert!(matches!(result, Err(JudgeError::Cancelled)));
        assert!(sink.records.lock().is_empty());
    }

    #[test]
    fn unrecognized_language_yields_compile_error_without_persisting() {
        let dir = tempfile::tempdir().unwrap();
        let storage = TestCaseStorage::new(dir.path().join("cases"), 200 * 1024 * 1024).unwrap();
        let problem = two_sum_problem(&storage);
        let config = base_config(dir.path());
        let sink = InMemorySink::default();

        let request = SubmissionRequest {
            problem_id: 1,
            language: "rust2021".to_string(),
            code: "fn main() {}".to_string(),
            mode: Mode::Submit,
            custom_input: None,
            submitter_id: 1,
        };

        let result = run(&config, &storage, &sink, Some(&problem), &request, &CancellationToken::new()).unwrap();
        assert_eq!(result.overall_status, Verdict::Ce);
        assert!(result.compile_error.as_ref().unwrap().contains("rust2021"));
        assert!(result.cases.is_empty());
        assert!(sink.records.lock().is_empty());
    }
}
