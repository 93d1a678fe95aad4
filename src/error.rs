use std::path::PathBuf;

use thiserror::Error;

/// Domain error taxonomy for the judging core (see spec §7).
///
/// Per-case failures are folded into a `CaseResult::error` string by the
/// orchestrator rather than propagated as `Err`; this enum covers the
/// submission-wide and infrastructure failures that do abort a call.
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("problem {0} not found")]
    ProblemNotFound(u32),

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("path escapes storage root: {0}")]
    InvalidPath(PathBuf),

    #[error("archive exceeds extraction cap of {limit} bytes")]
    ArchiveTooLarge { limit: u64 },

    #[error("malformed archive: {0}")]
    MalformedArchive(String),

    #[error("missing testdata for case {case_no}")]
    MissingTestdata { case_no: u32 },

    #[error("checker infrastructure failure: {0}")]
    CheckerFailure(String),

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("fork/exec failure: {0}")]
    SystemError(String),

    #[error("judging cancelled")]
    Cancelled,
}

impl JudgeError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type JudgeResult<T> = Result<T, JudgeError>;
