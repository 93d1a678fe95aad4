//! Process configuration: a small `clap` CLI surface layered over
//! `INTCODE_`-prefixed environment settings (spec §6).

use std::path::PathBuf;

use clap::Parser;
use directories::ProjectDirs;
use serde::Deserialize;

/// Seconds, as a distinct unit from a bare `f64`/`u64` so a call site can't
/// accidentally pass milliseconds where seconds are expected.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Seconds(pub f64);

impl From<Seconds> for std::time::Duration {
    fn from(value: Seconds) -> Self {
        std::time::Duration::from_secs_f64(value.0.max(0.0))
    }
}

/// Mebibytes, used for the per-case address-space limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MegaBytes(pub u64);

impl MegaBytes {
    pub fn as_bytes(self) -> u64 {
        self.0 * 1024 * 1024
    }
}

/// A plain byte count, used for output caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Bytes(pub u64);

/// CLI flags; mirrors the lineage's `CliArgs` (config path, verbosity,
/// flush-on-start) but drops the HTTP bind address since there is no server.
#[derive(Parser, Debug)]
#[command(author, version, about = "Sandboxed submission judging core")]
pub struct CliArgs {
    /// Optional path to a JSON file overriding environment defaults.
    #[arg(short, long)]
    pub config_path: Option<PathBuf>,

    /// Remove any existing submission database before starting.
    #[arg(long, default_value_t = false)]
    pub flush_data: bool,

    /// Number of worker tasks judging submissions concurrently.
    #[arg(short = 't', long)]
    pub worker_threads: Option<usize>,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to a one-shot submission description (JSON); reads stdin if omitted.
    pub submission_path: Option<PathBuf>,
}

/// Optional JSON overrides, read from `--config-path` if given. Every field
/// is optional; anything unset falls back to the environment/default chain.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    pub work_dir: Option<PathBuf>,
    pub testcase_root: Option<PathBuf>,
    pub compile_timeout: Option<f64>,
    pub case_timeout: Option<f64>,
    pub output_limit: Option<u64>,
    pub max_output_bytes: Option<u64>,
    pub max_zip_extract_bytes: Option<u64>,
    pub memory_limit_mb: Option<u64>,
    pub worker_threads: Option<usize>,
    pub database_path: Option<PathBuf>,
}

/// Fully-resolved runtime configuration (spec §6's table).
#[derive(Debug, Clone)]
pub struct Config {
    pub work_dir: PathBuf,
    pub testcase_root: PathBuf,
    pub compile_timeout: Seconds,
    pub case_timeout: Seconds,
    pub output_limit: Bytes,
    pub max_output_bytes: Bytes,
    pub max_zip_extract_bytes: Bytes,
    pub memory_limit_mb: MegaBytes,
    pub worker_threads: usize,
    pub database_path: PathBuf,
}

const ENV_PREFIX: &str = "INTCODE_";

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(format!("{ENV_PREFIX}{key}"))
        .ok()
        .and_then(|v| v.parse().ok())
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(format!("{ENV_PREFIX}{key}"))
        .ok()
        .and_then(|v| v.parse().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(format!("{ENV_PREFIX}{key}")).ok().map(PathBuf::from)
}

fn project_cache_dir() -> PathBuf {
    ProjectDirs::from("", "", "intcode")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".intcode-cache"))
}

impl Config {
    /// Load environment defaults, then apply an optional config-file
    /// override, then CLI-flag overrides, in that order of increasing
    /// precedence — matching the lineage's `CliArgs::read_config` layering.
    pub fn load(args: &CliArgs) -> anyhow::Result<Self> {
        let file: ConfigFile = match &args.config_path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| anyhow::anyhow!("reading config file {}: {e}", path.display()))?;
                serde_json::from_str(&text)
                    .map_err(|e| anyhow::anyhow!("parsing config file {}: {e}", path.display()))?
            }
            None => ConfigFile::default(),
        };

        let cache_dir = project_cache_dir();

        let mut config = Config {
            work_dir: file
                .work_dir
                .or_else(|| env_path("WORK_DIR"))
                .unwrap_or_else(|| cache_dir.join("work")),
            testcase_root: file
                .testcase_root
                .or_else(|| env_path("TESTCASE_ROOT"))
                .unwrap_or_else(|| cache_dir.join("testcases")),
            compile_timeout: Seconds(
                file.compile_timeout
                    .or_else(|| env_f64("COMPILE_TIMEOUT"))
                    .unwrap_or(15.0),
            ),
            case_timeout: Seconds(
                file.case_timeout
                    .or_else(|| env_f64("CASE_TIMEOUT"))
                    .unwrap_or(2.0),
            ),
            output_limit: Bytes(
                file.output_limit
                    .or_else(|| env_u64("OUTPUT_LIMIT"))
                    .unwrap_or(20_000),
            ),
            max_output_bytes: Bytes(
                file.max_output_bytes
                    .or_else(|| env_u64("MAX_OUTPUT_BYTES"))
                    .unwrap_or(16 * 1024 * 1024),
            ),
            max_zip_extract_bytes: Bytes(
                file.max_zip_extract_bytes
                    .or_else(|| env_u64("MAX_ZIP_EXTRACT_BYTES"))
                    .unwrap_or(200 * 1024 * 1024),
            ),
            memory_limit_mb: MegaBytes(
                file.memory_limit_mb
                    .or_else(|| env_u64("MEMORY_LIMIT_MB"))
                    .unwrap_or(256),
            ),
            worker_threads: file
                .worker_threads
                .or_else(|| env_u64("WORKER_THREADS").map(|v| v as usize))
                .unwrap_or_else(num_cpus_fallback),
            database_path: file
                .database_path
                .or_else(|| env_path("DATABASE_PATH"))
                .unwrap_or_else(|| cache_dir.join("intcode.sqlite3")),
        };

        if let Some(threads) = args.worker_threads {
            config.worker_threads = threads;
        }

        Ok(config)
    }
}

/// `std::thread::available_parallelism`, falling back to 1 — avoids pulling
/// in the `num_cpus` crate for a single call site.
fn num_cpus_fallback() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let args = CliArgs {
            config_path: None,
            flush_data: false,
            worker_threads: None,
            verbose: 0,
            submission_path: None,
        };
        // Clear any stray env vars from a prior test in the same process.
        for key in [
            "WORK_DIR",
            "TESTCASE_ROOT",
            "COMPILE_TIMEOUT",
            "CASE_TIMEOUT",
            "OUTPUT_LIMIT",
            "MAX_OUTPUT_BYTES",
            "MAX_ZIP_EXTRACT_BYTES",
            "MEMORY_LIMIT_MB",
            "WORKER_THREADS",
            "DATABASE_PATH",
        ] {
            unsafe {
                std::env::remove_var(format!("{ENV_PREFIX}{key}"));
            }
        }

        let config = Config::load(&args).unwrap();
        assert_eq!(config.compile_timeout.0, 15.0);
        assert_eq!(config.case_timeout.0, 2.0);
        assert_eq!(config.output_limit.0, 20_000);
        assert_eq!(config.max_output_bytes.0, 16 * 1024 * 1024);
        assert_eq!(config.max_zip_extract_bytes.0, 200 * 1024 * 1024);
        assert_eq!(config.memory_limit_mb.0, 256);
    }

    #[test]
    fn cli_flag_overrides_worker_threads() {
        let args = CliArgs {
            config_path: None,
            flush_data: false,
            worker_threads: Some(7),
            verbose: 0,
            submission_path: None,
        };
        let config = Config::load(&args).unwrap();
        assert_eq!(config.worker_threads, 7);
    }
}
