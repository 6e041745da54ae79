//! CLI argument definitions using clap derive macros.

use std::convert::Infallible;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;

use runlog_core::{
    Credential, DEFAULT_CONCURRENCY, DEFAULT_MAX_ATTEMPTS, DiskFullPolicy, RetryAfterPolicy,
};

/// Fetch and unpack CI run log archives, resuming where the last run stopped.
///
/// Reads a table of workflow runs, downloads each run's log archive and
/// extracts it under `logs_normal/` or `logs_failure/` depending on the
/// run's conclusion.
#[derive(Parser, Debug)]
#[command(name = "runlog")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// CSV table of runs (columns: repo, run_id, conclusion, log_url)
    #[arg(short, long, env = "RUNLOG_INPUT", default_value = "workflow_runs.csv")]
    pub input: PathBuf,

    /// Directory receiving logs_normal/ and logs_failure/
    #[arg(short, long, env = "RUNLOG_OUTPUT_DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// Directory holding the progress ledger [default: <OUTPUT_DIR>/.runlog]
    #[arg(long, env = "RUNLOG_LEDGER_DIR")]
    pub ledger_dir: Option<PathBuf>,

    /// API token
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<TokenArg>,

    /// File containing the API token, read when no token is given
    #[arg(long, env = "RUNLOG_TOKEN_FILE", default_value = "github_token.txt")]
    pub token_file: PathBuf,

    /// Maximum concurrent downloads (1-100)
    #[arg(short = 'c', long, env = "RUNLOG_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: u8,

    /// Maximum fetch attempts per archive, including the first (1-20)
    #[arg(short = 'r', long, env = "RUNLOG_MAX_ATTEMPTS", default_value_t = DEFAULT_MAX_ATTEMPTS, value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds (max 600000)
    #[arg(long, env = "RUNLOG_BACKOFF_BASE_MS", default_value_t = 1000, value_parser = clap::value_parser!(u64).range(0..=600_000))]
    pub backoff_base_ms: u64,

    /// Multiplier applied to the delay after each retry (1.0-10.0)
    #[arg(long, env = "RUNLOG_BACKOFF_FACTOR", default_value_t = 2.0, value_parser = parse_backoff_factor)]
    pub backoff_factor: f64,

    /// Upper bound for a single retry delay in milliseconds (max 3600000)
    #[arg(long, env = "RUNLOG_BACKOFF_MAX_MS", default_value_t = 60_000, value_parser = clap::value_parser!(u64).range(0..=3_600_000))]
    pub backoff_max_ms: u64,

    /// Random extra delay added to each retry, up to this many milliseconds (0 to disable)
    #[arg(long, env = "RUNLOG_RETRY_JITTER_MS", default_value_t = 0, value_parser = clap::value_parser!(u64).range(0..=60_000))]
    pub retry_jitter_ms: u64,

    /// Per-request timeout in seconds (1-3600)
    #[arg(short = 't', long, env = "RUNLOG_TIMEOUT_SECS", default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub timeout_secs: u64,

    /// Server Retry-After hints: ignore, or honor (wait at least that long)
    #[arg(long, env = "RUNLOG_RETRY_AFTER", default_value = "ignore")]
    pub retry_after: RetryAfterPolicy,

    /// When the disk fills up: record the failure per run, or abort the whole run
    #[arg(long, env = "RUNLOG_ON_DISK_FULL", default_value = "record")]
    pub on_disk_full: DiskFullPolicy,
}

/// Raw `--token` / `GITHUB_TOKEN` value.
///
/// A blank value parses successfully and yields no credential, so the token
/// file is still consulted.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenArg(String);

impl TokenArg {
    /// The credential, or `None` when the value is blank.
    #[must_use]
    pub fn credential(&self) -> Option<Credential> {
        Credential::new(&self.0)
    }
}

impl FromStr for TokenArg {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl fmt::Debug for TokenArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenArg(<redacted>)")
    }
}

/// Parses `argv` ignoring every environment fallback.
#[cfg(test)]
pub(crate) fn parse_without_env<I, T>(argv: I) -> Result<Args, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    use clap::{CommandFactory, FromArgMatches};

    let command = Args::command().mut_args(|arg| arg.env(None::<&str>));
    Args::from_arg_matches(&command.try_get_matches_from(argv)?)
}

fn parse_backoff_factor(value: &str) -> Result<f64, String> {
    let factor: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("`{value}` is not a number"))?;
    if (1.0..=10.0).contains(&factor) {
        Ok(factor)
    } else {
        Err(format!("{factor} is not in 1.0..=10.0"))
    }
}
