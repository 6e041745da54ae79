//! Configuration resolution: credential lookup, ledger location, client and
//! retry settings derived from CLI arguments.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use runlog_core::{Credential, RetrievalConfig, RetryPolicy};
use tracing::debug;

use crate::cli::{Args, TokenArg};

/// Ledger subdirectory used when `--ledger-dir` is not given.
pub(crate) const DEFAULT_LEDGER_SUBDIR: &str = ".runlog";

/// Environment file read from the working directory at startup.
pub(crate) const DOTENV_FILE: &str = ".env";

/// Loads `KEY=value` pairs from `path` into the process environment.
///
/// Variables that are already set keep their value. Returns `Ok(false)` when
/// the file does not exist.
pub(crate) fn load_dotenv(path: &Path) -> std::result::Result<bool, dotenvy::Error> {
    match dotenvy::from_path(path) {
        Ok(()) => Ok(true),
        Err(error) if error.not_found() => Ok(false),
        Err(error) => Err(error),
    }
}

/// Resolves the API credential.
///
/// A non-blank `--token` flag (or `GITHUB_TOKEN`) wins; otherwise the token
/// file is read if it exists. Having neither is an error.
pub(crate) fn resolve_credential(token: Option<&TokenArg>, token_file: &Path) -> Result<Credential> {
    match token.map(TokenArg::credential) {
        Some(Some(credential)) => {
            debug!("using credential from GITHUB_TOKEN / --token");
            return Ok(credential);
        }
        Some(None) => debug!("GITHUB_TOKEN / --token is blank, trying the token file"),
        None => {}
    }

    if !token_file.exists() {
        bail!(
            "no API credential: set GITHUB_TOKEN, pass --token, or create {}",
            token_file.display()
        );
    }

    let contents = std::fs::read_to_string(token_file)
        .with_context(|| format!("failed to read token file {}", token_file.display()))?;
    let Some(credential) = Credential::new(&contents) else {
        bail!("token file {} is empty", token_file.display());
    };
    debug!(path = %token_file.display(), "using credential from token file");
    Ok(credential)
}

/// Directory holding the ledger files.
pub(crate) fn ledger_dir(args: &Args) -> PathBuf {
    args.ledger_dir
        .clone()
        .unwrap_or_else(|| args.output_dir.join(DEFAULT_LEDGER_SUBDIR))
}

/// Retry policy from the backoff flags.
pub(crate) fn retry_policy(args: &Args) -> RetryPolicy {
    RetryPolicy::new(
        args.max_attempts,
        Duration::from_millis(args.backoff_base_ms),
        Duration::from_millis(args.backoff_max_ms),
        args.backoff_factor,
    )
    .with_jitter(Duration::from_millis(args.retry_jitter_ms))
    .with_retry_after(args.retry_after)
}

/// Immutable client configuration for the run.
pub(crate) fn retrieval_config(args: &Args, credential: Credential) -> RetrievalConfig {
    RetrievalConfig::new(credential)
        .with_request_timeout(Duration::from_secs(args.timeout_secs))
        .with_retry_policy(retry_policy(args))
}
