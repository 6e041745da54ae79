//! Exit code logic for the runlog process.
//!
//! Single responsibility: map a run summary to the process exit outcome.

use std::process::ExitCode;

use runlog_core::RunSummary;

/// Process exit outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Every attempted run succeeded, or there was nothing to do.
    Success,
    /// The batch drained but some runs failed.
    Partial,
    /// The run stopped early or could not start.
    Failure,
}

impl From<ProcessExit> for ExitCode {
    fn from(exit: ProcessExit) -> Self {
        match exit {
            ProcessExit::Success => ExitCode::SUCCESS,
            ProcessExit::Partial => ExitCode::from(2),
            ProcessExit::Failure => ExitCode::FAILURE,
        }
    }
}

/// Determines the process exit outcome from a finished run.
pub(crate) fn determine_exit_outcome(summary: &RunSummary) -> ProcessExit {
    if summary.is_fatal() || summary.interrupted {
        ProcessExit::Failure
    } else if summary.failed > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Success
    }
}
