//! Error handling and display for the CLI.

use std::path::PathBuf;

use colored::Colorize;
use osdk_scorecard::cluster::ClusterError;
use osdk_scorecard::{ConfigError, ContextError, ScorecardError, SelectorError};
use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("bundle directory {0} does not exist")]
    BundleNotFound(PathBuf),

    /// Results were printed; only the exit status is left to report.
    #[error("one or more tests did not pass")]
    FailingTests,
}

/// Whether the error has already been reported to the user.
pub fn is_silent(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<CliError>(), Some(CliError::FailingTests))
}

/// Suggestion shown under an error, if one applies.
pub fn hint(err: &anyhow::Error) -> Option<&'static str> {
    if let Some(CliError::BundleNotFound(_)) = err.downcast_ref::<CliError>() {
        return Some("Hint: pass the path of an unpacked bundle directory.");
    }

    if let Some(sc_err) = err.downcast_ref::<ScorecardError>() {
        if sc_err.context_error() == Some(ContextError::DeadlineExceeded) {
            return Some("Hint: tests did not finish in time; raise --wait-time.");
        }
        if matches!(sc_err, ScorecardError::Cleanup { .. }) {
            return Some(
                "Hint: some test resources may remain; delete pods labeled app=scorecard-test.",
            );
        }
    }

    if let Some(ConfigError::Read { .. }) = err.downcast_ref::<ConfigError>() {
        return Some("Hint: use --config or add tests/scorecard/config.yaml to the bundle.");
    }

    if err.downcast_ref::<SelectorError>().is_some() {
        return Some("Hint: selectors look like `suite=basic` or `test in (a,b)`.");
    }

    if err.downcast_ref::<ClusterError>().is_some() {
        return Some("Hint: check --kubeconfig or the KUBECONFIG environment variable.");
    }

    None
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {:#}", "Error:".red().bold(), err);

    if let Some(hint) = hint(err) {
        eprintln!("\n{}", hint.yellow());
    }
}
