use mockall::automock;
use thiserror::Error;

/// A check to mirror a folder of a remote git repository.
pub mod git;

/// A custom error for describing the error cases for checks
#[derive(Debug, Error)]
pub enum CheckError {
    /// Cannot initialize check, because it has a misconfiguration.
    #[error("not configured correctly: {0}")]
    Misconfigured(String),
    /// Cannot run check, because there isn't enough permission.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// Running the check failed.
    #[error("failed while running: {0}")]
    FailedUpdate(String),
}

/// A check is a process that tests if there are any changes and updates it.
///
/// Checks may include:
///   - probe a git remote and mirror it ([git::GitCheck])
///   - etc.
#[automock]
pub trait Check {
    /// Check if there are changes and update if necessary. Returns true if
    /// something changed.
    fn check(&mut self) -> Result<bool, CheckError>;
}
