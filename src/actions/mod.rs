use mockall::automock;
use thiserror::Error;

/// An action to supervise the managed process.
pub mod process;
/// An action to run a custom shell script.
pub mod script;

/// A custom error for describing the error cases for actions
#[derive(Debug, Error)]
pub enum ActionError {
    /// Running the action failed.
    #[error("{0}")]
    FailedAction(String),
}

/// An action is a process that runs if any changes occured.
///
/// Actions may include:
///   - running the pre-update scripts ([script::ScriptAction])
///   - etc.
#[automock]
pub trait Action {
    /// Initiate the action
    fn run(&self) -> Result<(), ActionError>;
}
