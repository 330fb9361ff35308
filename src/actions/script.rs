use super::{Action, ActionError};
use duct::{cmd, Expression};
use duct_sh::sh_dangerous;
use log::{debug, error};
use thiserror::Error;

const ACTION_NAME: &str = "PRE_UPDATE";

/// An action to run a custom shell script before the managed process is restarted.
///
/// The passed script is running in a subshell (`/bin/sh` on *nix, `cmd.exe` on Windows),
/// or in the configured runner (e.g. `bash`) invoked as `<runner> -c <script>`,
/// so it can use any feature in these shells: variable expansion, pipes, redirection.
/// Both the stdout and stderr will be captured and logged. If the script fails,
/// the failure will also be logged.
pub struct ScriptAction {
    directory: String,
    command: String,
    runner: Option<String>,
}

/// Custom error describing the error cases for the ScriptAction.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// The underlying Rust command creation failed. The parameter contains the error.
    #[error("the script cannot run: {0}")]
    ScriptFailure(#[from] std::io::Error),
    /// The script returned a non-zero exit code, usually meaning it failed to start
    /// or encountered an error. The parameters are the exit code and the failed output.
    #[error("the script returned non-zero exit code {0} with message: {1}")]
    NonZeroExitcode(i32, String),
    /// The script output contains non-UTF8 characters.
    #[error("the script returned invalid characters")]
    NonUtf8Return,
}

impl From<ScriptError> for ActionError {
    fn from(value: ScriptError) -> Self {
        match value {
            ScriptError::ScriptFailure(_)
            | ScriptError::NonZeroExitcode(_, _)
            | ScriptError::NonUtf8Return => ActionError::FailedAction(value.to_string()),
        }
    }
}

impl ScriptAction {
    /// Creates a new script to be started in the given directory.
    pub fn new(directory: String, command: String) -> Self {
        ScriptAction {
            directory,
            command,
            runner: None,
        }
    }

    /// Run the script with the given shell instead of the default one.
    pub fn with_runner(mut self, runner: String) -> Self {
        self.runner = Some(runner);
        self
    }

    fn expression(&self) -> Expression {
        match &self.runner {
            Some(runner) => cmd!(runner, "-c", &self.command),
            // We can run `sh_dangerous`, because it is on the user's computer.
            None => sh_dangerous(&self.command),
        }
    }

    fn run_inner(&self) -> Result<String, ScriptError> {
        let output = self
            .expression()
            .env("SIDECAR_ACTION_NAME", ACTION_NAME)
            .env("SIDECAR_DIRECTORY", &self.directory)
            .stderr_to_stdout()
            .stdout_capture()
            .dir(&self.directory)
            .unchecked()
            .run()?;

        let output_str =
            std::str::from_utf8(&output.stdout).map_err(|_| ScriptError::NonUtf8Return)?;
        let output_str = output_str.trim_end().to_string();

        if output.status.success() {
            Ok(output_str)
        } else {
            Err(ScriptError::NonZeroExitcode(
                output.status.code().unwrap_or(-1),
                output_str,
            ))
        }
    }
}

impl Action for ScriptAction {
    /// Run the script in a subshell (`/bin/sh` on *nix, `cmd.exe` on Windows).
    /// If the script fails to start, return a non-zero error code or prints non-utf8
    /// characters, this function will result in an error.
    fn run(&self) -> Result<(), ActionError> {
        debug!(
            "Running script: {} in directory {}.",
            self.command, self.directory
        );

        match self.run_inner() {
            Ok(result) => {
                debug!("Command success, output:");
                result.lines().for_each(|line| {
                    debug!("{line}");
                });
                Ok(())
            }
            Err(err) => {
                error!("Failed: {err}.");
                Err(err.into())
            }
        }
    }
}
