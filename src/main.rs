use args::{parse_args, Args};
use git_sidecar::{
    actions::{process::ProcessAction, script::ScriptAction, Action},
    checks::git::{CredentialAuth, GitCheck, GitRemote},
    start::{start, Orchestrator, StartError},
    triggers::{
        http::HttpTrigger, schedule::ScheduleTrigger, signal::SignalTrigger, Trigger,
    },
};
use log::{debug, info, warn};
use std::{env, fs::DirBuilder, io, process};
use thiserror::Error;

mod args;
mod logger;

const DEFAULT_ENV_FILE: &str = ".env";

#[derive(Debug, Error)]
pub enum MainError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("You have to pass a command to run, e.g. git-sidecar -u URL -- npm start.")]
    MissingCommand,
    #[error("Cannot load the environment file {0}: {1}.")]
    FailedEnvFile(String, dotenvy::Error),
    #[error("Cannot create the local folder {0}: {1}.")]
    FailedLocalFolder(String, io::Error),
    #[error("Cannot parse the restart command {0}.")]
    InvalidRestartCommand(String),
    #[error("Cannot run {0}: {1}.")]
    FailedExec(String, io::Error),
    #[error("Timezones are ambiguous, cannot setup logger.")]
    FailedLoggerTimezones,
    #[error("Cannot setup logger: {0}.")]
    FailedLogger(#[from] log::SetLoggerError),
    #[error(transparent)]
    Start(#[from] StartError),
}

/// Load the environment file if it exists, and return its name if it was loaded.
fn load_env_file() -> Result<Option<String>, MainError> {
    let env_file = env::var("ENV_FILE").unwrap_or(String::from(DEFAULT_ENV_FILE));
    match dotenvy::from_filename(&env_file) {
        Ok(_) => Ok(Some(env_file)),
        Err(err) if err.not_found() => Ok(None),
        Err(err) => Err(MainError::FailedEnvFile(env_file, err)),
    }
}

fn create_local_folder(local_folder: &str) -> Result<(), MainError> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o775);
    }

    builder
        .create(local_folder)
        .map_err(|err| MainError::FailedLocalFolder(local_folder.to_string(), err))
}

/// Replace the current process with the command, when there is nothing to watch.
#[cfg(unix)]
fn exec(command: &[String]) -> Result<(), MainError> {
    use std::os::unix::process::CommandExt;

    let (program, args) = command.split_first().ok_or(MainError::MissingCommand)?;
    info!("There is no repository to mirror, running {program} directly.");
    let err = process::Command::new(program).args(args).exec();

    Err(MainError::FailedExec(program.clone(), err))
}

/// Run the command and exit with its code, when there is nothing to watch.
#[cfg(not(unix))]
fn exec(command: &[String]) -> Result<(), MainError> {
    let (program, args) = command.split_first().ok_or(MainError::MissingCommand)?;
    info!("There is no repository to mirror, running {program} directly.");
    let output = duct::cmd(program, args)
        .unchecked()
        .run()
        .map_err(|err| MainError::FailedExec(program.clone(), err))?;

    process::exit(output.status.code().unwrap_or(1));
}

fn create_triggers(args: &Args) -> Result<Vec<Box<dyn Trigger>>, MainError> {
    let mut triggers: Vec<Box<dyn Trigger>> = vec![Box::new(SignalTrigger::new())];

    let period = args.update_period();
    if !period.is_zero() {
        triggers.push(Box::new(ScheduleTrigger::new(period)));
    }

    if let Some(http) = &args.http {
        let trigger = HttpTrigger::new(http.clone());
        let trigger = match (&args.webhook_token_header, &args.webhook_token_value) {
            (Some(header), Some(value)) => trigger.with_token(header.clone(), value.clone()),
            (None, None) => {
                warn!("The webhook is not protected, anyone can trigger updates.");
                trigger
            }
            _ => {
                return Err(MainError::InvalidArgument(String::from(
                    "You have to set both the webhook token header and value.",
                )))
            }
        };
        triggers.push(Box::new(trigger));
    }

    Ok(triggers)
}

fn create_process(args: &Args) -> Result<ProcessAction, MainError> {
    let mut process = ProcessAction::new(args.command.clone());
    if let Some(restart_command) = &args.restart_command {
        let restart_args = shlex::split(restart_command)
            .filter(|restart_args| !restart_args.is_empty())
            .ok_or(MainError::InvalidRestartCommand(restart_command.clone()))?;
        process = process.with_restart_command(restart_args);
    }
    if let Some(stop_signal) = args.stop_signal {
        process = process.with_stop_signal(stop_signal);
    }
    if let Some(stop_timeout) = args.stop_timeout {
        process = process.with_stop_timeout(stop_timeout);
    }

    Ok(process)
}

fn main_inner() -> Result<(), MainError> {
    let env_file = load_env_file()?;
    let args = parse_args()
        .with_env_fallbacks(|name| env::var(name).ok())
        .map_err(MainError::InvalidArgument)?;

    if args.version {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    logger::init_logger(&args)?;
    if let Some(env_file) = env_file {
        debug!("Loaded environment from {env_file}.");
    }

    if args.command.is_empty() {
        return Err(MainError::MissingCommand);
    }

    let Some(url) = args.url.clone() else {
        return exec(&args.command);
    };

    // Setup check.
    let local_folder = args.local_folder();
    create_local_folder(&local_folder)?;
    let mut remote = GitRemote::new(url, args.branch(), &args.repo_folder());
    if let (Some(username), Some(password)) = (&args.username, &args.password) {
        remote.set_auth(CredentialAuth {
            username: username.clone(),
            password: password.clone(),
        });
    }
    let check = GitCheck::new(Box::new(remote), &local_folder).with_ignores(args.ignores.clone());

    // Setup actions.
    let mut hooks: Vec<Box<dyn Action>> = vec![];
    if let Some(pre_update) = &args.pre_update {
        let mut script = ScriptAction::new(local_folder.clone(), pre_update.clone());
        if let Some(runner) = &args.pre_update_runner {
            script = script.with_runner(runner.clone());
        }
        hooks.push(Box::new(script));
    }
    let process = create_process(&args)?;

    // Setup triggers.
    let triggers = create_triggers(&args)?;

    // Start the main loop.
    let mut orchestrator =
        Orchestrator::new(Box::new(check), Box::new(process)).with_hooks(hooks);
    start(triggers, &mut orchestrator)?;

    Ok(())
}

fn main() {
    if let Err(err) = main_inner() {
        eprintln!("{err}");
        process::exit(1);
    }
}
