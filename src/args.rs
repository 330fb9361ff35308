use duration_string::DurationString;
use gumdrop::Options;
use nix::sys::signal::Signal;
use std::{str::FromStr, time::Duration};

pub const DEFAULT_BRANCH: &str = "master";
pub const DEFAULT_FOLDER: &str = ".";
pub const DEFAULT_UPDATE_PERIOD: Duration = Duration::from_secs(60);

/// Parse a duration, either as a number of seconds or a number postfixed
/// with s(econds), m(inutes), h(ours), d(ays).
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(seconds) = s.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }

    s.parse::<DurationString>()
        .map(Into::into)
        .map_err(|_| format!("cannot parse {s} as a duration, e.g. 30s, 5m or 1h"))
}

/// Parse a signal by name (SIGTERM, TERM or term) or by number.
pub fn parse_signal(s: &str) -> Result<Signal, String> {
    let s = s.trim();
    if let Ok(number) = s.parse::<i32>() {
        return Signal::try_from(number).map_err(|_| format!("{number} is not a valid signal"));
    }

    let name = s.to_uppercase();
    let name = if name.starts_with("SIG") {
        name
    } else {
        format!("SIG{name}")
    };
    Signal::from_str(&name).map_err(|_| format!("{s} is not a valid signal"))
}

/// Mirror a folder of a git repository and restart a process whenever it changes.
///
/// Every option falls back to an environment variable, if it is not given.
#[derive(Debug, Options)]
pub struct Args {
    /// The command to run and restart on changes, pass it after "--".
    #[options(free)]
    pub command: Vec<String>,

    /// The URL of the git repository to mirror (GIT_URL).
    ///
    /// If it is not set, the command is run without mirroring anything.
    #[options(meta = "URL")]
    pub url: Option<String>,

    /// The branch to mirror (GIT_BRANCH, default: master).
    #[options(meta = "BRANCH")]
    pub branch: Option<String>,

    /// The folder inside the repository to mirror (GIT_REPO_FOLDER, default: the whole repository).
    #[options(meta = "PATH")]
    pub repo_folder: Option<String>,

    /// The local folder to mirror into (GIT_LOCAL_FOLDER, default: current directory).
    #[options(meta = "PATH")]
    pub local_folder: Option<String>,

    /// The username for HTTP(S) repositories (GIT_USERNAME).
    #[options(no_short, meta = "USER")]
    pub username: Option<String>,

    /// The password or token for HTTP(S) repositories (GIT_PASSWORD).
    #[options(no_short, meta = "PASSWORD")]
    pub password: Option<String>,

    /// Check the repository with this delay (GIT_UPDATE_PERIOD, default: 60s).
    ///
    /// Can be a number of seconds, or a number postfixed with s(econd), m(inutes), h(ours), d(ays).
    /// Set it to 0 to only check on webhooks.
    #[options(meta = "DELAY", parse(try_from_str = "parse_duration"))]
    pub every: Option<Duration>,

    /// The script to run after changes, before restarting (PRE_UPDATE_COMMAND).
    #[options(no_short, meta = "SCRIPT")]
    pub pre_update: Option<String>,

    /// The shell to run the pre-update script with (PRE_UPDATE_RUNNER, default: sh).
    #[options(no_short, meta = "SHELL")]
    pub pre_update_runner: Option<String>,

    /// Run this command instead of restarting the process (RESTART_COMMAND).
    #[options(no_short, meta = "COMMAND")]
    pub restart_command: Option<String>,

    /// Never touch the files matching this gitignore pattern, you can define multiple times.
    #[options(no_short, long = "ignore", meta = "PATTERN")]
    pub ignores: Vec<String>,

    /// Runs an HTTP server on the address or port, which allows to trigger by calling it
    /// (WEBHOOK_ADDRESS or WEBHOOK_PORT).
    #[options(no_short, meta = "ADDRESS")]
    pub http: Option<String>,

    /// The header of the webhook token (WEBHOOK_TOKEN_HEADER).
    #[options(no_short, meta = "HEADER")]
    pub webhook_token_header: Option<String>,

    /// The value of the webhook token (WEBHOOK_TOKEN_VALUE).
    #[options(no_short, meta = "TOKEN")]
    pub webhook_token_value: Option<String>,

    /// The signal to stop the process with (STOP_SIGNAL, default: SIGTERM).
    #[options(no_short, meta = "SIGNAL", parse(try_from_str = "parse_signal"))]
    pub stop_signal: Option<Signal>,

    /// The time to wait for the process to stop before killing it (STOP_TIMEOUT, default: 10s).
    #[options(no_short, meta = "DELAY", parse(try_from_str = "parse_duration"))]
    pub stop_timeout: Option<Duration>,

    /// Increase verbosity, can be set multiple times (-v debug, -vv tracing)
    #[options(count)]
    pub verbose: u8,

    /// Only print error messages.
    #[options()]
    pub quiet: bool,

    /// Print the current version.
    #[options(short = "V")]
    pub version: bool,

    /// Print this help.
    #[options()]
    pub help: bool,
}

/// Set the value from the environment, if it is not set yet.
fn fill<T>(
    value: &mut Option<T>,
    variable: &str,
    lookup: &impl Fn(&str) -> Option<String>,
    parse: impl Fn(&str) -> Result<T, String>,
) -> Result<(), String> {
    if value.is_some() {
        return Ok(());
    }
    if let Some(env_value) = lookup(variable).filter(|v| !v.is_empty()) {
        *value = Some(parse(&env_value).map_err(|err| format!("{variable}: {err}"))?);
    }

    Ok(())
}

fn as_string(s: &str) -> Result<String, String> {
    Ok(s.to_string())
}

impl Args {
    /// Fill the options that are not set on the command line from the environment.
    pub fn with_env_fallbacks(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, String> {
        fill(&mut self.url, "GIT_URL", &lookup, as_string)?;
        fill(&mut self.branch, "GIT_BRANCH", &lookup, as_string)?;
        fill(&mut self.repo_folder, "GIT_REPO_FOLDER", &lookup, as_string)?;
        fill(&mut self.local_folder, "GIT_LOCAL_FOLDER", &lookup, as_string)?;
        fill(&mut self.username, "GIT_USERNAME", &lookup, as_string)?;
        fill(&mut self.password, "GIT_PASSWORD", &lookup, as_string)?;
        fill(&mut self.every, "GIT_UPDATE_PERIOD", &lookup, parse_duration)?;
        fill(&mut self.pre_update, "PRE_UPDATE_COMMAND", &lookup, as_string)?;
        fill(&mut self.pre_update_runner, "PRE_UPDATE_RUNNER", &lookup, as_string)?;
        fill(&mut self.restart_command, "RESTART_COMMAND", &lookup, as_string)?;
        fill(&mut self.http, "WEBHOOK_ADDRESS", &lookup, as_string)?;
        // Port 0 leaves the webhook disabled
        let port_lookup = |name: &str| lookup(name).filter(|port| port.trim() != "0");
        fill(&mut self.http, "WEBHOOK_PORT", &port_lookup, as_string)?;
        fill(
            &mut self.webhook_token_header,
            "WEBHOOK_TOKEN_HEADER",
            &lookup,
            as_string,
        )?;
        fill(
            &mut self.webhook_token_value,
            "WEBHOOK_TOKEN_VALUE",
            &lookup,
            as_string,
        )?;
        fill(&mut self.stop_signal, "STOP_SIGNAL", &lookup, parse_signal)?;
        fill(&mut self.stop_timeout, "STOP_TIMEOUT", &lookup, parse_duration)?;

        Ok(self)
    }

    pub fn branch(&self) -> String {
        self.branch.clone().unwrap_or(String::from(DEFAULT_BRANCH))
    }

    pub fn repo_folder(&self) -> String {
        self.repo_folder
            .clone()
            .unwrap_or(String::from(DEFAULT_FOLDER))
    }

    pub fn local_folder(&self) -> String {
        self.local_folder
            .clone()
            .unwrap_or(String::from(DEFAULT_FOLDER))
    }

    pub fn update_period(&self) -> Duration {
        self.every.unwrap_or(DEFAULT_UPDATE_PERIOD)
    }
}

pub fn parse_args() -> Args {
    Args::parse_args_default_or_exit()
}
