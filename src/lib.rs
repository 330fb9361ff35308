//! Mirror a folder of a remote git repository and keep a process running on it.
//!
//! ## How it works
//!
//! `git-sidecar` is built up from **triggers**, a **check** and **actions**.
//! Triggers are long running background processes that initiate checks
//! (a periodic schedule, an HTTP webhook, or a termination signal that shuts
//! everything down). The check asks the remote for its current revision and,
//! if it moved, mirrors the configured subtree into the local folder. When the
//! mirror changed, the pre-update scripts run and the managed process restarts.
//!
//! ```ignore
//! +---------+       +-------+       +------+       +---------+
//! | trigger | ----> | check | ----> | sync | ----> | actions |
//! +---------+       +-------+       +------+       +---------+
//! ```
//!

/// An action runs if any changes occured (e.g. [pre-update scripts](actions::script::ScriptAction)
/// or [restarting the managed process](actions::process::ProcessAction)).
pub mod actions;
/// A check tests if the remote has changed and mirrors it if it has.
pub mod checks;
/// Mirror one directory tree onto another.
pub mod sync;
/// A trigger is a long running background process, which initiates the checks
/// (e.g. [on a schedule](triggers::schedule::ScheduleTrigger), [on HTTP request](triggers::http::HttpTrigger)
/// or [stops on a signal](triggers::signal::SignalTrigger)).
pub mod triggers;

/// The main program loop, that runs the triggers, checks and actions until cancelled.
pub mod start;
