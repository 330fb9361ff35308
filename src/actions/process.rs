use duct::{cmd, Handle};
use log::{debug, info, trace, warn};
use mockall::automock;
use nix::{
    errno::Errno,
    sys::signal::{kill, Signal},
    unistd::Pid,
};
use std::{
    fmt::Display,
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, TryRecvError},
        Arc,
    },
    thread,
    time::Duration,
};
use thiserror::Error;

/// The time to wait for the process to exit after the stop signal, before killing it.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// A supervisor of a long-running process.
#[automock]
pub trait Supervisor {
    /// Start the process, it fails if it is already running.
    fn start(&mut self) -> Result<(), ProcessError>;
    /// Stop the process if it is running.
    fn stop(&mut self) -> Result<(), ProcessError>;
    /// Make the process pick up the changes.
    fn restart(&mut self) -> Result<(), ProcessError>;
}

/// Custom error describing the error cases for the ProcessAction.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The process is running already, it has to be stopped first.
    #[error("the process is already running with pid {0}")]
    AlreadyRunning(u32),
    /// There is no command to run.
    #[error("the command is empty")]
    EmptyCommand,
    /// The underlying Rust command creation failed. The parameter contains the error.
    #[error("the process cannot start: {0}")]
    SpawnFailed(std::io::Error),
    /// Waiting for the process failed.
    #[error("the process failed: {0}")]
    ProcessFailed(String),
    /// The stop signal cannot be sent to the process.
    #[error("cannot send {0} to the process: {1}")]
    SignalFailed(Signal, Errno),
    /// The watcher thread stopped without reporting the end of the process.
    #[error("lost track of the process")]
    WatcherLost,
    /// The restart command failed to start or returned a non-zero exit code.
    #[error("the restart command failed: {0}")]
    RestartFailed(String),
}

/// The way the process ended, reported by the watcher thread.
#[derive(Debug)]
enum Outcome {
    /// The process exited, with the exit code if it was not killed by a signal.
    Exited(Option<i32>),
    /// Waiting for the process failed.
    Failed(String),
}

struct RunningProcess {
    handle: Arc<Handle>,
    pid: u32,
    outcome: Receiver<Outcome>,
}

/// An action to run in the background and restart a subprocess.
///
/// The process inherits the standard output and error of the sidecar. A watcher
/// thread waits for the process and reports exactly once when it ends, either
/// because it was stopped or because it exited on its own.
pub struct ProcessAction {
    args: Vec<String>,
    restart_command: Option<Vec<String>>,
    stop_signal: Signal,
    stop_timeout: Duration,
    running: Option<RunningProcess>,
    exit_code: Option<i32>,
}

impl ProcessAction {
    /// Creates a new supervisor for the command, the process is not started yet.
    pub fn new(args: Vec<String>) -> Self {
        ProcessAction {
            args,
            restart_command: None,
            stop_signal: Signal::SIGTERM,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            running: None,
            exit_code: None,
        }
    }

    /// Run this command on restart instead of stopping and starting the process.
    pub fn with_restart_command(mut self, restart_command: Vec<String>) -> Self {
        self.restart_command = Some(restart_command);
        self
    }

    /// Send this signal to the process when stopping it.
    pub fn with_stop_signal(mut self, stop_signal: Signal) -> Self {
        self.stop_signal = stop_signal;
        self
    }

    /// Wait this much for the process to exit after the stop signal.
    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    /// The process id, if the process is running.
    pub fn pid(&self) -> Option<u32> {
        self.running.as_ref().map(|running| running.pid)
    }

    /// The exit code of the last process, if it exited normally.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Check whether the process is still running. If it exited on its own,
    /// the end is recorded and the supervisor is stopped.
    pub fn is_running(&mut self) -> bool {
        let Some(running) = &self.running else {
            return false;
        };

        match running.outcome.try_recv() {
            Err(TryRecvError::Empty) => true,
            Ok(outcome) => {
                warn!("Process {} exited unexpectedly.", running.pid);
                if let Err(err) = self.finish(outcome) {
                    warn!("{err}.");
                }
                false
            }
            Err(TryRecvError::Disconnected) => {
                warn!("Lost track of process {}.", running.pid);
                self.running = None;
                false
            }
        }
    }

    fn spawn_watcher(handle: Arc<Handle>) -> Receiver<Outcome> {
        let (tx, rx) = mpsc::sync_channel(1);
        thread::spawn(move || {
            let outcome = match handle.wait() {
                Ok(output) => Outcome::Exited(output.status.code()),
                Err(err) => Outcome::Failed(err.to_string()),
            };
            trace!("Process finished: {outcome:?}.");
            let _ = tx.send(outcome);
        });

        rx
    }

    /// Record the outcome of the process and move to stopped.
    fn finish(&mut self, outcome: Outcome) -> Result<(), ProcessError> {
        self.running = None;
        match outcome {
            Outcome::Exited(code) => {
                self.exit_code = code;
                match code {
                    Some(code) => info!("Process finished with exit code {code}."),
                    None => info!("Process was terminated by a signal."),
                }
                Ok(())
            }
            Outcome::Failed(err) => Err(ProcessError::ProcessFailed(err)),
        }
    }

    fn send_stop_signal(&self, pid: u32) -> Result<(), ProcessError> {
        debug!("Sending {} to process {pid}.", self.stop_signal);
        match kill(Pid::from_raw(pid as i32), self.stop_signal) {
            // The process is gone already, the watcher will report it
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(ProcessError::SignalFailed(self.stop_signal, errno)),
        }
    }

    fn run_restart_command(&self, restart_command: &[String]) -> Result<(), ProcessError> {
        let (program, args) = restart_command
            .split_first()
            .ok_or(ProcessError::EmptyCommand)?;

        info!("Running restart command {restart_command:?}.");
        let output = cmd(program, args)
            .unchecked()
            .run()
            .map_err(|err| ProcessError::RestartFailed(err.to_string()))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(ProcessError::RestartFailed(format!(
                "exited with code {}",
                output.status.code().unwrap_or(-1)
            )))
        }
    }
}

impl Supervisor for ProcessAction {
    fn start(&mut self) -> Result<(), ProcessError> {
        if self.is_running() {
            return Err(ProcessError::AlreadyRunning(self.pid().unwrap_or_default()));
        }

        let (program, args) = self.args.split_first().ok_or(ProcessError::EmptyCommand)?;
        debug!("Starting process {:?}.", self.args);
        let handle = cmd(program, args)
            .unchecked()
            .start()
            .map_err(ProcessError::SpawnFailed)?;
        let handle = Arc::new(handle);
        let pid = handle.pids().first().copied().unwrap_or_default();

        let outcome = ProcessAction::spawn_watcher(Arc::clone(&handle));
        self.running = Some(RunningProcess {
            handle,
            pid,
            outcome,
        });
        info!("Started {self}.");

        Ok(())
    }

    /// Send the stop signal and wait for the process to exit. If it doesn't exit
    /// in time, kill it and wait for the end.
    fn stop(&mut self) -> Result<(), ProcessError> {
        let Some(running) = &self.running else {
            debug!("Process is already stopped.");
            return Ok(());
        };

        // After the watcher reaped the process, its pid may belong to another process
        match running.outcome.try_recv() {
            Ok(outcome) => {
                debug!("Process {} has exited already.", running.pid);
                return self.finish(outcome);
            }
            Err(TryRecvError::Disconnected) => {
                self.running = None;
                return Err(ProcessError::WatcherLost);
            }
            Err(TryRecvError::Empty) => {}
        }

        info!("Stopping {self}.");
        self.send_stop_signal(running.pid)?;

        let outcome = match running.outcome.recv_timeout(self.stop_timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Process {} did not stop in {}s, killing it.",
                    running.pid,
                    self.stop_timeout.as_secs_f32()
                );
                if let Err(err) = running.handle.kill() {
                    warn!("Cannot kill process {}: {err}.", running.pid);
                }
                running
                    .outcome
                    .recv()
                    .map_err(|_| ProcessError::WatcherLost)?
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.running = None;
                return Err(ProcessError::WatcherLost);
            }
        };

        self.finish(outcome)
    }

    /// Run the restart command if there is one, otherwise stop and start the process.
    fn restart(&mut self) -> Result<(), ProcessError> {
        if let Some(restart_command) = &self.restart_command {
            return self.run_restart_command(restart_command);
        }

        self.stop()?;
        self.start()
    }
}

impl Display for ProcessAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.pid() {
            Some(pid) => write!(f, "Process(args={:?} pid={pid})", self.args),
            None => write!(f, "Process(args={:?})", self.args),
        }
    }
}
