use crate::{
    actions::{
        process::{ProcessError, Supervisor},
        Action, ActionError,
    },
    checks::Check,
    triggers::{self, Trigger, TriggerReceiver, Wakeup},
};
use log::{debug, error, info, warn};
use std::thread;
use thiserror::Error;

/// A custom error implementation for the start function
#[derive(Debug, Error)]
pub enum StartError {
    #[error("You have to define at least one trigger.")]
    NoTriggers,
    #[error("The process failed to start: {0}.")]
    FailedStart(ProcessError),
    #[error("The process failed to stop: {0}.")]
    FailedStop(ProcessError),
}

/// Keeps the mirror and the managed process up to date.
///
/// On every trigger it runs the check, and if there are changes, it runs the
/// pre-update scripts and restarts the process.
pub struct Orchestrator {
    check: Box<dyn Check>,
    hooks: Vec<Box<dyn Action>>,
    process: Box<dyn Supervisor>,
    initialized: bool,
}

impl Orchestrator {
    pub fn new(check: Box<dyn Check>, process: Box<dyn Supervisor>) -> Self {
        Orchestrator {
            check,
            hooks: vec![],
            process,
            initialized: false,
        }
    }

    /// Run these actions in order after every change, before the restart.
    pub fn with_hooks(mut self, hooks: Vec<Box<dyn Action>>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Returns true if the first check and the hooks have succeeded already.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn run_hooks(&self) -> Result<(), ActionError> {
        for hook in self.hooks.iter() {
            hook.run()?;
        }

        Ok(())
    }

    /// Run the check and the hooks, the hooks run even if nothing changed or the
    /// check failed. Returns whether the check changed anything, if both succeeded.
    fn initialize(&mut self) -> Option<bool> {
        let changed = match self.check.check() {
            Ok(changed) => Some(changed),
            Err(err) => {
                error!("Check failed: {err}.");
                None
            }
        };

        if !self.hooks.is_empty() {
            debug!("Running the pre-update scripts for the first time.");
        }
        if let Err(err) = self.run_hooks() {
            error!("Pre-update script failed: {err}.");
            return None;
        }

        changed
    }

    /// Check for changes and if there are any, run the hooks and restart the process.
    fn update(&mut self) {
        match self.check.check() {
            Ok(true) => {
                info!(
                    "There are updates, {}.",
                    if self.hooks.is_empty() {
                        "restarting"
                    } else {
                        "running pre-update scripts"
                    }
                );
                if let Err(err) = self.run_hooks() {
                    error!("Pre-update script failed, we will not restart: {err}.");
                    return;
                }
                self.restart();
            }
            Ok(false) => {
                debug!("There are no updates.");
            }
            Err(err) => {
                error!("Check failed: {err}.");
            }
        }
    }

    fn restart(&mut self) {
        match self.process.restart() {
            Ok(()) => debug!("Process restarted."),
            Err(err) => error!("Restart failed: {err}."),
        }
    }

    fn handle_trigger(&mut self) {
        if self.initialized {
            self.update();
            return;
        }

        info!("Trying to initialize again.");
        if let Some(changed) = self.initialize() {
            info!("Initialized successfully.");
            self.initialized = true;
            if changed {
                self.restart();
            }
        }
    }

    /// Initialize, start the process and handle the triggers until cancelled.
    /// The process is stopped once at the end.
    pub fn run(&mut self, rx: &TriggerReceiver) -> Result<(), StartError> {
        self.initialized = self.initialize().is_some();
        if !self.initialized {
            warn!("Initialization failed, retrying on the next trigger.");
        }

        self.process.start().map_err(StartError::FailedStart)?;

        debug!("Waiting on triggers.");
        while rx.wait() == Wakeup::Update {
            self.handle_trigger();
        }

        info!("Shutting down.");
        self.process.stop().map_err(StartError::FailedStop)?;

        debug!("Finished running.");

        Ok(())
    }
}

/// The main program loop, that runs the triggers on their threads and
/// the orchestrator on the current one until it is cancelled.
pub fn start(
    triggers: Vec<Box<dyn Trigger>>,
    orchestrator: &mut Orchestrator,
) -> Result<(), StartError> {
    if triggers.is_empty() {
        return Err(StartError::NoTriggers);
    }

    let (tx, rx) = triggers::channel();
    for trigger in triggers {
        let tx = tx.clone();
        thread::spawn(move || {
            let result = trigger.listen(tx);
            if let Err(err) = result {
                error!("Trigger failed: {err}.");
            }
        });
    }
    drop(tx);

    orchestrator.run(&rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        actions::{process::MockSupervisor, MockAction},
        checks::{CheckError, MockCheck},
        triggers::{channel, MockTrigger, TriggerSender},
    };
    use mockall::Sequence;

    /// A check that returns the results in order, and cancels on the last one.
    fn check_in_order(
        tx: &TriggerSender,
        mut results: Vec<Result<bool, CheckError>>,
    ) -> MockCheck {
        let tx = tx.clone();
        let times = results.len();
        results.reverse();

        let mut mock_check = MockCheck::new();
        mock_check.expect_check().times(times).returning(move || {
            let result = results.pop().unwrap_or(Ok(false));
            if results.is_empty() {
                tx.cancel();
            }
            result
        });
        mock_check
    }

    fn failed_check() -> Result<bool, CheckError> {
        Err(CheckError::FailedUpdate(String::from("Testing purposes.")))
    }

    fn running_supervisor(restarts: usize) -> MockSupervisor {
        let mut mock_process = MockSupervisor::new();
        mock_process.expect_start().times(1).returning(|| Ok(()));
        mock_process
            .expect_restart()
            .times(restarts)
            .returning(|| Ok(()));
        mock_process.expect_stop().times(1).returning(|| Ok(()));
        mock_process
    }

    fn hook(times: usize) -> Box<dyn Action> {
        let mut mock_action = MockAction::new();
        mock_action.expect_run().times(times).returning(|| Ok(()));
        Box::new(mock_action)
    }

    #[test]
    fn it_should_initialize_start_and_stop_in_order() {
        let (tx, rx) = channel();
        tx.cancel();

        let mut seq = Sequence::new();
        let mut mock_check = MockCheck::new();
        mock_check
            .expect_check()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(true));
        let mut mock_action = MockAction::new();
        mock_action
            .expect_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        let mut mock_process = MockSupervisor::new();
        mock_process
            .expect_start()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        mock_process.expect_restart().times(0);
        mock_process
            .expect_stop()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));

        let mut orchestrator = Orchestrator::new(Box::new(mock_check), Box::new(mock_process))
            .with_hooks(vec![Box::new(mock_action)]);

        let result = orchestrator.run(&rx);
        assert!(result.is_ok());
        assert!(orchestrator.is_initialized());
    }

    #[test]
    fn it_should_fail_if_the_first_start_fails() {
        let (tx, rx) = channel();
        tx.trigger().unwrap();

        let mut mock_check = MockCheck::new();
        mock_check.expect_check().times(1).returning(|| Ok(true));
        let mut mock_process = MockSupervisor::new();
        mock_process
            .expect_start()
            .times(1)
            .returning(|| Err(ProcessError::EmptyCommand));
        mock_process.expect_stop().times(0);

        let mut orchestrator = Orchestrator::new(Box::new(mock_check), Box::new(mock_process));

        let result = orchestrator.run(&rx);
        assert!(
            matches!(result, Err(StartError::FailedStart(_))),
            "{result:?} should be FailedStart"
        );
    }

    #[test]
    fn it_should_run_the_hooks_and_restart_on_changes() {
        let (tx, rx) = channel();
        tx.trigger().unwrap();

        let mock_check = check_in_order(&tx, vec![Ok(true), Ok(true)]);
        let mut orchestrator =
            Orchestrator::new(Box::new(mock_check), Box::new(running_supervisor(1)))
                .with_hooks(vec![hook(2), hook(2)]);

        let result = orchestrator.run(&rx);
        assert!(result.is_ok());
    }

    #[test]
    fn it_should_not_restart_without_changes() {
        let (tx, rx) = channel();
        tx.trigger().unwrap();

        let mock_check = check_in_order(&tx, vec![Ok(true), Ok(false)]);
        let mut orchestrator =
            Orchestrator::new(Box::new(mock_check), Box::new(running_supervisor(0)))
                .with_hooks(vec![hook(1)]);

        let result = orchestrator.run(&rx);
        assert!(result.is_ok());
    }

    #[test]
    fn it_should_not_restart_on_a_failed_check() {
        let (tx, rx) = channel();
        tx.trigger().unwrap();

        let mock_check = check_in_order(&tx, vec![Ok(true), failed_check()]);
        let mut orchestrator =
            Orchestrator::new(Box::new(mock_check), Box::new(running_supervisor(0)))
                .with_hooks(vec![hook(1)]);

        let result = orchestrator.run(&rx);
        assert!(result.is_ok());
    }

    #[test]
    fn it_should_not_restart_if_a_hook_fails() {
        let (tx, rx) = channel();
        tx.trigger().unwrap();

        let mock_check = check_in_order(&tx, vec![Ok(true), Ok(true)]);
        let mut calls = 0;
        let mut failing_hook = MockAction::new();
        failing_hook.expect_run().times(2).returning(move || {
            calls += 1;
            if calls == 1 {
                Ok(())
            } else {
                Err(ActionError::FailedAction(String::from("Testing purposes.")))
            }
        });
        let mut orchestrator =
            Orchestrator::new(Box::new(mock_check), Box::new(running_supervisor(0)))
                // The second hook is skipped after the first fails
                .with_hooks(vec![Box::new(failing_hook), hook(1)]);

        let result = orchestrator.run(&rx);
        assert!(result.is_ok());
    }

    #[test]
    fn it_should_keep_running_if_the_restart_fails() {
        let (tx, rx) = channel();
        tx.trigger().unwrap();

        let mock_check = check_in_order(&tx, vec![Ok(true), Ok(true)]);
        let mut mock_process = MockSupervisor::new();
        mock_process.expect_start().times(1).returning(|| Ok(()));
        mock_process
            .expect_restart()
            .times(1)
            .returning(|| Err(ProcessError::RestartFailed(String::from("Testing purposes."))));
        mock_process.expect_stop().times(1).returning(|| Ok(()));

        let mut orchestrator = Orchestrator::new(Box::new(mock_check), Box::new(mock_process));

        let result = orchestrator.run(&rx);
        assert!(result.is_ok());
    }

    #[test]
    fn it_should_retry_the_initialization() {
        let (tx, rx) = channel();
        tx.trigger().unwrap();

        // The hooks run on the failed initialization as well
        let mock_check = check_in_order(&tx, vec![failed_check(), Ok(true)]);
        let mut orchestrator =
            Orchestrator::new(Box::new(mock_check), Box::new(running_supervisor(1)))
                .with_hooks(vec![hook(2)]);

        let result = orchestrator.run(&rx);
        assert!(result.is_ok());
        assert!(orchestrator.is_initialized());
    }

    #[test]
    fn it_should_not_restart_after_initialization_without_changes() {
        let (tx, rx) = channel();
        tx.trigger().unwrap();

        let mock_check = check_in_order(&tx, vec![failed_check(), Ok(false)]);
        let mut orchestrator =
            Orchestrator::new(Box::new(mock_check), Box::new(running_supervisor(0)));

        let result = orchestrator.run(&rx);
        assert!(result.is_ok());
        assert!(orchestrator.is_initialized());
    }

    #[test]
    fn it_should_retry_the_initialization_if_a_hook_fails() {
        let (tx, rx) = channel();
        tx.trigger().unwrap();

        let mock_check = check_in_order(&tx, vec![Ok(true), Ok(false)]);
        let mut failing_hook = MockAction::new();
        failing_hook
            .expect_run()
            .times(2)
            .returning(|| Err(ActionError::FailedAction(String::from("Testing purposes."))));
        let mut orchestrator =
            Orchestrator::new(Box::new(mock_check), Box::new(running_supervisor(0)))
                .with_hooks(vec![Box::new(failing_hook)]);

        let result = orchestrator.run(&rx);
        assert!(result.is_ok());
        assert!(!orchestrator.is_initialized());
    }

    #[test]
    fn it_should_check_once_for_a_burst_of_triggers() {
        let (tx, rx) = channel();
        for _ in 0..3 {
            tx.trigger().unwrap();
        }

        let mock_check = check_in_order(&tx, vec![Ok(true), Ok(false)]);
        let mut orchestrator =
            Orchestrator::new(Box::new(mock_check), Box::new(running_supervisor(0)));

        let result = orchestrator.run(&rx);
        assert!(result.is_ok());
    }

    #[test]
    fn it_should_prefer_cancellation_over_pending_triggers() {
        let (tx, rx) = channel();
        tx.trigger().unwrap();
        tx.trigger().unwrap();
        tx.cancel();

        let mut mock_check = MockCheck::new();
        mock_check.expect_check().times(1).returning(|| Ok(true));
        let mut orchestrator =
            Orchestrator::new(Box::new(mock_check), Box::new(running_supervisor(0)));

        let result = orchestrator.run(&rx);
        assert!(result.is_ok());
    }

    #[test]
    fn it_should_fail_if_the_stop_fails() {
        let (tx, rx) = channel();
        tx.cancel();

        let mut mock_check = MockCheck::new();
        mock_check.expect_check().times(1).returning(|| Ok(true));
        let mut mock_process = MockSupervisor::new();
        mock_process.expect_start().times(1).returning(|| Ok(()));
        mock_process
            .expect_stop()
            .times(1)
            .returning(|| Err(ProcessError::WatcherLost));

        let mut orchestrator = Orchestrator::new(Box::new(mock_check), Box::new(mock_process));

        let result = orchestrator.run(&rx);
        assert!(
            matches!(result, Err(StartError::FailedStop(_))),
            "{result:?} should be FailedStop"
        );
    }

    #[test]
    fn it_should_stop_when_a_trigger_cancels() {
        let mut mock_trigger = MockTrigger::new();
        mock_trigger.expect_listen().returning(|tx| {
            tx.cancel();
            Ok(())
        });
        let triggers: Vec<Box<dyn Trigger>> = vec![Box::new(mock_trigger)];

        let mut mock_check = MockCheck::new();
        mock_check.expect_check().times(1).returning(|| Ok(true));
        let mut orchestrator =
            Orchestrator::new(Box::new(mock_check), Box::new(running_supervisor(0)));

        let result = start(triggers, &mut orchestrator);
        assert!(result.is_ok());
    }

    #[test]
    fn it_should_stop_when_every_trigger_finished() {
        let mut mock_trigger = MockTrigger::new();
        mock_trigger.expect_listen().returning(|_| Ok(()));
        let triggers: Vec<Box<dyn Trigger>> = vec![Box::new(mock_trigger)];

        let mut mock_check = MockCheck::new();
        mock_check.expect_check().times(1).returning(|| Ok(true));
        let mut orchestrator =
            Orchestrator::new(Box::new(mock_check), Box::new(running_supervisor(0)));

        let result = start(triggers, &mut orchestrator);
        assert!(result.is_ok());
    }

    #[test]
    fn it_should_fail_without_triggers() {
        let triggers: Vec<Box<dyn Trigger>> = vec![];

        let mut mock_check = MockCheck::new();
        mock_check.expect_check().times(0);
        let mut mock_process = MockSupervisor::new();
        mock_process.expect_start().times(0);

        let mut orchestrator = Orchestrator::new(Box::new(mock_check), Box::new(mock_process));

        let result = start(triggers, &mut orchestrator);
        assert!(
            matches!(result, Err(StartError::NoTriggers)),
            "{result:?} should be NoTriggers"
        );
    }
}
