use super::{Trigger, TriggerError, TriggerSender};
use duration_string::DurationString;
use log::{debug, info};
use std::{thread::sleep, time::Duration};

/// A trigger that runs the checks periodically.
///
/// This is running in an infinite loop, triggering after every period,
/// until the program is cancelled.
pub struct ScheduleTrigger {
    duration: Duration,
}

impl ScheduleTrigger {
    /// Creates a new ScheduleTrigger with duration.
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// Runs one step in the scheduled time process: waits the duration, then triggers.
    /// Returns true, if it should continue, returns false if the program is cancelled.
    pub fn step(&self, tx: &TriggerSender) -> Result<bool, TriggerError> {
        sleep(self.duration);

        if tx.is_cancelled() {
            return Ok(false);
        }
        if !tx.trigger()? {
            debug!("There is a check pending already, skipping this one.");
        }

        Ok(true)
    }
}

impl Trigger for ScheduleTrigger {
    /// Starts a scheduled trigger, running the steps in a loop.
    /// Every step waits the given duration and then triggers. In case of an error,
    /// it terminates, on cancellation it returns.
    fn listen(&self, tx: TriggerSender) -> Result<(), TriggerError> {
        info!(
            "Checking for updates every {}.",
            DurationString::new(self.duration)
        );

        while self.step(&tx)? {}

        Ok(())
    }
}
