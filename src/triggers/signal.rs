use super::{Trigger, TriggerError, TriggerSender};
use log::debug;
use std::sync::atomic::AtomicU8;

/// A trigger that stops the program on a termination signal.
///
/// The first signal cancels the main loop, which stops the managed process
/// and exits. A second signal exits right away.
pub struct SignalTrigger {
    signal_count: AtomicU8,
}

impl SignalTrigger {
    pub fn new() -> SignalTrigger {
        SignalTrigger {
            signal_count: AtomicU8::new(0),
        }
    }

    #[cfg(unix)]
    fn listen_inner<I>(&self, tx: &TriggerSender, signals: I) -> Result<(), TriggerError>
    where
        I: IntoIterator<Item = i32>,
    {
        use std::{process, sync::atomic::Ordering, thread::sleep, time::Duration};

        for signal in signals.into_iter() {
            let previous = self.signal_count.fetch_add(1, Ordering::AcqRel);
            if previous == 0 {
                debug!("Got signal {signal}, stopping after the current update finished.");
                tx.cancel();
            } else {
                // Allow a little time for the clean shutdown to still happen.
                sleep(Duration::from_millis(100));
                debug!("Got signal {signal} again, terminating right now.");
                process::exit(128 + signal);
            }
        }

        Ok(())
    }
}

impl Default for SignalTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl Trigger for SignalTrigger {
    /// Starts a trigger that iterates over termination signals and cancels the program.
    #[cfg(unix)]
    fn listen(&self, tx: TriggerSender) -> Result<(), TriggerError> {
        use signal_hook::{
            consts::TERM_SIGNALS,
            iterator::{exfiltrator::SignalOnly, SignalsInfo},
        };

        let mut signals = SignalsInfo::<SignalOnly>::new(TERM_SIGNALS).map_err(|err| {
            TriggerError::Misconfigured(format!("cannot set up signal handlers ({err})"))
        })?;
        self.listen_inner(&tx, &mut signals)?;

        Ok(())
    }

    #[cfg(not(unix))]
    fn listen(&self, _tx: TriggerSender) -> Result<(), TriggerError> {
        debug!("Signal handlers are not supported on non-unix systems.");

        Ok(())
    }
}
