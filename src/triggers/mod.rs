use mockall::automock;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc::{self, Receiver, SyncSender, TrySendError},
    Arc,
};
use thiserror::Error;

/// A trigger that runs on an HTTP request.
pub mod http;
/// A trigger that runs the checks periodically.
pub mod schedule;
/// A trigger that stops the program on a signal.
pub mod signal;

/// The amount of triggers that can wait in the queue, the rest is dropped.
pub const TRIGGER_CAPACITY: usize = 5;

/// A custom error for describing the error cases for triggers
#[derive(Debug, Error)]
pub enum TriggerError {
    /// Cannot initialize trigger, because it has a misconfiguration.
    #[error("not configured correctly: {0}")]
    Misconfigured(String),
    /// Cannot send trigger with Sender. This usually because the receiver is dropped.
    #[error("cannot trigger changes, receiver hang up")]
    ReceiverHangup,
    /// Running the trigger failed.
    #[error("{0}")]
    FailedTrigger(String),
}

/// The sending half of the trigger queue, shared between every trigger.
///
/// Sending never blocks: if there are already enough checks pending,
/// the trigger is dropped, because the pending check will see the same state.
#[derive(Clone)]
pub struct TriggerSender {
    tx: SyncSender<()>,
    cancelled: Arc<AtomicBool>,
}

/// The receiving half of the trigger queue, owned by the main loop.
pub struct TriggerReceiver {
    rx: Receiver<()>,
    cancelled: Arc<AtomicBool>,
}

/// The reason the main loop woke up.
#[derive(Debug, PartialEq, Eq)]
pub enum Wakeup {
    /// At least one check is due.
    Update,
    /// The program should stop.
    Cancel,
}

/// Create a new trigger queue with the default capacity.
pub fn channel() -> (TriggerSender, TriggerReceiver) {
    channel_with_capacity(TRIGGER_CAPACITY)
}

/// Create a new trigger queue, that holds at most `capacity` pending triggers.
pub fn channel_with_capacity(capacity: usize) -> (TriggerSender, TriggerReceiver) {
    let (tx, rx) = mpsc::sync_channel(capacity);
    let cancelled = Arc::new(AtomicBool::new(false));

    (
        TriggerSender {
            tx,
            cancelled: Arc::clone(&cancelled),
        },
        TriggerReceiver { rx, cancelled },
    )
}

impl TriggerSender {
    /// Request a check. Returns false if the trigger was dropped because the queue is full.
    pub fn trigger(&self) -> Result<bool, TriggerError> {
        match self.tx.try_send(()) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(())) => Ok(false),
            Err(TrySendError::Disconnected(())) => Err(TriggerError::ReceiverHangup),
        }
    }

    /// Stop the main loop. Cancellation wins over every pending trigger.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // Wake up the receiver; if the queue is full it is awake anyway.
        let _ = self.tx.try_send(());
    }

    /// Returns true if the program is shutting down.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl TriggerReceiver {
    /// Block until the next trigger or the cancellation.
    ///
    /// Every other trigger that is pending at that moment is consumed as well,
    /// so a burst of triggers results in one check. If every sender is gone,
    /// nothing can trigger anymore, which counts as a cancellation.
    pub fn wait(&self) -> Wakeup {
        if self.is_cancelled() {
            return Wakeup::Cancel;
        }
        if self.rx.recv().is_err() {
            return Wakeup::Cancel;
        }
        if self.is_cancelled() {
            return Wakeup::Cancel;
        }

        while self.rx.try_recv().is_ok() {}

        Wakeup::Update
    }

    /// Returns true if the program is shutting down.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A trigger is a long running background process, which initiates the checks.
///
/// Triggers may include:
///   - schedules ([schedule::ScheduleTrigger])
///   - HTTP servers ([http::HttpTrigger])
///   - signal handlers ([signal::SignalTrigger])
#[automock]
pub trait Trigger: Sync + Send {
    /// Start the trigger process.
    fn listen(&self, tx: TriggerSender) -> Result<(), TriggerError>;
}
