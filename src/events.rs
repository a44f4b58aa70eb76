//! Typed notification hub.
//!
//! Every freeze, recovery and lifecycle signal goes out as a
//! [`WatchdogEvent`] over a tokio broadcast channel. Publishing never blocks
//! and never fails: with no subscribers the event is simply dropped, and a
//! slow subscriber lags instead of stalling the publisher.

use crate::context::ContextSnapshot;
use crate::diagnostics::FreezeRecord;
use serde::Serialize;
use tokio::sync::broadcast;

/// Which branch the recovery orchestrator took
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPath {
    /// Logged in but stuck before initialization finished
    Targeted,
    /// Unknown cause; only a UI nudge is attempted
    Generic,
}

/// Host lifecycle signals the diagnostics recorder tracks
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "lifecycle")]
pub enum LifecycleEvent {
    LoginStarted,
    LoginSucceeded,
    AuthSucceeded,
    InitStarted,
    InitCompleted,
    InitFailed { reason: String },
    RecoveryStarted,
    RecoveryFinished { success: bool },
}

/// Watchdog event emitted to listeners
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum WatchdogEvent {
    FreezeDetected {
        elapsed_ms: u64,
        context: ContextSnapshot,
    },
    Recovered {
        duration_ms: u64,
        record: FreezeRecord,
    },
    RecoveryOutcome {
        path: RecoveryPath,
        success: bool,
        error: Option<String>,
    },
    /// Ask the UI layer to re-render
    ForceUiUpdate,
    Lifecycle(LifecycleEvent),
}

/// Publish side of the hub; cheap to clone
#[derive(Debug, Clone)]
pub struct NotificationHub {
    tx: broadcast::Sender<WatchdogEvent>,
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: WatchdogEvent) {
        // Err only means nobody is listening
        if self.tx.send(event).is_err() {
            tracing::trace!("Event dropped, no subscribers");
        }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Receiving end of the hub. Dropping it unsubscribes as well.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<WatchdogEvent>,
}

impl Subscription {
    /// Wait for the next event. Returns `None` once the hub is gone.
    /// Lagged events are skipped with a warning.
    pub async fn recv(&mut self) -> Option<WatchdogEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Subscriber lagged, {} events skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`Subscription::recv`]
    pub fn try_recv(&mut self) -> Option<WatchdogEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!("Subscriber lagged, {} events skipped", skipped);
                }
                Err(_) => return None,
            }
        }
    }

    /// Drain everything currently buffered
    pub fn drain(&mut self) -> Vec<WatchdogEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}
