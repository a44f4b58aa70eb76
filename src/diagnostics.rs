//! Diagnostics recorder.
//!
//! Append-only record of freeze episodes, critical errors and lifecycle
//! counters. Every handler is a single synchronous update under a short lock,
//! so recording never reorders relative to the event being recorded.

use crate::context::ContextSnapshot;
use crate::events::LifecycleEvent;
use crate::liveness::LivenessView;
use parking_lot::Mutex;
use serde::Serialize;

/// A finished freeze episode
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FreezeRecord {
    pub start_ms: u64,
    pub end_ms: u64,
    pub duration_ms: u64,
    pub context: ContextSnapshot,
}

impl FreezeRecord {
    pub fn new(start_ms: u64, end_ms: u64, context: ContextSnapshot) -> Self {
        Self {
            start_ms,
            end_ms,
            duration_ms: end_ms.saturating_sub(start_ms),
            context,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CriticalError {
    pub at_ms: u64,
    pub context_label: String,
    pub message: String,
}

/// Breadcrumb on the path towards (or out of) a stall
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CriticalPathEntry {
    pub at_ms: u64,
    pub label: String,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub login_attempts: u32,
    pub login_successes: u32,
    pub auth_successes: u32,
    pub init_started_at_ms: Option<u64>,
    pub init_duration_ms: Option<u64>,
    pub recovery_attempts: u32,
    pub recovery_successes: u32,
}

#[derive(Debug, Default)]
struct Session {
    counters: Counters,
    freezes: Vec<FreezeRecord>,
    critical_errors: Vec<CriticalError>,
    critical_path: Vec<CriticalPathEntry>,
}

/// Deep, point-in-time copy of everything the recorder knows
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticsSnapshot {
    pub taken_at_ms: u64,
    pub counters: Counters,
    pub freezes: Vec<FreezeRecord>,
    pub critical_errors: Vec<CriticalError>,
    pub critical_path: Vec<CriticalPathEntry>,
    pub context: ContextSnapshot,
    pub liveness: LivenessView,
    pub recovery_in_progress: bool,
}

#[derive(Debug, Default)]
pub struct DiagnosticsRecorder {
    session: Mutex<Session>,
}

impl DiagnosticsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh diagnostics session
    pub fn reset_session(&self) {
        *self.session.lock() = Session::default();
    }

    /// Apply a lifecycle handler
    pub fn on_lifecycle(&self, event: &LifecycleEvent, now_ms: u64) {
        let mut guard = self.session.lock();
        let session = &mut *guard;
        let counters = &mut session.counters;

        match event {
            LifecycleEvent::LoginStarted => counters.login_attempts += 1,
            LifecycleEvent::LoginSucceeded => counters.login_successes += 1,
            LifecycleEvent::AuthSucceeded => counters.auth_successes += 1,
            LifecycleEvent::InitStarted => {
                counters.init_started_at_ms = Some(now_ms);
                counters.init_duration_ms = None;
            }
            LifecycleEvent::InitCompleted => {
                counters.init_duration_ms = counters
                    .init_started_at_ms
                    .map(|started| now_ms.saturating_sub(started));
            }
            LifecycleEvent::InitFailed { reason } => {
                session.critical_errors.push(CriticalError {
                    at_ms: now_ms,
                    context_label: "initialization".to_string(),
                    message: reason.clone(),
                });
            }
            LifecycleEvent::RecoveryStarted => counters.recovery_attempts += 1,
            LifecycleEvent::RecoveryFinished { success } => {
                if *success {
                    counters.recovery_successes += 1;
                }
            }
        }
    }

    pub fn record_freeze(&self, record: FreezeRecord) {
        self.session.lock().freezes.push(record);
    }

    pub fn record_critical_error(&self, at_ms: u64, context_label: &str, message: &str) {
        self.session.lock().critical_errors.push(CriticalError {
            at_ms,
            context_label: context_label.to_string(),
            message: message.to_string(),
        });
    }

    pub fn record_critical_path(&self, at_ms: u64, label: &str, detail: String) {
        self.session.lock().critical_path.push(CriticalPathEntry {
            at_ms,
            label: label.to_string(),
            detail,
        });
    }

    pub fn freeze_count(&self) -> usize {
        self.session.lock().freezes.len()
    }

    pub fn counters(&self) -> Counters {
        self.session.lock().counters.clone()
    }

    /// Copy the session out, merged with the caller's current context and liveness
    pub fn snapshot(
        &self,
        taken_at_ms: u64,
        context: ContextSnapshot,
        liveness: LivenessView,
        recovery_in_progress: bool,
    ) -> DiagnosticsSnapshot {
        let session = self.session.lock();
        DiagnosticsSnapshot {
            taken_at_ms,
            counters: session.counters.clone(),
            freezes: session.freezes.clone(),
            critical_errors: session.critical_errors.clone(),
            critical_path: session.critical_path.clone(),
            context,
            liveness,
            recovery_in_progress,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liveness::LivenessState;

    fn snapshot_of(recorder: &DiagnosticsRecorder) -> DiagnosticsSnapshot {
        recorder.snapshot(
            0,
            ContextSnapshot::default(),
            LivenessState::new(0).view(0),
            false,
        )
    }

    #[test]
    fn test_login_and_auth_counters() {
        let recorder = DiagnosticsRecorder::new();
        recorder.on_lifecycle(&LifecycleEvent::LoginStarted, 0);
        recorder.on_lifecycle(&LifecycleEvent::LoginStarted, 10);
        recorder.on_lifecycle(&LifecycleEvent::LoginSucceeded, 20);
        recorder.on_lifecycle(&LifecycleEvent::AuthSucceeded, 30);

        let counters = recorder.counters();
        assert_eq!(counters.login_attempts, 2);
        assert_eq!(counters.login_successes, 1);
        assert_eq!(counters.auth_successes, 1);
    }

    #[test]
    fn test_init_duration() {
        let recorder = DiagnosticsRecorder::new();

        // Completion without a start has no duration
        recorder.on_lifecycle(&LifecycleEvent::InitCompleted, 50);
        assert_eq!(recorder.counters().init_duration_ms, None);

        recorder.on_lifecycle(&LifecycleEvent::InitStarted, 100);
        recorder.on_lifecycle(&LifecycleEvent::InitCompleted, 1_350);
        assert_eq!(recorder.counters().init_duration_ms, Some(1_250));
    }

    #[test]
    fn test_init_failure_is_critical() {
        let recorder = DiagnosticsRecorder::new();
        recorder.on_lifecycle(
            &LifecycleEvent::InitFailed {
                reason: "library sync timed out".to_string(),
            },
            400,
        );

        let snapshot = snapshot_of(&recorder);
        assert_eq!(snapshot.critical_errors.len(), 1);
        assert_eq!(snapshot.critical_errors[0].context_label, "initialization");
        assert_eq!(snapshot.critical_errors[0].at_ms, 400);
    }

    #[test]
    fn test_recovery_counters() {
        let recorder = DiagnosticsRecorder::new();
        recorder.on_lifecycle(&LifecycleEvent::RecoveryStarted, 0);
        recorder.on_lifecycle(&LifecycleEvent::RecoveryFinished { success: false }, 1);
        recorder.on_lifecycle(&LifecycleEvent::RecoveryStarted, 2);
        recorder.on_lifecycle(&LifecycleEvent::RecoveryFinished { success: true }, 3);

        let counters = recorder.counters();
        assert_eq!(counters.recovery_attempts, 2);
        assert_eq!(counters.recovery_successes, 1);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let recorder = DiagnosticsRecorder::new();
        recorder.record_freeze(FreezeRecord::new(0, 7_000, ContextSnapshot::default()));

        let before = snapshot_of(&recorder);
        recorder.record_freeze(FreezeRecord::new(9_000, 9_500, ContextSnapshot::default()));

        assert_eq!(before.freezes.len(), 1);
        assert_eq!(before.freezes[0].duration_ms, 7_000);
        assert_eq!(recorder.freeze_count(), 2);
    }

    #[test]
    fn test_reset_session() {
        let recorder = DiagnosticsRecorder::new();
        recorder.on_lifecycle(&LifecycleEvent::LoginStarted, 0);
        recorder.record_freeze(FreezeRecord::new(0, 10, ContextSnapshot::default()));
        recorder.record_critical_error(5, "ui", "boom");
        recorder.record_critical_path(6, "freeze_detected", "elapsed 6000ms".to_string());

        recorder.reset_session();

        let snapshot = snapshot_of(&recorder);
        assert_eq!(snapshot.counters, Counters::default());
        assert!(snapshot.freezes.is_empty());
        assert!(snapshot.critical_errors.is_empty());
        assert!(snapshot.critical_path.is_empty());
    }
}
