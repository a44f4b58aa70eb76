use crate::clock::Clock;
use crate::collaborators::{
    AuthSource, ErrorKind, ErrorReport, ErrorSink, RecoveryHandler, Severity,
};
use crate::context::{ContextProvider, ContextSnapshot};
use crate::diagnostics::DiagnosticsRecorder;
use crate::error::{Result, WatchdogError};
use crate::events::{LifecycleEvent, NotificationHub, RecoveryPath, WatchdogEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// At-most-one flag for recovery orchestration
#[derive(Debug, Clone, Default)]
pub struct RecoveryGuard {
    in_progress: Arc<AtomicBool>,
}

impl RecoveryGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check-and-set in one step; `None` if an orchestration is already active
    pub fn try_acquire(&self) -> Option<RecoveryPermit> {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RecoveryPermit {
                flag: self.in_progress.clone(),
            })
    }

    pub fn is_held(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }
}

/// Proof of holding the recovery guard. The guard clears when this drops,
/// including when the owning task is aborted mid-await.
#[derive(Debug)]
pub struct RecoveryPermit {
    flag: Arc<AtomicBool>,
}

impl Drop for RecoveryPermit {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryOutcome {
    pub path: RecoveryPath,
    pub success: bool,
    pub error: Option<String>,
}

/// Guarded, non-reentrant recovery procedure run on hard stalls
pub struct RecoveryOrchestrator {
    guard: RecoveryGuard,
    context: ContextProvider,
    auth: Arc<dyn AuthSource>,
    handler: Arc<dyn RecoveryHandler>,
    hub: NotificationHub,
    recorder: Arc<DiagnosticsRecorder>,
    sink: Arc<dyn ErrorSink>,
    clock: Arc<dyn Clock>,
    generic_delay: Duration,
}

impl RecoveryOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context: ContextProvider,
        auth: Arc<dyn AuthSource>,
        handler: Arc<dyn RecoveryHandler>,
        hub: NotificationHub,
        recorder: Arc<DiagnosticsRecorder>,
        sink: Arc<dyn ErrorSink>,
        clock: Arc<dyn Clock>,
        generic_delay: Duration,
    ) -> Self {
        Self {
            guard: RecoveryGuard::new(),
            context,
            auth,
            handler,
            hub,
            recorder,
            sink,
            clock,
            generic_delay,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.guard.is_held()
    }

    /// Take the guard synchronously so callers can spawn `run` afterwards
    pub fn try_begin(&self) -> Option<RecoveryPermit> {
        self.guard.try_acquire()
    }

    /// Acquire the guard and run one orchestration to completion
    pub async fn attempt_recovery(&self) -> Result<RecoveryOutcome> {
        let permit = self.try_begin().ok_or(WatchdogError::RecoveryInProgress)?;
        Ok(self.run(permit).await)
    }

    /// Run one orchestration under an already acquired permit
    pub async fn run(&self, permit: RecoveryPermit) -> RecoveryOutcome {
        let context = self.context.snapshot();
        let path = if context.is_stuck_after_login() {
            RecoveryPath::Targeted
        } else {
            RecoveryPath::Generic
        };

        let started_at = self.clock.now_ms();
        self.lifecycle(LifecycleEvent::RecoveryStarted, started_at);
        self.recorder.record_critical_path(
            started_at,
            "recovery_started",
            format!("path={:?} attempts={}", path, context.recovery.attempts),
        );
        tracing::warn!("Starting {:?} recovery", path);

        let outcome = match path {
            RecoveryPath::Targeted => self.targeted(&context).await,
            RecoveryPath::Generic => self.generic().await,
        };

        drop(permit);

        let finished_at = self.clock.now_ms();
        self.lifecycle(
            LifecycleEvent::RecoveryFinished {
                success: outcome.success,
            },
            finished_at,
        );
        self.recorder.record_critical_path(
            finished_at,
            "recovery_finished",
            format!("path={:?} success={}", outcome.path, outcome.success),
        );
        self.hub.publish(WatchdogEvent::RecoveryOutcome {
            path: outcome.path,
            success: outcome.success,
            error: outcome.error.clone(),
        });

        outcome
    }

    async fn targeted(&self, context: &ContextSnapshot) -> RecoveryOutcome {
        if let Err(e) = self.auth.reset_transient_state() {
            tracing::warn!("Failed to reset auth transient state: {}", e);
        }

        let user_id = context.auth.user_id.clone();
        let failure = match self.handler.attempt_recovery(user_id.clone()).await {
            Ok(true) => {
                tracing::info!("Targeted recovery succeeded");
                self.hub.publish(WatchdogEvent::ForceUiUpdate);
                return RecoveryOutcome {
                    path: RecoveryPath::Targeted,
                    success: true,
                    error: None,
                };
            }
            Ok(false) => WatchdogError::RecoveryFailed("handler reported failure".to_string()),
            Err(e) => WatchdogError::RecoveryFailed(format!("{:#}", e)),
        };

        let message = failure.to_string();
        tracing::error!("Targeted recovery failed: {}", message);
        self.recorder
            .record_critical_error(self.clock.now_ms(), "recovery", &message);
        self.sink.report(ErrorReport {
            kind: ErrorKind::Recovery,
            severity: Severity::High,
            message: "Recovery attempt failed".to_string(),
            details: serde_json::json!({
                "path": RecoveryPath::Targeted,
                "user_id": user_id,
                "attempts": context.recovery.attempts,
                "init_started": context.init.started,
            }),
            source: "recovery_orchestrator".to_string(),
            retryable: true,
            cause: Some(message.clone()),
        });

        RecoveryOutcome {
            path: RecoveryPath::Targeted,
            success: false,
            error: Some(message),
        }
    }

    async fn generic(&self) -> RecoveryOutcome {
        tokio::time::sleep(self.generic_delay).await;
        self.hub.publish(WatchdogEvent::ForceUiUpdate);

        RecoveryOutcome {
            path: RecoveryPath::Generic,
            success: true,
            error: None,
        }
    }

    fn lifecycle(&self, event: LifecycleEvent, now_ms: u64) {
        self.recorder.on_lifecycle(&event, now_ms);
        self.hub.publish(WatchdogEvent::Lifecycle(event));
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::context::fakes::{Fakes, Script};
    use parking_lot::Mutex;
    use tokio::sync::oneshot;

    /// Error sink that keeps every report for inspection
    #[derive(Default)]
    pub(crate) struct CollectingSink {
        pub reports: Mutex<Vec<ErrorReport>>,
    }

    impl ErrorSink for CollectingSink {
        fn report(&self, report: ErrorReport) {
            self.reports.lock().push(report);
        }
    }

    struct Harness {
        fakes: Fakes,
        orchestrator: Arc<RecoveryOrchestrator>,
        recorder: Arc<DiagnosticsRecorder>,
        sink: Arc<CollectingSink>,
        hub: NotificationHub,
    }

    fn harness(fakes: Fakes) -> Harness {
        let hub = NotificationHub::new(32);
        let recorder = Arc::new(DiagnosticsRecorder::new());
        let sink = Arc::new(CollectingSink::default());
        let orchestrator = Arc::new(RecoveryOrchestrator::new(
            fakes.provider(),
            fakes.auth.clone(),
            fakes.recovery.clone(),
            hub.clone(),
            recorder.clone(),
            sink.clone(),
            Arc::new(ManualClock::new(0)),
            Duration::from_millis(100),
        ));
        Harness {
            fakes,
            orchestrator,
            recorder,
            sink,
            hub,
        }
    }

    #[test]
    fn test_guard_is_exclusive() {
        let guard = RecoveryGuard::new();
        let permit = guard.try_acquire().unwrap();
        assert!(guard.is_held());
        assert!(guard.try_acquire().is_none());

        drop(permit);
        assert!(!guard.is_held());
        assert!(guard.try_acquire().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_targeted_path_resets_before_recovering() {
        let h = harness(Fakes::stuck_login("user-42"));
        let mut events = h.hub.subscribe();

        let outcome = h.orchestrator.attempt_recovery().await.unwrap();
        assert_eq!(outcome.path, RecoveryPath::Targeted);
        assert!(outcome.success);
        assert!(!h.orchestrator.is_in_progress());

        assert_eq!(
            *h.fakes.calls.lock(),
            vec![
                "reset_transient_state".to_string(),
                "attempt_recovery(user-42)".to_string()
            ]
        );

        let events = events.drain();
        assert!(events.contains(&WatchdogEvent::ForceUiUpdate));
        assert!(events.contains(&WatchdogEvent::RecoveryOutcome {
            path: RecoveryPath::Targeted,
            success: true,
            error: None,
        }));

        let counters = h.recorder.counters();
        assert_eq!(counters.recovery_attempts, 1);
        assert_eq!(counters.recovery_successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_targeted_failure_is_reported_retryable() {
        let h = harness(Fakes::stuck_login("user-42"));
        h.fakes.recovery.script.lock().push(Script::Fail);
        let mut events = h.hub.subscribe();

        let outcome = h.orchestrator.attempt_recovery().await.unwrap();
        assert!(!outcome.success);
        assert!(!h.orchestrator.is_in_progress());
        assert!(!events.drain().contains(&WatchdogEvent::ForceUiUpdate));

        let reports = h.sink.reports.lock();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kind, ErrorKind::Recovery);
        assert!(reports[0].retryable);
        assert_eq!(reports[0].details["user_id"], "user-42");

        assert_eq!(h.recorder.counters().recovery_successes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_error_clears_guard() {
        let h = harness(Fakes::stuck_login("user-42"));
        h.fakes.recovery.script.lock().push(Script::Error);

        let outcome = h.orchestrator.attempt_recovery().await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("handler exploded"));
        assert!(!h.orchestrator.is_in_progress());

        // A later cycle can retry
        let retry = h.orchestrator.attempt_recovery().await.unwrap();
        assert!(retry.success);
        assert_eq!(h.recorder.counters().recovery_attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generic_path_waits_then_nudges() {
        let h = harness(Fakes::new());
        let mut events = h.hub.subscribe();

        let start = tokio::time::Instant::now();
        let outcome = h.orchestrator.attempt_recovery().await.unwrap();
        assert_eq!(outcome.path, RecoveryPath::Generic);
        assert!(outcome.success);
        assert!(start.elapsed() >= Duration::from_millis(100));

        // The recovery handler is never involved
        assert!(h.fakes.calls.lock().is_empty());
        assert!(events.drain().contains(&WatchdogEvent::ForceUiUpdate));
        assert!(!h.orchestrator.is_in_progress());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_second_orchestration_while_in_flight() {
        let h = harness(Fakes::stuck_login("user-42"));
        let (tx, rx) = oneshot::channel();
        h.fakes.recovery.script.lock().push(Script::Wait(rx));

        let orchestrator = h.orchestrator.clone();
        let permit = orchestrator.try_begin().unwrap();
        let task = tokio::spawn(async move { orchestrator.run(permit).await });
        tokio::task::yield_now().await;

        assert!(h.orchestrator.is_in_progress());
        assert!(matches!(
            h.orchestrator.attempt_recovery().await,
            Err(WatchdogError::RecoveryInProgress)
        ));

        tx.send(true).unwrap();
        let outcome = task.await.unwrap();
        assert!(outcome.success);
        assert!(!h.orchestrator.is_in_progress());
        assert_eq!(h.fakes.recovery.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_clears_guard() {
        let h = harness(Fakes::stuck_login("user-42"));
        let (_tx, rx) = oneshot::channel::<bool>();
        h.fakes.recovery.script.lock().push(Script::Wait(rx));

        let orchestrator = h.orchestrator.clone();
        let permit = orchestrator.try_begin().unwrap();
        let task = tokio::spawn(async move { orchestrator.run(permit).await });
        tokio::task::yield_now().await;
        assert!(h.orchestrator.is_in_progress());

        task.abort();
        let _ = task.await;
        assert!(!h.orchestrator.is_in_progress());
    }
}
