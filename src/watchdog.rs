//! Scheduler-starvation watchdog.
//!
//! Two tasks watch the scheduler that runs the application:
//!
//! - the **probe** reschedules itself with (near) zero delay and stamps
//!   "last alive" every time it gets a turn. When the scheduler is blocked it
//!   simply never runs, so the gap keeps growing.
//! - the **checker** runs on a fixed interval and compares the gap against
//!   the freeze and hard thresholds.
//!
//! Only a probe stamp ends a freeze: the checker's own tick proves nothing
//! about the scheduler it runs on. Past the hard threshold the checker hands
//! a [`RecoveryPermit`] to a spawned orchestration, so recovery never blocks
//! the checker cadence and never runs twice at once.
//!
//! [`Watchdog::start`] puts both tasks on the current runtime.
//! [`Watchdog::start_on`] keeps the probe on the watched runtime and moves the
//! checker elsewhere, so a stall is reported while it is still happening.

use crate::clock::{Clock, TokioClock};
use crate::collaborators::{Collaborators, ErrorKind, ErrorReport, ErrorSink, Severity};
use crate::config::WatchdogConfig;
use crate::context::ContextProvider;
use crate::diagnostics::{DiagnosticsRecorder, DiagnosticsSnapshot, FreezeRecord};
use crate::error::{Result, WatchdogError};
use crate::events::{LifecycleEvent, NotificationHub, Subscription, WatchdogEvent};
use crate::liveness::{LivenessState, Thresholds, Verdict};
use crate::recovery::{RecoveryOrchestrator, RecoveryOutcome, RecoveryPermit};
use parking_lot::Mutex;
use std::fmt::Display;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Result of one checker tick
#[derive(Debug)]
pub struct Tick {
    pub elapsed_ms: u64,
    pub verdict: Verdict,
    /// Present when recovery is due and the guard was free. Whoever holds it
    /// owns the orchestration; dropping it releases the guard.
    pub recovery: Option<RecoveryPermit>,
}

struct Tasks {
    probe: JoinHandle<()>,
    checker: JoinHandle<()>,
}

impl Tasks {
    fn abort(self) {
        self.probe.abort();
        self.checker.abort();
    }
}

struct Shared {
    config: WatchdogConfig,
    thresholds: Thresholds,
    clock: Arc<dyn Clock>,
    liveness: Mutex<LivenessState>,
    hub: NotificationHub,
    recorder: Arc<DiagnosticsRecorder>,
    context: ContextProvider,
    orchestrator: Arc<RecoveryOrchestrator>,
    errors: Arc<dyn ErrorSink>,
    recovery_task: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    // The liveness lock is held from the state transition until its event is
    // published, so a probe stamp and a checker tick never interleave their
    // events. Collaborator queries made here must not call back into the
    // watchdog.
    fn probe(&self) {
        let now = self.clock.now_ms();
        let mut liveness = self.liveness.lock();
        let Some(episode) = liveness.mark_alive(now) else {
            return;
        };

        let record = FreezeRecord::new(episode.start_ms, episode.end_ms, self.context.snapshot());
        tracing::info!(
            "Scheduler responsive again after {}ms freeze",
            record.duration_ms
        );

        self.recorder.record_freeze(record.clone());
        self.hub.publish(WatchdogEvent::Recovered {
            duration_ms: record.duration_ms,
            record,
        });
    }

    fn check(&self) -> Tick {
        let now = self.clock.now_ms();
        let mut liveness = self.liveness.lock();
        let check = liveness.evaluate(now, self.thresholds);

        if check.verdict == Verdict::FreezeDetected {
            let context = self.context.snapshot();
            tracing::warn!(
                "Scheduler frozen: no probe turn for {}ms (threshold: {}ms)",
                check.elapsed_ms,
                self.thresholds.freeze_timeout_ms
            );
            self.recorder.record_critical_path(
                now,
                "freeze_detected",
                format!("elapsed {}ms", check.elapsed_ms),
            );
            self.hub.publish(WatchdogEvent::FreezeDetected {
                elapsed_ms: check.elapsed_ms,
                context,
            });
        }

        let recovery = if check.hard_stall && !liveness.is_responsive() {
            let permit = self.orchestrator.try_begin();
            match &permit {
                Some(_) => tracing::warn!(
                    "Freeze exceeded hard threshold ({}ms > {}ms), attempting recovery",
                    check.elapsed_ms,
                    self.thresholds.hard_timeout_ms
                ),
                None => tracing::debug!("Recovery already in progress, not re-triggering"),
            }
            permit
        } else {
            None
        };
        drop(liveness);

        Tick {
            elapsed_ms: check.elapsed_ms,
            verdict: check.verdict,
            recovery,
        }
    }

    fn spawn_recovery(&self, permit: RecoveryPermit) {
        let orchestrator = self.orchestrator.clone();
        let handle = tokio::spawn(async move {
            orchestrator.run(permit).await;
        });
        *self.recovery_task.lock() = Some(handle);
    }
}

async fn run_probe(shared: Arc<Shared>) {
    let delay = shared.config.probe_interval();
    loop {
        shared.probe();
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
    }
}

async fn run_checker(shared: Arc<Shared>) {
    let period = shared.config.check_interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if let Some(permit) = shared.check().recovery {
            shared.spawn_recovery(permit);
        }
    }
}

/// Application-health watchdog. Dropping it stops all of its tasks.
pub struct Watchdog {
    shared: Arc<Shared>,
    tasks: Mutex<Option<Tasks>>,
}

impl Watchdog {
    /// Create a watchdog measuring time with the tokio clock
    pub fn new(config: WatchdogConfig, collaborators: Collaborators) -> Result<Self> {
        Self::with_clock(config, collaborators, Arc::new(TokioClock::new()))
    }

    pub fn with_clock(
        config: WatchdogConfig,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let hub = NotificationHub::new(config.event_capacity);
        let recorder = Arc::new(DiagnosticsRecorder::new());
        let context = ContextProvider::new(
            collaborators.auth.clone(),
            collaborators.init.clone(),
            collaborators.recovery.clone(),
        );
        let orchestrator = Arc::new(RecoveryOrchestrator::new(
            context.clone(),
            collaborators.auth.clone(),
            collaborators.recovery.clone(),
            hub.clone(),
            recorder.clone(),
            collaborators.errors.clone(),
            clock.clone(),
            config.generic_recovery_delay(),
        ));

        let thresholds = Thresholds {
            freeze_timeout_ms: config.freeze_timeout_ms,
            hard_timeout_ms: config.hard_timeout_ms,
        };
        let liveness = Mutex::new(LivenessState::new(clock.now_ms()));

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                thresholds,
                clock,
                liveness,
                hub,
                recorder,
                context,
                orchestrator,
                errors: collaborators.errors,
                recovery_task: Mutex::new(None),
            }),
            tasks: Mutex::new(None),
        })
    }

    /// Arm the probe and checker on the current tokio runtime.
    /// Any previously armed tasks are cancelled first.
    pub fn start(&self) -> Result<()> {
        let handle =
            Handle::try_current().map_err(|e| WatchdogError::NoRuntime(e.to_string()))?;
        self.start_on(&handle, &handle);
        Ok(())
    }

    /// Arm the probe on the runtime being watched and the checker on
    /// `checker`. With separate runtimes the checker keeps ticking while the
    /// watched scheduler is blocked.
    pub fn start_on(&self, watched: &Handle, checker: &Handle) {
        let mut tasks = self.tasks.lock();
        if let Some(previous) = tasks.take() {
            previous.abort();
        }

        self.shared.liveness.lock().reset(self.shared.clock.now_ms());

        *tasks = Some(Tasks {
            probe: watched.spawn(run_probe(self.shared.clone())),
            checker: checker.spawn(run_checker(self.shared.clone())),
        });

        tracing::info!(
            "Watchdog started (check: {}ms, freeze: {}ms, hard: {}ms)",
            self.shared.config.check_interval_ms,
            self.shared.thresholds.freeze_timeout_ms,
            self.shared.thresholds.hard_timeout_ms
        );
    }

    /// Cancel the probe, the checker and any in-flight recovery. Idempotent.
    pub fn stop(&self) {
        let previous = self.tasks.lock().take();
        let recovery = self.shared.recovery_task.lock().take();

        if let Some(recovery) = recovery {
            recovery.abort();
        }

        if let Some(previous) = previous {
            previous.abort();
            tracing::info!("Watchdog stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.tasks.lock().is_some()
    }

    /// Stamp liveness once, as the probe task does on every turn
    pub fn probe(&self) {
        self.shared.probe();
    }

    /// Run one checker evaluation. Hosts driving their own loop must run
    /// the returned permit through [`Watchdog::run_recovery`].
    pub fn check(&self) -> Tick {
        self.shared.check()
    }

    pub async fn run_recovery(&self, permit: RecoveryPermit) -> RecoveryOutcome {
        self.shared.orchestrator.run(permit).await
    }

    /// Trigger a recovery outside the checker, e.g. from a host "unstick" action
    pub async fn attempt_recovery(&self) -> Result<RecoveryOutcome> {
        self.shared.orchestrator.attempt_recovery().await
    }

    pub fn recovery_in_progress(&self) -> bool {
        self.shared.orchestrator.is_in_progress()
    }

    pub fn is_responsive(&self) -> bool {
        self.shared.liveness.lock().is_responsive()
    }

    pub fn subscribe(&self) -> Subscription {
        self.shared.hub.subscribe()
    }

    /// Apply a host lifecycle signal to diagnostics and broadcast it
    pub fn lifecycle(&self, event: LifecycleEvent) {
        let now = self.shared.clock.now_ms();
        self.shared.recorder.on_lifecycle(&event, now);

        if let LifecycleEvent::InitFailed { reason } = &event {
            tracing::error!("Initialization failed: {}", reason);
            self.shared
                .recorder
                .record_critical_path(now, "init_failed", reason.clone());
            self.shared.errors.report(ErrorReport {
                kind: ErrorKind::Initialization,
                severity: Severity::Critical,
                message: "Initialization failed".to_string(),
                details: serde_json::json!({ "context": self.shared.context.snapshot() }),
                source: "initialization".to_string(),
                retryable: true,
                cause: Some(reason.clone()),
            });
        }

        self.shared.hub.publish(WatchdogEvent::Lifecycle(event));
    }

    /// Funnel an error caught elsewhere in the host into diagnostics and the
    /// error sink. These are not retried.
    pub fn register_external_error<E: Display + ?Sized>(&self, error: &E, context_label: &str) {
        let now = self.shared.clock.now_ms();
        let message = format!("{:#}", error);

        tracing::error!("[{}] {}", context_label, message);
        self.shared
            .recorder
            .record_critical_error(now, context_label, &message);
        self.shared.errors.report(ErrorReport {
            kind: ErrorKind::Unclassified,
            severity: Severity::Medium,
            message: message.clone(),
            details: serde_json::json!({ "responsive": self.is_responsive() }),
            source: context_label.to_string(),
            retryable: false,
            cause: Some(message),
        });
    }

    pub fn reset_session(&self) {
        self.shared.recorder.reset_session();
    }

    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        let now = self.shared.clock.now_ms();
        let liveness = self.shared.liveness.lock().view(now);

        self.shared.recorder.snapshot(
            now,
            self.shared.context.snapshot(),
            liveness,
            self.recovery_in_progress(),
        )
    }

    /// One-line status for logs
    pub fn health_status(&self) -> String {
        let now = self.shared.clock.now_ms();
        let line = self
            .shared
            .liveness
            .lock()
            .status_line(now, self.shared.thresholds);
        format!(
            "{}, freezes: {}, recovering: {}",
            line,
            self.shared.recorder.freeze_count(),
            self.recovery_in_progress()
        )
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}
