//! In-memory host used by `hangwatch simulate`.
//!
//! The watched application runs on its own current-thread runtime. After a
//! short warm-up it blocks that runtime with a synchronous sleep, which is
//! exactly the kind of stall the probe cannot survive. The checker runs on
//! the caller's runtime and sees the stall as it happens.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use hangwatch::{
    AuthSource, Collaborators, DiagnosticsSnapshot, InitSource, LifecycleEvent, RecoveryHandler,
    Result, Session, StageStatus, Watchdog, WatchdogConfig, WatchdogError,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

const STAGES: &[&str] = &["session", "profile", "library"];

/// How long the handler pretends a targeted recovery takes
const RECOVERY_WORK: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// How long the watched runtime is blocked
    pub stall: Duration,
    /// Time the app runs normally before and after the stall
    pub settle: Duration,
    /// Log in but leave initialization unfinished
    pub stuck_login: bool,
}

#[derive(Default)]
struct HostState {
    authenticated: AtomicBool,
    init_in_progress: AtomicBool,
    stages: Mutex<BTreeMap<String, StageStatus>>,
    recovering: AtomicBool,
    attempts: AtomicU32,
}

impl HostState {
    fn finish_init(&self) {
        self.init_in_progress.store(false, Ordering::SeqCst);
        let mut stages = self.stages.lock();
        for stage in STAGES {
            stages.insert(stage.to_string(), StageStatus::Success);
        }
    }
}

/// Auth, init and recovery collaborators backed by shared in-memory state
#[derive(Clone, Default)]
pub struct SimulatedHost {
    state: Arc<HostState>,
}

impl SimulatedHost {
    pub fn collaborators(&self) -> Collaborators {
        let host = Arc::new(self.clone());
        Collaborators::new(host.clone(), host.clone(), host)
    }

    fn login(&self) {
        self.state.authenticated.store(true, Ordering::SeqCst);
    }

    fn begin_init(&self) {
        self.state.init_in_progress.store(true, Ordering::SeqCst);
        let mut stages = self.state.stages.lock();
        stages.insert("session".to_string(), StageStatus::Success);
        stages.insert("profile".to_string(), StageStatus::Running);
        stages.insert("library".to_string(), StageStatus::Pending);
    }
}

impl AuthSource for SimulatedHost {
    fn is_authenticated(&self) -> anyhow::Result<bool> {
        Ok(self.state.authenticated.load(Ordering::SeqCst))
    }

    fn current_session(&self) -> anyhow::Result<Session> {
        Ok(Session {
            user_id: self
                .state
                .authenticated
                .load(Ordering::SeqCst)
                .then(|| "demo-user".to_string()),
        })
    }

    fn reset_transient_state(&self) -> anyhow::Result<()> {
        tracing::info!("Simulated auth: transient login state cleared");
        Ok(())
    }
}

impl InitSource for SimulatedHost {
    fn is_in_progress(&self) -> anyhow::Result<bool> {
        Ok(self.state.init_in_progress.load(Ordering::SeqCst))
    }

    fn stage_states(&self) -> anyhow::Result<BTreeMap<String, StageStatus>> {
        Ok(self.state.stages.lock().clone())
    }
}

impl RecoveryHandler for SimulatedHost {
    fn attempt_recovery(
        &self,
        user_id: Option<String>,
    ) -> BoxFuture<'static, anyhow::Result<bool>> {
        let state = self.state.clone();
        state.attempts.fetch_add(1, Ordering::SeqCst);
        state.recovering.store(true, Ordering::SeqCst);

        async move {
            tracing::info!(
                "Simulated recovery for {}",
                user_id.as_deref().unwrap_or("anonymous")
            );
            tokio::time::sleep(RECOVERY_WORK).await;
            state.finish_init();
            state.recovering.store(false, Ordering::SeqCst);
            Ok(true)
        }
        .boxed()
    }

    fn is_recovering(&self) -> anyhow::Result<bool> {
        Ok(self.state.recovering.load(Ordering::SeqCst))
    }

    fn attempt_count(&self) -> anyhow::Result<u32> {
        Ok(self.state.attempts.load(Ordering::SeqCst))
    }
}

/// Run the scenario and return the final diagnostics. Every event is
/// printed to stdout as one JSON line.
pub async fn run(config: WatchdogConfig, options: SimulateOptions) -> Result<DiagnosticsSnapshot> {
    let host = SimulatedHost::default();
    let watchdog = Watchdog::new(config, host.collaborators())?;

    let mut events = watchdog.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!("Failed to encode event: {}", e),
            }
        }
    });

    let app_runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    watchdog.start_on(app_runtime.handle(), &tokio::runtime::Handle::current());

    watchdog.lifecycle(LifecycleEvent::LoginStarted);
    host.login();
    watchdog.lifecycle(LifecycleEvent::LoginSucceeded);
    watchdog.lifecycle(LifecycleEvent::AuthSucceeded);
    watchdog.lifecycle(LifecycleEvent::InitStarted);
    host.begin_init();

    if !options.stuck_login {
        host.state.finish_init();
        watchdog.lifecycle(LifecycleEvent::InitCompleted);
    }

    let (done_tx, done_rx) = oneshot::channel::<()>();
    let (exit_tx, exit_rx) = oneshot::channel::<()>();
    let app_options = options.clone();

    let app_thread = std::thread::Builder::new()
        .name("simulated-app".to_string())
        .spawn(move || {
            app_runtime.block_on(async move {
                tokio::time::sleep(app_options.settle).await;

                tracing::info!("Blocking the app scheduler for {:?}", app_options.stall);
                std::thread::sleep(app_options.stall);
                tokio::time::sleep(app_options.settle).await;

                let _ = done_tx.send(());
                let _ = exit_rx.await;
            });
        })?;

    if done_rx.await.is_err() {
        return Err("simulated app exited before finishing".to_string().into());
    }

    // Let a trailing recovery publish its outcome
    tokio::time::sleep(Duration::from_millis(300)).await;
    let snapshot = watchdog.diagnostics_snapshot();
    tracing::info!("{}", watchdog.health_status());

    watchdog.stop();
    let _ = exit_tx.send(());
    tokio::task::spawn_blocking(move || app_thread.join())
        .await
        .map_err(|e| WatchdogError::Other(format!("failed to join app thread: {}", e)))?
        .map_err(|_| WatchdogError::from("simulated app panicked".to_string()))?;

    drop(watchdog);
    printer.abort();

    Ok(snapshot)
}
