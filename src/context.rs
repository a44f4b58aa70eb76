use crate::collaborators::{AuthSource, InitSource, RecoveryHandler, StageStatus};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthContext {
    pub authenticated: bool,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InitContext {
    pub started: bool,
    pub complete: bool,
    pub state_by_stage: BTreeMap<String, StageStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryContext {
    pub in_progress: bool,
    pub attempts: u32,
}

/// Point-in-time view of the host's auth, init and recovery status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContextSnapshot {
    pub auth: AuthContext,
    pub init: InitContext,
    pub recovery: RecoveryContext,
}

impl ContextSnapshot {
    /// Logged in but initialization has not finished
    pub fn is_stuck_after_login(&self) -> bool {
        self.auth.authenticated && !self.init.complete
    }
}

/// Builds `ContextSnapshot`s. Each query is isolated: a failing collaborator
/// only degrades its own part of the snapshot to the default.
#[derive(Clone)]
pub struct ContextProvider {
    auth: Arc<dyn AuthSource>,
    init: Arc<dyn InitSource>,
    recovery: Arc<dyn RecoveryHandler>,
}

impl ContextProvider {
    pub fn new(
        auth: Arc<dyn AuthSource>,
        init: Arc<dyn InitSource>,
        recovery: Arc<dyn RecoveryHandler>,
    ) -> Self {
        Self {
            auth,
            init,
            recovery,
        }
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            auth: self.auth_context(),
            init: self.init_context(),
            recovery: self.recovery_context(),
        }
    }

    fn auth_context(&self) -> AuthContext {
        let read = || -> anyhow::Result<AuthContext> {
            let authenticated = self.auth.is_authenticated()?;
            // A missing session only loses the user id, not the auth flag
            let user_id = match self.auth.current_session() {
                Ok(session) => session.user_id,
                Err(e) => {
                    tracing::debug!("Session lookup failed: {}", e);
                    None
                }
            };
            Ok(AuthContext {
                authenticated,
                user_id,
            })
        };

        read().unwrap_or_else(|e| {
            tracing::debug!("Auth status unavailable, assuming logged out: {}", e);
            AuthContext::default()
        })
    }

    fn init_context(&self) -> InitContext {
        let read = || -> anyhow::Result<InitContext> {
            let in_progress = self.init.is_in_progress()?;
            let state_by_stage = self.init.stage_states()?;

            let started = in_progress
                || state_by_stage
                    .values()
                    .any(|status| *status != StageStatus::Pending);
            let complete = !in_progress
                && !state_by_stage.is_empty()
                && state_by_stage
                    .values()
                    .all(|status| *status == StageStatus::Success);

            Ok(InitContext {
                started,
                complete,
                state_by_stage,
            })
        };

        read().unwrap_or_else(|e| {
            tracing::debug!("Init status unavailable, assuming not started: {}", e);
            InitContext::default()
        })
    }

    fn recovery_context(&self) -> RecoveryContext {
        let read = || -> anyhow::Result<RecoveryContext> {
            Ok(RecoveryContext {
                in_progress: self.recovery.is_recovering()?,
                attempts: self.recovery.attempt_count()?,
            })
        };

        read().unwrap_or_else(|e| {
            tracing::debug!("Recovery status unavailable: {}", e);
            RecoveryContext::default()
        })
    }
}


#[cfg(test)]
mod tests {
    use super::fakes::Fakes;
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_snapshot_of_stuck_login() {
        let fakes = Fakes::stuck_login("user-7");
        let snapshot = fakes.provider().snapshot();

        assert!(snapshot.auth.authenticated);
        assert_eq!(snapshot.auth.user_id.as_deref(), Some("user-7"));
        assert!(snapshot.init.started);
        assert!(!snapshot.init.complete);
        assert_eq!(snapshot.init.state_by_stage.len(), 2);
        assert!(snapshot.is_stuck_after_login());
    }

    #[test]
    fn test_auth_failure_degrades_to_logged_out() {
        let fakes = Fakes::stuck_login("user-7");
        fakes.auth.fail.store(true, Ordering::SeqCst);

        let snapshot = fakes.provider().snapshot();
        assert!(!snapshot.auth.authenticated);
        assert_eq!(snapshot.auth.user_id, None);
        // Other parts are unaffected
        assert!(snapshot.init.started);
        assert!(!snapshot.is_stuck_after_login());
    }

    #[test]
    fn test_init_failure_degrades_to_not_started() {
        let fakes = Fakes::stuck_login("user-7");
        fakes.init.fail.store(true, Ordering::SeqCst);

        let snapshot = fakes.provider().snapshot();
        assert_eq!(snapshot.init, InitContext::default());
        assert!(snapshot.auth.authenticated);
    }

    #[test]
    fn test_recovery_query_failure_degrades() {
        let fakes = Fakes::new();
        fakes.recovery.fail_queries.store(true, Ordering::SeqCst);
        let snapshot = fakes.provider().snapshot();
        assert_eq!(snapshot.recovery, RecoveryContext::default());
    }

    #[test]
    fn test_init_complete_rules() {
        let fakes = Fakes::new();
        let provider = fakes.provider();

        // Empty stage map is never complete
        assert!(!provider.snapshot().init.complete);
        assert!(!provider.snapshot().init.started);

        fakes.init.set_stage("profile", StageStatus::Success);
        fakes.init.set_stage("library", StageStatus::Success);
        assert!(provider.snapshot().init.complete);

        // Still flagged in progress
        fakes.init.in_progress.store(true, Ordering::SeqCst);
        assert!(!provider.snapshot().init.complete);
        fakes.init.in_progress.store(false, Ordering::SeqCst);

        fakes
            .init
            .set_stage("library", StageStatus::Failed("timeout".to_string()));
        let init = provider.snapshot().init;
        assert!(init.started);
        assert!(!init.complete);
    }

    #[test]
    fn test_pending_stages_not_started() {
        let fakes = Fakes::new();
        fakes.init.set_stage("profile", StageStatus::Pending);
        let init = fakes.provider().snapshot().init;
        assert!(!init.started);
        assert!(!init.complete);
    }
}
