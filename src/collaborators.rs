//! Narrow interfaces to the host application's subsystems.
//!
//! The watchdog only reads status from auth and initialization, asks the
//! recovery handler to act, and funnels failures into an error sink. All
//! query methods are synchronous and must not block.

use futures_util::future::BoxFuture;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Session details exposed by the auth subsystem
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub user_id: Option<String>,
}

pub trait AuthSource: Send + Sync {
    fn is_authenticated(&self) -> anyhow::Result<bool>;
    fn current_session(&self) -> anyhow::Result<Session>;
    /// Drop half-finished login state so a recovery attempt starts clean
    fn reset_transient_state(&self) -> anyhow::Result<()>;
}

/// Status of a single initialization stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum StageStatus {
    Pending,
    Running,
    Success,
    Failed(String),
}

pub trait InitSource: Send + Sync {
    fn is_in_progress(&self) -> anyhow::Result<bool>;
    fn stage_states(&self) -> anyhow::Result<BTreeMap<String, StageStatus>>;
}

pub trait RecoveryHandler: Send + Sync {
    /// Attempt to unstick the login/initialization sequence for `user_id`.
    /// Resolves to `true` when the handler believes the app is usable again.
    fn attempt_recovery(
        &self,
        user_id: Option<String>,
    ) -> BoxFuture<'static, anyhow::Result<bool>>;
    fn is_recovering(&self) -> anyhow::Result<bool>;
    fn attempt_count(&self) -> anyhow::Result<u32>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Recovery,
    Initialization,
    Unclassified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A failure forwarded to the host's error reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub message: String,
    pub details: serde_json::Value,
    pub source: String,
    pub retryable: bool,
    pub cause: Option<String>,
}

pub trait ErrorSink: Send + Sync {
    fn report(&self, report: ErrorReport);
}

/// Default sink: logs every report through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, report: ErrorReport) {
        let cause = report.cause.as_deref().unwrap_or("-");
        match report.severity {
            Severity::Critical | Severity::High => tracing::error!(
                kind = ?report.kind,
                source = %report.source,
                retryable = report.retryable,
                "{} (cause: {})",
                report.message,
                cause
            ),
            Severity::Medium => tracing::warn!(
                kind = ?report.kind,
                source = %report.source,
                retryable = report.retryable,
                "{} (cause: {})",
                report.message,
                cause
            ),
            Severity::Low => tracing::info!(
                kind = ?report.kind,
                source = %report.source,
                retryable = report.retryable,
                "{} (cause: {})",
                report.message,
                cause
            ),
        }
    }
}

/// Everything the watchdog needs from its host
#[derive(Clone)]
pub struct Collaborators {
    pub auth: Arc<dyn AuthSource>,
    pub init: Arc<dyn InitSource>,
    pub recovery: Arc<dyn RecoveryHandler>,
    pub errors: Arc<dyn ErrorSink>,
}

impl Collaborators {
    /// Reports go to [`TracingErrorSink`] unless replaced
    pub fn new(
        auth: Arc<dyn AuthSource>,
        init: Arc<dyn InitSource>,
        recovery: Arc<dyn RecoveryHandler>,
    ) -> Self {
        Self {
            auth,
            init,
            recovery,
            errors: Arc::new(TracingErrorSink),
        }
    }

    pub fn with_error_sink(mut self, errors: Arc<dyn ErrorSink>) -> Self {
        self.errors = errors;
        self
    }
}
