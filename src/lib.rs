//! Application-health watchdog for single-threaded cooperative schedulers.
//!
//! A [`Watchdog`] detects when the scheduler driving an interactive
//! application stops giving turns to its tasks, reports the stall, and runs
//! a guarded recovery procedure when the stall outlasts a hard threshold.

pub mod clock;
pub mod collaborators;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod liveness;
pub mod recovery;
pub mod watchdog;

pub use clock::{Clock, ManualClock, TokioClock};
pub use collaborators::{
    AuthSource, Collaborators, ErrorKind, ErrorReport, ErrorSink, InitSource, RecoveryHandler,
    Session, Severity, StageStatus, TracingErrorSink,
};
pub use config::WatchdogConfig;
pub use context::ContextSnapshot;
pub use diagnostics::{DiagnosticsSnapshot, FreezeRecord};
pub use error::{Result, WatchdogError};
pub use events::{LifecycleEvent, RecoveryPath, Subscription, WatchdogEvent};
pub use recovery::RecoveryOutcome;
pub use watchdog::{Tick, Watchdog};
