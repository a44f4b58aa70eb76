use thiserror::Error;

/// Main error type for hangwatch
#[derive(Error, Debug)]
pub enum WatchdogError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("Recovery already in progress")]
    RecoveryInProgress,

    #[error("Recovery handler failed: {0}")]
    RecoveryFailed(String),

    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, WatchdogError>;

impl From<anyhow::Error> for WatchdogError {
    fn from(err: anyhow::Error) -> Self {
        WatchdogError::Other(err.to_string())
    }
}

impl From<String> for WatchdogError {
    fn from(msg: String) -> Self {
        WatchdogError::Other(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions_land_in_other() {
        let err: WatchdogError = "simulated app panicked".to_string().into();
        assert!(matches!(err, WatchdogError::Other(ref m) if m == "simulated app panicked"));

        let err: WatchdogError = anyhow::anyhow!("handler gone").into();
        assert_eq!(err.to_string(), "handler gone");
    }
}
