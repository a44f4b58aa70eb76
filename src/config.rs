use crate::error::{Result, WatchdogError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Bounds for the checker cadence in milliseconds
const MIN_CHECK_INTERVAL_MS: u64 = 10;
const MAX_CHECK_INTERVAL_MS: u64 = 60_000;

/// Upper bound for the generic-path recovery delay
const MAX_GENERIC_RECOVERY_DELAY_MS: u64 = 10_000;

/// Watchdog configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Checker cadence in milliseconds
    pub check_interval_ms: u64,
    /// Stall length after which the scheduler is considered frozen
    pub freeze_timeout_ms: u64,
    /// Stall length after which recovery is attempted
    pub hard_timeout_ms: u64,
    /// Delay before the generic recovery path nudges the UI
    pub generic_recovery_delay_ms: u64,
    /// Probe reschedule delay (1 ms mirrors a zero-delay timer's floor)
    pub probe_interval_ms: u64,
    /// Buffered events per subscriber before lagging
    pub event_capacity: usize,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 2_000,
            freeze_timeout_ms: 5_000,
            hard_timeout_ms: 8_000,
            generic_recovery_delay_ms: 100,
            probe_interval_ms: 1,
            event_capacity: 64,
            log_level: "info".to_string(),
        }
    }
}

impl WatchdogConfig {
    /// Load configuration from the default file or fall back to defaults
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Self::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.check_interval_ms < MIN_CHECK_INTERVAL_MS
            || self.check_interval_ms > MAX_CHECK_INTERVAL_MS
        {
            return Err(WatchdogError::ConfigError(format!(
                "check_interval_ms must be between {} and {}, got {}",
                MIN_CHECK_INTERVAL_MS, MAX_CHECK_INTERVAL_MS, self.check_interval_ms
            )));
        }

        if self.freeze_timeout_ms < self.check_interval_ms {
            return Err(WatchdogError::ConfigError(format!(
                "freeze_timeout_ms ({}) must not be shorter than check_interval_ms ({})",
                self.freeze_timeout_ms, self.check_interval_ms
            )));
        }

        if self.hard_timeout_ms <= self.freeze_timeout_ms {
            return Err(WatchdogError::ConfigError(format!(
                "hard_timeout_ms ({}) must exceed freeze_timeout_ms ({})",
                self.hard_timeout_ms, self.freeze_timeout_ms
            )));
        }

        if self.probe_interval_ms >= self.check_interval_ms {
            return Err(WatchdogError::ConfigError(format!(
                "probe_interval_ms ({}) must be shorter than check_interval_ms ({})",
                self.probe_interval_ms, self.check_interval_ms
            )));
        }

        if self.generic_recovery_delay_ms > MAX_GENERIC_RECOVERY_DELAY_MS {
            return Err(WatchdogError::ConfigError(format!(
                "generic_recovery_delay_ms must be at most {}, got {}",
                MAX_GENERIC_RECOVERY_DELAY_MS, self.generic_recovery_delay_ms
            )));
        }

        if self.event_capacity == 0 {
            return Err(WatchdogError::ConfigError(
                "event_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path()?)
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;

        Ok(())
    }

    /// Get the config file path
    pub fn config_file_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            WatchdogError::ConfigError("Could not find config directory".to_string())
        })?;

        Ok(config_dir.join("hangwatch").join("config.json"))
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn generic_recovery_delay(&self) -> Duration {
        Duration::from_millis(self.generic_recovery_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WatchdogConfig::default();
        assert_eq!(config.check_interval_ms, 2_000);
        assert_eq!(config.freeze_timeout_ms, 5_000);
        assert_eq!(config.hard_timeout_ms, 8_000);
        assert_eq!(config.generic_recovery_delay_ms, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_check_interval() {
        let mut config = WatchdogConfig::default();

        config.check_interval_ms = 9;
        assert!(config.validate().is_err());

        config.check_interval_ms = 60_001;
        assert!(config.validate().is_err());

        config.check_interval_ms = 10;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_threshold_ordering() {
        let mut config = WatchdogConfig::default();

        // Hard threshold must be strictly later than the freeze threshold
        config.hard_timeout_ms = config.freeze_timeout_ms;
        assert!(config.validate().is_err());

        config.hard_timeout_ms = config.freeze_timeout_ms + 1;
        assert!(config.validate().is_ok());

        // Freeze threshold shorter than one check period can never be observed in time
        config.freeze_timeout_ms = config.check_interval_ms - 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_probe_and_capacity() {
        let mut config = WatchdogConfig::default();

        config.probe_interval_ms = config.check_interval_ms;
        assert!(config.validate().is_err());

        config.probe_interval_ms = 0;
        assert!(config.validate().is_ok());

        config.event_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_generic_delay() {
        let mut config = WatchdogConfig::default();
        config.generic_recovery_delay_ms = 10_001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = WatchdogConfig::default();
        config.check_interval_ms = 500;
        config.freeze_timeout_ms = 1_500;
        config.hard_timeout_ms = 3_000;
        config.save_to(&path).unwrap();

        let loaded = WatchdogConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "hard_timeout_ms": 9000 }"#).unwrap();

        let loaded = WatchdogConfig::load_from(&path).unwrap();
        assert_eq!(loaded.hard_timeout_ms, 9_000);
        assert_eq!(loaded.check_interval_ms, 2_000);
    }

    #[test]
    fn test_invalid_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "hard_timeout_ms": 4000 }"#).unwrap();

        assert!(matches!(
            WatchdogConfig::load_from(&path),
            Err(WatchdogError::ConfigError(_))
        ));
    }
}
