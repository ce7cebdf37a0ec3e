//! Engine configuration.
//!
//! Resolution order: built-in defaults, then an optional JSON file, then
//! `ADENGINE_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{EngineError, Result};
use crate::frequency::RolloverConfig;
use crate::refresh::SchedulerConfig;

pub const ENV_DATABASE_PATH: &str = "ADENGINE_DATABASE_PATH";
pub const ENV_WARM_SNAPSHOT_PATH: &str = "ADENGINE_WARM_SNAPSHOT_PATH";
pub const ENV_REFRESH_INTERVAL_SECS: &str = "ADENGINE_REFRESH_INTERVAL_SECS";
pub const ENV_ROLLOVER_CHECK_SECS: &str = "ADENGINE_ROLLOVER_CHECK_SECS";
pub const ENV_TRACKING_BASE_URL: &str = "ADENGINE_TRACKING_BASE_URL";
pub const ENV_STORE_TIMEOUT_MS: &str = "ADENGINE_STORE_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// SQLite database file
    pub database_path: PathBuf,
    /// Last good snapshot on local disk; `None` disables it
    pub warm_snapshot_path: Option<PathBuf>,
    /// Seconds between scheduled snapshot reloads
    pub refresh_interval_secs: u64,
    /// Seconds between frequency-cap day rollover checks
    pub rollover_check_secs: u64,
    /// Scheme and host stamped into tracking URLs
    pub tracking_base_url: String,
    /// Bound on background store calls
    pub store_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./var/data/adengine.db"),
            warm_snapshot_path: Some(PathBuf::from("./var/data/snapshot.bin")),
            refresh_interval_secs: 60,
            rollover_check_secs: 60,
            tracking_base_url: "http://localhost:8080".to_string(),
            store_timeout_ms: 2000,
        }
    }
}

impl EngineConfig {
    /// Defaults, overlaid by `path` when given, overlaid by the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| EngineError::Config(format!("invalid {}: {}", path.display(), e)))
    }

    /// Applies overrides from `lookup`, usually the process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_DATABASE_PATH) {
            self.database_path = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_WARM_SNAPSHOT_PATH) {
            self.warm_snapshot_path = if value.is_empty() {
                None
            } else {
                Some(PathBuf::from(value))
            };
        }
        if let Some(value) = lookup(ENV_REFRESH_INTERVAL_SECS) {
            self.refresh_interval_secs = parse_number(ENV_REFRESH_INTERVAL_SECS, &value)?;
        }
        if let Some(value) = lookup(ENV_ROLLOVER_CHECK_SECS) {
            self.rollover_check_secs = parse_number(ENV_ROLLOVER_CHECK_SECS, &value)?;
        }
        if let Some(value) = lookup(ENV_TRACKING_BASE_URL) {
            self.tracking_base_url = value;
        }
        if let Some(value) = lookup(ENV_STORE_TIMEOUT_MS) {
            self.store_timeout_ms = parse_number(ENV_STORE_TIMEOUT_MS, &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.refresh_interval_secs == 0 {
            return Err(EngineError::Config(
                "refresh_interval_secs must be positive".to_string(),
            ));
        }
        if self.rollover_check_secs == 0 {
            return Err(EngineError::Config(
                "rollover_check_secs must be positive".to_string(),
            ));
        }
        if self.store_timeout_ms == 0 {
            return Err(EngineError::Config(
                "store_timeout_ms must be positive".to_string(),
            ));
        }
        if self.tracking_base_url.trim().is_empty() {
            return Err(EngineError::Config(
                "tracking_base_url is required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            refresh_interval: Duration::from_secs(self.refresh_interval_secs),
            enabled: true,
        }
    }

    pub fn rollover(&self) -> RolloverConfig {
        RolloverConfig {
            check_interval: Duration::from_secs(self.rollover_check_secs),
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| EngineError::Config(format!("{} must be a number, got {:?}", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler().refresh_interval, Duration::from_secs(60));
        assert_eq!(config.store_timeout(), Duration::from_millis(2000));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"refresh_interval_secs": 5, "warm_snapshot_path": null}}"#
        )
        .unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.refresh_interval_secs, 5);
        assert_eq!(config.warm_snapshot_path, None);
        assert_eq!(config.rollover_check_secs, 60);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_TRACKING_BASE_URL, "https://ads.example.com"),
            (ENV_WARM_SNAPSHOT_PATH, ""),
            (ENV_ROLLOVER_CHECK_SECS, "15"),
        ]);
        let mut config = EngineConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.tracking_base_url, "https://ads.example.com");
        assert_eq!(config.warm_snapshot_path, None);
        assert_eq!(config.rollover().check_interval, Duration::from_secs(15));
    }

    #[test]
    fn test_bad_number_is_config_error() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_overrides(|key| (key == ENV_STORE_TIMEOUT_MS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = EngineConfig {
            refresh_interval_secs: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_unreadable_file() {
        let err = EngineConfig::from_file(Path::new("/nonexistent/adengine.json")).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
