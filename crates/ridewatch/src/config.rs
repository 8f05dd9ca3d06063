//! Application configuration for ridewatch.
//!
//! This is the operator-facing layer (timings, storage location, sync
//! endpoint). Per-trip settings arrive as a [`TripConfig`](crate::TripConfig)
//! from the surrounding application instead.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// File looked up inside the config directory.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Directory name under the platform config and data roots.
const DATA_DIR_NAME: &str = "ridewatch";

/// Trip store file inside the data directory.
const DATABASE_FILE_NAME: &str = "trips.db";

/// Prefix for environment overrides.
const ENV_PREFIX: &str = "RIDEWATCH_";

/// Operator settings for the monitor.
///
/// Later layers win: built-in defaults, then `~/.config/ridewatch/config.toml`,
/// then `RIDEWATCH_`-prefixed environment variables (`RIDEWATCH_SYNC__ENDPOINT`
/// sets `sync.endpoint`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where trip snapshots live.
    pub storage: StorageConfig,
    /// Evaluator timings.
    pub monitor: MonitorConfig,
    /// Sync transport configuration.
    pub sync: SyncConfig,
}

/// Trip store location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file; `~/.local/share/ridewatch/trips.db` when unset.
    pub database_path: Option<PathBuf>,
}

/// Evaluator timings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between inactivity evaluations.
    pub stop_check_interval_secs: u64,
    /// Seconds between proximity evaluations.
    pub proximity_check_interval_secs: u64,
    /// Minimum seconds between two reminders of the same stop episode.
    pub reminder_gap_secs: u64,
    /// Minutes past the stop threshold before escalating.
    pub escalation_grace_minutes: u64,
    /// Capacity of the position channel between the location source and the pipeline.
    pub position_buffer: usize,
}

/// Sync transport configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL of the internet sync endpoint (`POST {endpoint}/sync`).
    pub endpoint: Option<String>,
    /// Timeout of one internet attempt in milliseconds.
    pub request_timeout_ms: u64,
    /// Timeout of one peer exchange in milliseconds.
    pub p2p_timeout_ms: u64,
    /// Extra attempts within one tick after a failure.
    pub max_retries: u32,
    /// First retry delay in milliseconds; doubles per attempt.
    pub backoff_base_ms: u64,
    /// Upper bound for the retry delay in milliseconds.
    pub backoff_max_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            stop_check_interval_secs: 60,
            proximity_check_interval_secs: 60,
            reminder_gap_secs: 60,
            escalation_grace_minutes: 5,
            position_buffer: 64,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            request_timeout_ms: 5_000,
            p2p_timeout_ms: 2_000,
            max_retries: 2,
            backoff_base_ms: 250,
            backoff_max_ms: 4_000,
        }
    }
}

impl Config {
    /// Load from the default file and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load using `config_path` instead of the default file when given.
    /// A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let file = config_path.unwrap_or_else(Self::default_config_path);
        let loaded: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(&file).nested())
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// `<config dir>/ridewatch/config.toml`.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// `<local data dir>/ridewatch`.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Reject settings the monitor cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error if any interval, timeout or buffer is zero, or the
    /// backoff bounds are inverted.
    pub fn validate(&self) -> Result<()> {
        let non_zero = [
            (
                "monitor.stop_check_interval_secs",
                self.monitor.stop_check_interval_secs,
            ),
            (
                "monitor.proximity_check_interval_secs",
                self.monitor.proximity_check_interval_secs,
            ),
            ("monitor.position_buffer", self.monitor.position_buffer as u64),
            ("sync.request_timeout_ms", self.sync.request_timeout_ms),
            ("sync.p2p_timeout_ms", self.sync.p2p_timeout_ms),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(Error::ConfigValidation {
                    message: format!("{name} must be greater than 0"),
                });
            }
        }

        if self.sync.backoff_base_ms > self.sync.backoff_max_ms {
            return Err(Error::ConfigValidation {
                message: format!(
                    "sync.backoff_base_ms ({}) cannot be greater than sync.backoff_max_ms ({})",
                    self.sync.backoff_base_ms, self.sync.backoff_max_ms
                ),
            });
        }

        if let Some(endpoint) = &self.sync.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(Error::ConfigValidation {
                    message: format!("sync.endpoint must be an http(s) URL: {endpoint}"),
                });
            }
        }

        Ok(())
    }

    /// The configured trip store, or the one in the data directory.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Interval of the inactivity ticker.
    #[must_use]
    pub fn stop_check_interval(&self) -> Duration {
        Duration::from_secs(self.monitor.stop_check_interval_secs)
    }

    /// Interval of the proximity ticker.
    #[must_use]
    pub fn proximity_check_interval(&self) -> Duration {
        Duration::from_secs(self.monitor.proximity_check_interval_secs)
    }

    /// Minimum spacing between reminders.
    #[must_use]
    pub fn reminder_gap(&self) -> Duration {
        Duration::from_secs(self.monitor.reminder_gap_secs)
    }

    /// Time past the stop threshold before escalating.
    #[must_use]
    pub fn escalation_grace(&self) -> Duration {
        Duration::from_secs(self.monitor.escalation_grace_minutes.saturating_mul(60))
    }

    /// Timeout of one internet sync attempt.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.sync.request_timeout_ms)
    }

    /// Timeout of one peer exchange.
    #[must_use]
    pub fn p2p_timeout(&self) -> Duration {
        Duration::from_millis(self.sync.p2p_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn invalid(edit: impl FnOnce(&mut Config)) -> String {
        let mut config = Config::default();
        edit(&mut config);
        config.validate().unwrap_err().to_string()
    }

    #[test]
    fn test_defaults_match_documented_timings() {
        let defaults = Config::default();
        assert!(defaults.validate().is_ok());
        assert!(defaults.storage.database_path.is_none());
        assert!(defaults.sync.endpoint.is_none());
        assert_eq!(defaults.monitor.position_buffer, 64);
        assert_eq!(defaults.sync.max_retries, 2);
        assert_eq!(defaults.stop_check_interval(), Duration::from_secs(60));
        assert_eq!(defaults.proximity_check_interval(), Duration::from_secs(60));
        assert_eq!(defaults.reminder_gap(), Duration::from_secs(60));
        assert_eq!(defaults.escalation_grace(), Duration::from_secs(300));
        assert_eq!(defaults.request_timeout(), Duration::from_millis(5_000));
        assert_eq!(defaults.p2p_timeout(), Duration::from_millis(2_000));
    }

    #[test]
    fn test_rejects_zero_intervals() {
        let err = invalid(|c| c.monitor.stop_check_interval_secs = 0);
        assert!(err.contains("stop_check_interval_secs"));
        let err = invalid(|c| c.monitor.position_buffer = 0);
        assert!(err.contains("position_buffer"));
        let err = invalid(|c| c.sync.request_timeout_ms = 0);
        assert!(err.contains("request_timeout_ms"));
    }

    #[test]
    fn test_rejects_inverted_backoff() {
        let err = invalid(|c| c.sync.backoff_base_ms = 10_000);
        assert!(err.contains("backoff_base_ms"));
    }

    #[test]
    fn test_endpoint_must_be_http() {
        let err = invalid(|c| c.sync.endpoint = Some("ftp://example.com".to_string()));
        assert!(err.contains("sync.endpoint"));

        let mut config = Config::default();
        config.sync.endpoint = Some("https://example.com/api".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_trip_store_location() {
        let fallback = Config::default().database_path();
        assert_eq!(fallback.file_name().unwrap(), DATABASE_FILE_NAME);

        let mut config = Config::default();
        config.storage.database_path = Some(PathBuf::from("/srv/ridewatch/trips.sqlite"));
        assert_eq!(
            config.database_path(),
            Path::new("/srv/ridewatch/trips.sqlite")
        );
    }

    #[test]
    fn test_config_file_location() {
        let path = Config::default_config_path();
        assert!(path.ends_with("ridewatch/config.toml"));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(Some(dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[monitor]\nstop_check_interval_secs = 30\n\n[sync]\nendpoint = \"http://localhost:8080\"\n",
        )
        .unwrap();

        let config = Config::load_from(Some(path)).unwrap();
        assert_eq!(config.monitor.stop_check_interval_secs, 30);
        assert_eq!(config.monitor.proximity_check_interval_secs, 60);
        assert_eq!(config.sync.endpoint.as_deref(), Some("http://localhost:8080"));
    }

    #[test]
    fn test_invalid_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[sync]\np2p_timeout_ms = 0\n").unwrap();

        let err = Config::load_from(Some(path)).unwrap_err();
        assert!(matches!(err, Error::ConfigValidation { .. }));
        assert!(err.to_string().contains("p2p_timeout_ms"));
    }

    #[test]
    fn test_partial_monitor_section() {
        let monitor: MonitorConfig = serde_json::from_str(r#"{"reminder_gap_secs": 120}"#).unwrap();
        assert_eq!(monitor.reminder_gap_secs, 120);
        assert_eq!(monitor.stop_check_interval_secs, 60);
    }
}
