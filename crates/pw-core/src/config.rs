//! Configuration structures for pollwatch.
//!
//! This module provides configuration types for the watch service:
//!
//! - [`Sensitivity`] - How eagerly a registered directory is re-scanned
//! - [`PollingConfig`] - Scan intervals for each sensitivity level
//! - [`ServiceConfig`] - Per-key event bound and background thread names
//! - [`Config`] - Root configuration combining all settings
//!
//! All configuration types implement [`Default`]. Every struct is annotated
//! with `#[serde(default)]`, so a configuration file only needs to name the
//! values it overrides.

use std::time::Duration;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Sensitivity level of a directory registration.
///
/// Higher sensitivity means a shorter interval between directory scans.
/// The concrete interval for each level comes from [`PollingConfig`].
///
/// # Examples
///
/// ```
/// use pw_core::Sensitivity;
///
/// assert_eq!(Sensitivity::default(), Sensitivity::Medium);
/// assert_eq!(Sensitivity::High.label(), "high");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    /// Scan frequently.
    High,
    /// Scan at the default rate.
    #[default]
    Medium,
    /// Scan rarely.
    Low,
}

impl Sensitivity {
    /// Returns the lowercase name of this level.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl std::fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Scan intervals used by the polling backend.
///
/// # Examples
///
/// ```
/// use pw_core::{PollingConfig, Sensitivity};
/// use std::time::Duration;
///
/// let config = PollingConfig::default();
/// assert_eq!(config.interval_for(Sensitivity::High), Duration::from_secs(2));
/// assert_eq!(config.interval_for(Sensitivity::Low), Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Scan interval for [`Sensitivity::High`], in milliseconds.
    pub high_interval_ms: u64,

    /// Scan interval for [`Sensitivity::Medium`], in milliseconds.
    pub medium_interval_ms: u64,

    /// Scan interval for [`Sensitivity::Low`], in milliseconds.
    pub low_interval_ms: u64,

    /// Level used when a registration carries no sensitivity modifier.
    pub default_sensitivity: Sensitivity,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            high_interval_ms: 2_000,
            medium_interval_ms: 10_000,
            low_interval_ms: 30_000,
            default_sensitivity: Sensitivity::Medium,
        }
    }
}

impl PollingConfig {
    /// Creates a configuration that uses the same interval for every level.
    ///
    /// Mostly useful for tests and tools that want fast, uniform scanning.
    #[must_use]
    pub const fn uniform(interval: Duration) -> Self {
        #[allow(clippy::cast_possible_truncation)] // intervals beyond u64 millis are not meaningful
        let ms = interval.as_millis() as u64;
        Self {
            high_interval_ms: ms,
            medium_interval_ms: ms,
            low_interval_ms: ms,
            default_sensitivity: Sensitivity::Medium,
        }
    }

    /// Returns the scan interval for the given sensitivity level.
    #[must_use]
    pub const fn interval_for(&self, sensitivity: Sensitivity) -> Duration {
        let ms = match sensitivity {
            Sensitivity::High => self.high_interval_ms,
            Sensitivity::Medium => self.medium_interval_ms,
            Sensitivity::Low => self.low_interval_ms,
        };
        Duration::from_millis(ms)
    }

    /// Checks that every interval is non-zero.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOption`] naming the first zero interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (option, value) in [
            ("polling.high_interval_ms", self.high_interval_ms),
            ("polling.medium_interval_ms", self.medium_interval_ms),
            ("polling.low_interval_ms", self.low_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid_option(option, "must be positive"));
            }
        }
        Ok(())
    }
}

/// Settings for the watch service machinery shared by all backends.
///
/// # Examples
///
/// ```
/// use pw_core::ServiceConfig;
///
/// let config = ServiceConfig::default();
/// assert_eq!(config.max_event_list_size, 512);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Maximum number of pending events a key holds before it collapses
    /// them into a single overflow event.
    pub max_event_list_size: usize,

    /// Name given to the thread that processes register/cancel/close
    /// requests.
    pub poller_thread_name: String,

    /// Name given to the thread that runs periodic directory scans.
    pub scheduler_thread_name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_event_list_size: 512,
            poller_thread_name: "pollwatch-poller".to_owned(),
            scheduler_thread_name: "pollwatch-scheduler".to_owned(),
        }
    }
}

impl ServiceConfig {
    /// Checks that the event bound is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOption`] if `max_event_list_size` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_event_list_size == 0 {
            return Err(ConfigError::invalid_option(
                "service.max_event_list_size",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Root configuration for pollwatch.
///
/// # Examples
///
/// ```
/// use pw_core::Config;
///
/// let config = Config::from_json_str(r#"{"polling": {"high_interval_ms": 500}}"#).unwrap();
/// assert_eq!(config.polling.high_interval_ms, 500);
/// assert_eq!(config.service.max_event_list_size, 512);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Polling backend configuration.
    pub polling: PollingConfig,

    /// Shared service configuration.
    pub service: ServiceConfig,
}

impl Config {
    /// Parses and validates a configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON and
    /// [`ConfigError::InvalidOption`] for out-of-range values.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses, and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise the
    /// same errors as [`Config::from_json_str`].
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|source| ConfigError::io(path, source))?;
        Self::from_json_str(&contents)
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::InvalidOption`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.polling.validate()?;
        self.service.validate()
    }
}
