//! Engine configuration.
//!
//! # Responsibility
//! - Hold tunables for trigger compilation, geofence re-entry throttling and
//!   notification presentation.
//! - Parse JSON configuration supplied by the host app.
//!
//! # Invariants
//! - Every field has a default; an empty JSON object is a valid config.
//! - Unknown fields are rejected so typos do not silently fall back.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;

/// Default geofence radius in meters.
pub const DEFAULT_GEOFENCE_RADIUS_M: f64 = 100.0;
/// Default notification title, shared by time and location reminders.
pub const DEFAULT_NOTIFICATION_TITLE: &str = "Reminder";

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    InvalidRadius(f64),
    EmptyTitle,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read config: {err}"),
            Self::Parse(err) => write!(f, "invalid config JSON: {err}"),
            Self::InvalidRadius(value) => {
                write!(f, "geofence_radius_m must be finite and > 0, got {value}")
            }
            Self::EmptyTitle => write!(f, "notification.title must not be empty"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            _ => None,
        }
    }
}

/// How a delivered notification is presented while the app is foregrounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotificationConfig {
    pub title: String,
    pub show_alert: bool,
    pub play_sound: bool,
    pub set_badge: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            title: DEFAULT_NOTIFICATION_TITLE.to_string(),
            show_alert: true,
            play_sound: true,
            set_badge: true,
        }
    }
}

/// Engine tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Radius of every location trigger.
    pub geofence_radius_m: f64,
    /// Minimum spacing between two arrival notifications for one task.
    /// `None` notifies on every entry.
    pub min_reentry_interval_ms: Option<u64>,
    /// Turns past-due creation into a validation error instead of a stored
    /// task without a time trigger.
    pub reject_past_due_on_create: bool,
    pub notification: NotificationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            geofence_radius_m: DEFAULT_GEOFENCE_RADIUS_M,
            min_reentry_interval_ms: None,
            reject_past_due_on_create: false,
            notification: NotificationConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parses and validates a JSON config document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(raw).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.geofence_radius_m.is_finite() || self.geofence_radius_m <= 0.0 {
            return Err(ConfigError::InvalidRadius(self.geofence_radius_m));
        }
        if self.notification.title.trim().is_empty() {
            return Err(ConfigError::EmptyTitle);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, EngineConfig, DEFAULT_GEOFENCE_RADIUS_M};

    #[test]
    fn empty_object_yields_defaults() {
        let config = EngineConfig::from_json_str("{}").expect("empty config");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.geofence_radius_m, DEFAULT_GEOFENCE_RADIUS_M);
        assert_eq!(config.min_reentry_interval_ms, None);
        assert!(config.notification.play_sound);
    }

    #[test]
    fn partial_notification_block_keeps_other_defaults() {
        let config =
            EngineConfig::from_json_str(r#"{"notification": {"play_sound": false}}"#).unwrap();
        assert!(!config.notification.play_sound);
        assert_eq!(config.notification.title, "Reminder");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = EngineConfig::from_json_str(r#"{"radius": 50}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn non_positive_radius_is_rejected() {
        let err = EngineConfig::from_json_str(r#"{"geofence_radius_m": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRadius(_)));
    }

    #[test]
    fn load_reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{"min_reentry_interval_ms": 60000}"#).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.min_reentry_interval_ms, Some(60_000));
    }
}
