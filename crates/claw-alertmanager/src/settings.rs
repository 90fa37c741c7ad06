//! Engine settings.
//!
//! Process-level knobs, loaded from TOML. The alerting configuration itself
//! (routes, receivers, templates) is separate JSON handled by
//! [`ConfigManager`](crate::config::ConfigManager).

use std::path::Path;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};

use crate::error::{AlertmanagerError, Result};

/// Settings of the dispatch engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Link back to the alerting UI, exposed to templates as `.ExternalURL`.
    pub external_url: String,
    /// Timeout for a single notifier call.
    pub notify_timeout_secs: u64,
    /// Cap on the output of one template render.
    pub max_template_output_bytes: usize,
    /// How long expired silences are kept before `gc` removes them.
    pub silence_retention_secs: u64,
    /// How long an alert without an end time stays listed after it was last
    /// received.
    pub resolve_timeout_secs: u64,
    /// Name of the receiver in the built-in default configuration.
    pub default_receiver_name: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            external_url: "http://localhost:3000/".to_string(),
            notify_timeout_secs: 30,
            max_template_output_bytes: 1024 * 1024,
            silence_retention_secs: 5 * 24 * 3600,
            resolve_timeout_secs: 300,
            default_receiver_name: "default".to_string(),
        }
    }
}

impl EngineSettings {
    /// Loads settings from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::InvalidConfig` if the file cannot be read,
    /// parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            AlertmanagerError::invalid_config(format!(
                "failed to read settings file '{}': {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Parses settings from TOML. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::InvalidConfig` if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Self = toml::from_str(content)
            .map_err(|e| AlertmanagerError::invalid_config(format!("invalid TOML: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::InvalidConfig` for zero timeouts or limits
    /// and an empty default receiver name.
    pub fn validate(&self) -> Result<()> {
        if self.notify_timeout_secs == 0 {
            return Err(AlertmanagerError::invalid_config(
                "notify_timeout_secs must be positive",
            ));
        }
        if self.resolve_timeout_secs == 0 {
            return Err(AlertmanagerError::invalid_config(
                "resolve_timeout_secs must be positive",
            ));
        }
        if self.max_template_output_bytes == 0 {
            return Err(AlertmanagerError::invalid_config(
                "max_template_output_bytes must be positive",
            ));
        }
        if self.default_receiver_name.is_empty() {
            return Err(AlertmanagerError::invalid_config(
                "default_receiver_name cannot be empty",
            ));
        }
        Ok(())
    }

    /// Timeout for a single notifier call.
    #[must_use]
    pub const fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }

    /// How long an alert without an end time is considered firing.
    #[must_use]
    pub fn resolve_timeout(&self) -> ChronoDuration {
        ChronoDuration::from_std(Duration::from_secs(self.resolve_timeout_secs))
            .unwrap_or_else(|_| ChronoDuration::days(365 * 100))
    }

    /// Retention window for expired silences.
    #[must_use]
    pub fn silence_retention(&self) -> ChronoDuration {
        ChronoDuration::from_std(Duration::from_secs(self.silence_retention_secs))
            .unwrap_or_else(|_| ChronoDuration::days(365 * 100))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = EngineSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.notify_timeout(), Duration::from_secs(30));
        assert_eq!(settings.silence_retention(), ChronoDuration::days(5));
        assert_eq!(settings.resolve_timeout(), ChronoDuration::minutes(5));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let settings = EngineSettings::from_toml(
            r#"
external_url = "https://grafana.example.com/"
notify_timeout_secs = 5
"#,
        )
        .unwrap();
        assert_eq!(settings.external_url, "https://grafana.example.com/");
        assert_eq!(settings.notify_timeout_secs, 5);
        assert_eq!(settings.default_receiver_name, "default");
    }

    #[test]
    fn zero_timeout_rejected() {
        let err = EngineSettings::from_toml("notify_timeout_secs = 0").unwrap_err();
        assert!(matches!(err, AlertmanagerError::InvalidConfig { .. }));
    }

    #[test]
    fn zero_resolve_timeout_rejected() {
        let err = EngineSettings::from_toml("resolve_timeout_secs = 0").unwrap_err();
        assert!(matches!(err, AlertmanagerError::InvalidConfig { .. }));
    }

    #[test]
    fn invalid_toml_rejected() {
        assert!(EngineSettings::from_toml("external_url = ").is_err());
    }

    #[test]
    fn from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("alertmanager.toml");
        std::fs::write(&path, "silence_retention_secs = 60\n").unwrap();
        let settings = EngineSettings::from_file(&path).unwrap();
        assert_eq!(settings.silence_retention(), ChronoDuration::seconds(60));

        assert!(EngineSettings::from_file(dir.path().join("missing.toml")).is_err());
    }
}
