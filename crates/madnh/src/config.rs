//! Configuration management for the MadNH session runner.
//!
//! Loads the TOML configuration, creating a default file when none exists,
//! and validates it together with the embedded emitter settings.

use madnh_event_system::EmitterConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

fn default_level() -> String {
    "info".to_string()
}

fn default_buttons() -> usize {
    3
}

fn default_title() -> String {
    "Confirm".to_string()
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Settings shared by every emitter of the session
    #[serde(default)]
    pub emitter: EmitterConfig,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Scripted session settings
    #[serde(default)]
    pub session: SessionSettings,
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            json_format: false,
        }
    }
}

/// Shape of the scripted dialog session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Number of dialog buttons; the last one closes the dialog
    #[serde(default = "default_buttons")]
    pub buttons: usize,
    /// Deliver follower notices synchronously instead of through the scheduler
    #[serde(default)]
    pub hard_attach: bool,
    /// Dialog title carried in the `open` payload
    #[serde(default = "default_title")]
    pub title: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            buttons: default_buttons(),
            hard_attach: false,
            title: default_title(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the
    /// specified path and returns the default configuration.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string describing the issue.
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        if self.session.buttons == 0 {
            return Err("session.buttons must be greater than 0".to_string());
        }

        self.emitter
            .validate()
            .map_err(|e| format!("[emitter] {e}"))
    }
}
