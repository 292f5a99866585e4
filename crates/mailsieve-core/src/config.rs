//! Persistent settings.
//!
//! Stored as JSON at `<config dir>/mailsieve/settings.json`. Every field has a
//! default, so a missing file or an empty `{}` yields a working setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{Error, Result};

/// Top-level settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Incremental sync.
    pub sync: SyncSettings,
    /// Triage decisions.
    pub triage: TriageSettings,
    /// Classifier backend.
    pub arbiter: ArbiterConfig,
    /// Daily classification budget.
    pub budget: BudgetSettings,
    /// Snooze sweep.
    pub snooze: SnoozeSettings,
    /// Database file; defaults to `<data dir>/mailsieve/mailsieve.db`.
    pub database_path: Option<PathBuf>,
}

impl Settings {
    /// Default settings file location.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mailsieve").join("settings.json"))
    }

    /// Load settings, returning defaults if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&raw)?;
        settings.validate()?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Write settings as pretty JSON, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Database location, resolving the default.
    ///
    /// # Errors
    ///
    /// Returns an error if no path is configured and the platform has no
    /// data directory.
    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.database_path {
            return Ok(path.clone());
        }
        dirs::data_dir()
            .map(|dir| dir.join("mailsieve").join("mailsieve.db"))
            .ok_or_else(|| Error::Config("no data directory; set database_path".to_string()))
    }

    /// Reject values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.sync.batch_size == 0 {
            return Err(Error::Config("sync.batch_size must be positive".to_string()));
        }
        if self.sync.max_messages == 0 {
            return Err(Error::Config("sync.max_messages must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.triage.confidence_threshold) {
            return Err(Error::Config(
                "triage.confidence_threshold must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Incremental sync settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Mailbox synced by the daemon.
    pub folder: String,
    /// Hard cap on UIDs considered per sync.
    pub max_messages: usize,
    /// UIDs fetched and stored per batch.
    pub batch_size: usize,
    /// Window of the first sync of a folder, in days.
    pub lookback_days: u32,
    /// Pause between batches, in milliseconds.
    pub batch_pause_ms: u64,
    /// Idle sessions older than this are closed, in seconds.
    pub session_idle_secs: u64,
    /// How often idle sessions are looked for, in seconds.
    pub eviction_interval_secs: u64,
    /// Interval of the daemon's sync loop, in seconds.
    pub poll_interval_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            folder: "INBOX".to_string(),
            max_messages: 2000,
            batch_size: 500,
            lookback_days: 30,
            batch_pause_ms: 250,
            session_idle_secs: 600,
            eviction_interval_secs: 60,
            poll_interval_secs: 300,
        }
    }
}

impl SyncSettings {
    /// Pause between batches.
    #[must_use]
    pub const fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    /// Session idle TTL.
    #[must_use]
    pub const fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }
}

/// Triage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageSettings {
    /// Minimum confidence before a decision is applied.
    pub confidence_threshold: f64,
    /// Training examples given to the classifier.
    pub training_examples: u32,
}

impl Default for TriageSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.8,
            training_examples: 10,
        }
    }
}

/// Which completion backend arbitrates classifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArbiterConfig {
    /// Hosted, OpenAI-compatible chat completions. The API key comes from
    /// the credential store.
    Remote {
        /// Base URL, e.g. `https://api.openai.com`.
        endpoint: String,
        /// Model name.
        model: String,
        /// Response token cap.
        max_tokens: u32,
    },
    /// Local Ollama server.
    Local {
        /// Base URL.
        endpoint: String,
        /// Model name.
        model: String,
    },
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self::Local {
            endpoint: "http://localhost:11434".to_string(),
            model: "llama3.2:3b".to_string(),
        }
    }
}

/// Daily classification budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetSettings {
    /// Emails classified per day; `None` is unlimited.
    pub daily_email_limit: Option<u64>,
    /// Estimated tokens per day; `None` is unlimited.
    pub daily_token_limit: Option<u64>,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            daily_email_limit: Some(500),
            daily_token_limit: None,
        }
    }
}

/// Snooze sweep settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnoozeSettings {
    /// How often due snoozes are woken, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for SnoozeSettings {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_is_all_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.sync.max_messages, 2000);
        assert_eq!(settings.sync.batch_size, 500);
        assert_eq!(settings.sync.lookback_days, 30);
        assert_eq!(settings.budget.daily_email_limit, Some(500));
    }

    #[test]
    fn test_arbiter_is_tagged() {
        let json = r#"{"arbiter": {"kind": "remote", "endpoint": "https://api.example.com", "model": "m", "max_tokens": 256}}"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert!(matches!(settings.arbiter, ArbiterConfig::Remote { max_tokens: 256, .. }));
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"sync": {"batch_size": 50}}"#).unwrap();
        assert_eq!(settings.sync.batch_size, 50);
        assert_eq!(settings.sync.max_messages, 2000);
    }

    #[test]
    fn test_save_then_load() {
        let dir = std::env::temp_dir().join(format!("mailsieve-settings-{}", std::process::id()));
        let path = dir.join("settings.json");

        let mut settings = Settings::default();
        settings.triage.confidence_threshold = 0.6;
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded, settings);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_missing_file_is_default() {
        let path = Path::new("/nonexistent/mailsieve/settings.json");
        assert_eq!(Settings::load(path).unwrap(), Settings::default());
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut settings = Settings::default();
        settings.triage.confidence_threshold = 1.5;
        assert!(matches!(settings.validate(), Err(Error::Config(_))));
    }
}
