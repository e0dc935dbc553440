use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

pub const APP_NAME: &str = "parley";
pub const CONFIG_ENV: &str = "PARLEY_CONFIG";

/// What happens to a send that arrives while a reply is still in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Keep the trigger pending and answer once the current cycle is done.
    #[default]
    Defer,
    /// Ignore the trigger.
    Drop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponderSettings {
    Canned {
        #[serde(default)]
        responses: Option<Vec<String>>,
    },
    Local {
        base_url: String,
        model: String,
        #[serde(default)]
        api_key: Option<String>,
        #[serde(default)]
        system_prompt: Option<String>,
        #[serde(default)]
        temperature: Option<f32>,
    },
}

impl Default for ResponderSettings {
    fn default() -> Self {
        ResponderSettings::Canned { responses: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub stream_responses: bool,
    pub fetch_delay_ms: u64,
    pub reveal_delay_min_ms: u64,
    pub reveal_delay_max_ms: u64,
    pub busy_policy: BusyPolicy,
    pub default_conversations: Vec<String>,
    pub responder: ResponderSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            stream_responses: true,
            fetch_delay_ms: 5000,
            reveal_delay_min_ms: 20,
            reveal_delay_max_ms: 80,
            busy_policy: BusyPolicy::Defer,
            default_conversations: Vec::new(),
            responder: ResponderSettings::default(),
        }
    }
}

impl Settings {
    pub fn fetch_delay(&self) -> Duration {
        Duration::from_millis(self.fetch_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.reveal_delay_min_ms > self.reveal_delay_max_ms {
            bail!(
                "reveal_delay_min_ms ({}) exceeds reveal_delay_max_ms ({})",
                self.reveal_delay_min_ms,
                self.reveal_delay_max_ms
            );
        }
        if let ResponderSettings::Local { base_url, .. } = &self.responder {
            Url::parse(base_url).with_context(|| format!("Invalid base_url: {}", base_url))?;
        }
        Ok(())
    }
}

pub struct SettingsService;

impl SettingsService {
    /// `$PARLEY_CONFIG`, else `$XDG_CONFIG_HOME/parley/settings.json`, else
    /// `$HOME/.config/parley/settings.json`.
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|_| std::env::var("HOME").map(|home| PathBuf::from(home).join(".config")))
            .ok()?;
        Some(config_dir.join(APP_NAME).join("settings.json"))
    }

    /// Load settings, falling back to defaults when the file is missing or
    /// cannot be parsed.
    pub fn load(path: &Path) -> Settings {
        let json = match std::fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) => {
                tracing::debug!("No settings at {}: {}", path.display(), e);
                return Settings::default();
            }
        };
        match serde_json::from_str(&json) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Ignoring invalid settings at {}: {}", path.display(), e);
                Settings::default()
            }
        }
    }

    pub fn save(path: &Path, settings: &Settings) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let json = serde_json::to_string_pretty(settings)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write settings to {}", path.display()))
    }
}
