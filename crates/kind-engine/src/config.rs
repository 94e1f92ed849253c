//! Engine configuration storage
//!
//! Handles the tunables of the change scheduler and the task defaults,
//! plus the environment (places, zones) that feeds destination choices.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::constants::defaults;

/// File name of the persisted configuration
pub const CONFIG_FILE: &str = "kind-engine.json";

/// How debounce timers are kept for pending reconciliations
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimerPolicy {
    /// Each connection has its own debounce deadline
    #[default]
    PerConnection,
    /// One deadline for the whole batch, pushed back by every notification
    Shared,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Delay between a notification and the reconciliation it schedules
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Grace period after a write during which echoes are dropped and
    /// endpoint changes deferred
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// Maximum containment steps when looking for a task's pool
    #[serde(default = "default_max_parent_depth")]
    pub max_parent_depth: usize,
    /// Debounce timer policy
    #[serde(default)]
    pub timer_policy: TimerPolicy,
    /// Destination given to tasks that become Movement tasks
    #[serde(default)]
    pub default_destination: Option<String>,
    /// Task names spelled out in an orphaned-unbinding warning
    #[serde(default = "default_orphan_preview_limit")]
    pub orphan_preview_limit: usize,
}

fn default_debounce_ms() -> u64 {
    defaults::DEBOUNCE_MS
}

fn default_cooldown_ms() -> u64 {
    defaults::COOLDOWN_MS
}

fn default_max_parent_depth() -> usize {
    defaults::MAX_PARENT_DEPTH
}

fn default_orphan_preview_limit() -> usize {
    defaults::ORPHAN_PREVIEW_LIMIT
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            cooldown_ms: default_cooldown_ms(),
            max_parent_depth: default_max_parent_depth(),
            timer_policy: TimerPolicy::default(),
            default_destination: None,
            orphan_preview_limit: default_orphan_preview_limit(),
        }
    }
}

impl EngineConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Take the default destination from the environment's first place
    pub fn with_environment(mut self, environment: &Environment) -> Self {
        if let Some(place) = environment.default_destination() {
            self.default_destination = Some(place.to_string());
        }
        self
    }

    /// Load configuration from disk
    ///
    /// A missing file yields the defaults.
    pub async fn load(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config_path = dir.as_ref().join(CONFIG_FILE);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&config_path)
            .await
            .map_err(ConfigError::Io)?;

        serde_json::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save configuration to disk
    pub async fn save(&self, dir: impl AsRef<Path>) -> Result<(), ConfigError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await.map_err(ConfigError::Io)?;

        let config_path = dir.join(CONFIG_FILE);
        let contents = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        fs::write(&config_path, contents)
            .await
            .map_err(ConfigError::Io)?;

        log::info!("Configuration saved to {:?}", config_path);
        Ok(())
    }
}

/// A named location a Movement task can target
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Place {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
}

/// The physical environment a diagram runs in
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Environment {
    #[serde(default)]
    pub places: Vec<Place>,
}

impl Environment {
    /// Parse an environment description
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(ConfigError::Parse)
    }

    /// Place names offered as destinations, in declaration order
    pub fn destinations(&self) -> Vec<&str> {
        self.places.iter().map(|p| p.name.as_str()).collect()
    }

    /// Names of the places inside a zone
    pub fn places_in_zone<'a>(&'a self, zone: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.places
            .iter()
            .filter(move |p| p.zone.as_deref() == Some(zone))
            .map(|p| p.name.as_str())
    }

    pub fn default_destination(&self) -> Option<&str> {
        self.places.first().map(|p| p.name.as_str())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(serde_json::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(serde_json::Error),
}
