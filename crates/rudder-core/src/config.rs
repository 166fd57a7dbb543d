use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::session::permission::EditMode;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub permissions: PermissionsConfig,

    /// Local slash-command templates keyed by command name.
    #[serde(default)]
    pub commands: BTreeMap<String, CommandTemplate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub inactivity_timeout_ms: u64,
    pub zombie_timeout_ms: u64,
    pub user_batch_window_ms: u64,
    pub user_batch_capacity: usize,
    pub cooldown_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_ms: 45_000,
            zombie_timeout_ms: 600_000,
            user_batch_window_ms: 50,
            user_batch_capacity: 256,
            cooldown_ms: 1_500,
        }
    }
}

impl StreamConfig {
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_ms)
    }

    pub fn zombie_timeout(&self) -> Duration {
        Duration::from_millis(self.zombie_timeout_ms)
    }

    pub fn user_batch_window(&self) -> Duration {
        Duration::from_millis(self.user_batch_window_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub initial_limit: usize,
    pub page_size: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            initial_limit: 100,
            page_size: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    pub default_edit_mode: EditMode,
    pub allowed_edit_modes: Vec<EditMode>,
    /// Permission kinds treated as edits by the `allow` mode.
    pub edit_kinds: Vec<String>,
    pub agents: BTreeMap<String, AgentPermissions>,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            default_edit_mode: EditMode::Ask,
            allowed_edit_modes: EditMode::ALL.to_vec(),
            edit_kinds: ["edit", "write", "patch", "multiedit"]
                .into_iter()
                .map(String::from)
                .collect(),
            agents: BTreeMap::new(),
        }
    }
}

impl PermissionsConfig {
    pub fn is_edit_kind(&self, kind: &str) -> bool {
        self.edit_kinds.iter().any(|k| k.eq_ignore_ascii_case(kind))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentPermissions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_mode: Option<EditMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_edit_modes: Option<Vec<EditMode>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl EngineConfig {
    /// Get the path to the config file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            Error::Configuration("Could not determine config directory".to_string())
        })?;
        Ok(config_dir.join("rudder").join("config.toml"))
    }

    /// Load config from disk, or return defaults if not found
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        match toml::from_str(&contents) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!(
                    target: "config",
                    "Failed to parse config file at {:?}: {}. Using defaults.",
                    path,
                    e
                );
                Ok(Self::default())
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
