//! Settings persisted between runs

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::host::{RunnerConfig, StderrMode};

/// Directory name under the platform config dir
const APP_DIR: &str = "ipa-packager";

/// Settings file name
const SETTINGS_FILE: &str = "settings.toml";

fn default_drain_timeout_ms() -> u64 {
    500
}

/// User settings, stored as TOML
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Packaging script to run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_path: Option<PathBuf>,

    /// Last used project folder
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_dir: Option<PathBuf>,

    /// Last used target name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Last used destination folder
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,

    /// How long to keep reading script output after it exits
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// What to do with the script's stderr
    pub stderr: StderrMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            script_path: None,
            project_dir: None,
            target: None,
            destination: None,
            drain_timeout_ms: default_drain_timeout_ms(),
            stderr: StderrMode::default(),
        }
    }
}

impl Settings {
    /// Default settings file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(SETTINGS_FILE))
    }

    /// Load from `path`. A missing file yields defaults.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "settings file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("invalid settings in {}", path.display()))
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(path, self.to_toml()?)
            .with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("failed to serialize settings")
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
            stderr: self.stderr,
        }
    }
}
