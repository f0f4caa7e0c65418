use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::{shlog_debug, Error, Result};

/// Default number of concurrent sandbox workers.
pub const DEFAULT_WORKERS: usize = 4;
/// Default retry budget for rejected shadow-runs.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default wall-clock timeout for a sandboxed command, in seconds.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 300;
/// Default retry bound for sandbox provisioning failures.
pub const DEFAULT_PROVISION_RETRIES: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub workers: Option<usize>,
    pub max_retries: Option<u32>,
    pub command_timeout_secs: Option<u64>,
    pub provision_retries: Option<u32>,
}

impl Config {
    pub fn shade_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".shade"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::shade_dir()?.join("shade.toml"))
    }

    pub fn runs_dir() -> Result<PathBuf> {
        Ok(Self::shade_dir()?.join("runs"))
    }

    pub fn effective_workers(&self) -> usize {
        self.workers.unwrap_or(DEFAULT_WORKERS).max(1)
    }

    pub fn effective_max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES)
    }

    pub fn effective_command_timeout(&self) -> Duration {
        Duration::from_secs(
            self.command_timeout_secs
                .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS),
        )
    }

    pub fn effective_provision_retries(&self) -> u32 {
        self.provision_retries.unwrap_or(DEFAULT_PROVISION_RETRIES)
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        shlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            shlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        shlog_debug!(
            "Config loaded: workers={:?}, max_retries={:?}, command_timeout_secs={:?}",
            config.workers,
            config.max_retries,
            config.command_timeout_secs
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let shade_dir = Self::shade_dir()?;
        shlog_debug!("Config::save shade_dir={}", shade_dir.display());
        if !shade_dir.exists() {
            shlog_debug!("Creating shade directory");
            fs::create_dir_all(&shade_dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        shlog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn ensure_dirs() -> Result<()> {
        let shade_dir = Self::shade_dir()?;
        let runs_dir = Self::runs_dir()?;
        shlog_debug!(
            "Config::ensure_dirs shade={} runs={}",
            shade_dir.display(),
            runs_dir.display()
        );
        if !shade_dir.exists() {
            fs::create_dir_all(&shade_dir)?;
        }
        if !runs_dir.exists() {
            fs::create_dir_all(&runs_dir)?;
        }
        Ok(())
    }
}
