//! Application configuration stored in the workspace

use crate::engine::EngineConfig;
use crate::error::{ReconError, Result};
use crate::monitor::{MonitorRegistry, MonitorRule};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PARALLELISM: &str = "TABRECON_PARALLELISM";
pub const ENV_CHUNK_SIZE: &str = "TABRECON_CHUNK_SIZE";
pub const ENV_HISTORY_RETENTION: &str = "TABRECON_HISTORY_RETENTION";
pub const ENV_TIMEOUT_SECS: &str = "TABRECON_TIMEOUT_SECS";

/// Contents of `.tabrecon/config.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub version: String,
    pub engine: EngineConfig,
    /// Results kept per monitor rule
    pub history_retention: usize,
    /// Deadline for each run; 0 disables it
    pub default_timeout_secs: u64,
    /// Directory of JSON schema files, relative to the workspace root
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schemas_dir: Option<PathBuf>,
    pub monitors: Vec<MonitorRule>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: crate::FORMAT_VERSION.to_string(),
            engine: EngineConfig::default(),
            history_retention: crate::DEFAULT_HISTORY_RETENTION,
            default_timeout_secs: crate::DEFAULT_TIMEOUT_SECS,
            schemas_dir: None,
            monitors: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Read a config file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load, apply environment overrides, then validate
    pub fn load_with_env(path: &Path) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Apply `TABRECON_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_PARALLELISM) {
            self.engine.parallelism = parse_env(ENV_PARALLELISM, &v)?;
        }
        if let Some(v) = lookup(ENV_CHUNK_SIZE) {
            self.engine.chunk_size = parse_env(ENV_CHUNK_SIZE, &v)?;
        }
        if let Some(v) = lookup(ENV_HISTORY_RETENTION) {
            self.history_retention = parse_env(ENV_HISTORY_RETENTION, &v)?;
        }
        if let Some(v) = lookup(ENV_TIMEOUT_SECS) {
            self.default_timeout_secs = parse_env(ENV_TIMEOUT_SECS, &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.parallelism == 0 {
            return Err(ReconError::config("engine.parallelism must be at least 1"));
        }
        if self.engine.chunk_size == 0 {
            return Err(ReconError::config("engine.chunk_size must be at least 1"));
        }
        if self.engine.max_chunks_per_worker == 0 {
            return Err(ReconError::config("engine.max_chunks_per_worker must be at least 1"));
        }
        if self.history_retention == 0 {
            return Err(ReconError::config("history_retention must be at least 1"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        match self.default_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Registry holding every configured monitor. Fails on the first invalid rule.
    pub fn build_registry(&self) -> Result<MonitorRegistry> {
        let registry = MonitorRegistry::new(self.history_retention);
        for monitor in &self.monitors {
            registry.add_rule(monitor.clone())?;
        }
        Ok(registry)
    }

    pub fn monitor(&self, name: &str) -> Option<&MonitorRule> {
        self.monitors.iter().find(|m| m.name == name)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ReconError::config(format!("{}='{}' is not a valid number", key, value)))
}
