//! Runtime configuration.
//!
//! Values come from, in order of precedence: `LEVELUP_*` environment
//! variables, a JSON config file, then built-in defaults. The file is read
//! from `$LEVELUP_CONFIG` if set, else `<config dir>/levelup/config.json`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};

use crate::catalog::DEFAULT_MAX_TASK_POINTS;
use crate::leveling::{LevelScale, DEFAULT_LEVEL_STEP, DEFAULT_THRESHOLDS};

const APP_NAME: &str = "levelup";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// SQLite file. Defaults to the platform data directory.
    pub database_path: Option<PathBuf>,
    /// Port for the HTTP API.
    pub port: u16,
    /// Upper bound for a task's point value.
    pub max_task_points: u32,
    /// Points required for levels 1, 2, 3, ... Must start at 0 and increase.
    pub level_thresholds: Vec<i64>,
    /// Points per level past the end of `level_thresholds`.
    pub level_step: i64,
    /// Deadline for a single store call before it fails as retryable.
    pub store_timeout_ms: u64,
    /// Bearer token required on API requests. Unset disables the check.
    pub api_key: Option<String>,
    /// Allowed CORS origins. Unset allows any origin.
    pub cors_origins: Option<Vec<String>>,
    /// Requests per minute per client IP when an API key is set.
    pub rate_limit_per_minute: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            port: 3000,
            max_task_points: DEFAULT_MAX_TASK_POINTS,
            level_thresholds: DEFAULT_THRESHOLDS.to_vec(),
            level_step: DEFAULT_LEVEL_STEP,
            store_timeout_ms: 5_000,
            api_key: None,
            cors_origins: None,
            rate_limit_per_minute: 100,
        }
    }
}

impl LedgerConfig {
    /// Load the config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match config_path()? {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = serde_json::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Apply `LEVELUP_*` overrides using `lookup` to read variables.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("LEVELUP_DATABASE") {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(port) = lookup("LEVELUP_PORT") {
            self.port = port.parse().context("LEVELUP_PORT must be a port number")?;
        }
        if let Some(max) = lookup("LEVELUP_MAX_TASK_POINTS") {
            self.max_task_points = max
                .parse()
                .context("LEVELUP_MAX_TASK_POINTS must be a positive integer")?;
        }
        if let Some(thresholds) = lookup("LEVELUP_LEVEL_THRESHOLDS") {
            self.level_thresholds = thresholds
                .split(',')
                .map(|s| s.trim().parse::<i64>())
                .collect::<Result<Vec<_>, _>>()
                .context("LEVELUP_LEVEL_THRESHOLDS must be comma-separated integers")?;
        }
        if let Some(step) = lookup("LEVELUP_LEVEL_STEP") {
            self.level_step = step
                .parse()
                .context("LEVELUP_LEVEL_STEP must be an integer")?;
        }
        if let Some(ms) = lookup("LEVELUP_STORE_TIMEOUT_MS") {
            self.store_timeout_ms = ms
                .parse()
                .context("LEVELUP_STORE_TIMEOUT_MS must be milliseconds")?;
        }
        if let Some(key) = lookup("LEVELUP_API_KEY") {
            self.api_key = Some(key).filter(|k| !k.is_empty());
        }
        if let Some(origins) = lookup("LEVELUP_CORS_ORIGINS") {
            self.cors_origins = Some(origins.split(',').map(|s| s.trim().to_string()).collect());
        }
        if let Some(limit) = lookup("LEVELUP_RATE_LIMIT") {
            self.rate_limit_per_minute = limit
                .parse()
                .context("LEVELUP_RATE_LIMIT must be requests per minute")?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_task_points == 0 {
            anyhow::bail!("max_task_points must be at least 1");
        }
        if self.store_timeout_ms == 0 {
            anyhow::bail!("store_timeout_ms must be at least 1");
        }
        self.level_scale()?;
        Ok(())
    }

    pub fn level_scale(&self) -> Result<LevelScale> {
        LevelScale::new(self.level_thresholds.clone(), self.level_step)
            .context("Invalid level configuration")
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => crate::db::default_path(),
        }
    }
}

fn config_path() -> Result<Option<PathBuf>> {
    if let Ok(path) = std::env::var("LEVELUP_CONFIG") {
        return Ok(Some(PathBuf::from(path)));
    }
    let Some(mut path) = config_dir() else {
        return Ok(None);
    };
    path.push(APP_NAME);
    path.push(CONFIG_FILE);
    Ok(Some(path))
}
