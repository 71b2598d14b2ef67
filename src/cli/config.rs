// ABOUTME: Configuration management for the autoscript application
// ABOUTME: Loads YAML configuration from standard locations and applies AUTOSCRIPT_* overrides

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::EngineConfig;
use crate::output::OutputConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Group used for scripts that do not name one
    #[serde(default = "default_group")]
    pub default_group: String,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

fn default_group() -> String {
    "default".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_group: default_group(),
            engine: EngineConfig::default(),
            output: OutputConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file path or default locations
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => Self::find_config_file(),
        };

        let mut config = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config {}", config_path.display()))?;
            serde_yaml::from_str(&contents)
                .with_context(|| format!("Invalid config {}", config_path.display()))?
        } else {
            Config::default()
        };

        config.merge_env()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> PathBuf {
        let possible_paths = [
            PathBuf::from("autoscript.yaml"),
            PathBuf::from("autoscript.yml"),
            PathBuf::from(".autoscript.yaml"),
            PathBuf::from(".autoscript.yml"),
        ];

        for path in possible_paths {
            if path.exists() {
                return path;
            }
        }

        if let Some(home_dir) = dirs::home_dir() {
            let home_config = home_dir.join(".autoscript").join("config.yaml");
            if home_config.exists() {
                return home_config;
            }
        }

        // Default path (may not exist)
        PathBuf::from("autoscript.yaml")
    }

    fn merge_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply AUTOSCRIPT_* overrides from any key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("AUTOSCRIPT_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("AUTOSCRIPT_LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Some(tick) = lookup("AUTOSCRIPT_TICK_MS") {
            let millis: u64 = tick
                .parse()
                .with_context(|| format!("AUTOSCRIPT_TICK_MS must be an integer, got '{}'", tick))?;
            self.engine.scheduler_tick = Duration::from_millis(millis);
        }
        if let Some(threshold) = lookup("AUTOSCRIPT_STALL_THRESHOLD_SECS") {
            let secs: u64 = threshold.parse().with_context(|| {
                format!(
                    "AUTOSCRIPT_STALL_THRESHOLD_SECS must be an integer, got '{}'",
                    threshold
                )
            })?;
            self.engine.stall_threshold = Some(Duration::from_secs(secs));
        }
        if let Some(retries) = lookup("AUTOSCRIPT_MAX_RETRIES") {
            self.engine.default_max_retries = retries.parse().with_context(|| {
                format!("AUTOSCRIPT_MAX_RETRIES must be an integer, got '{}'", retries)
            })?;
        }

        Ok(())
    }
}
