pub mod types;

pub use types::*;

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Queue and worker settings
    pub pipeline: PipelineConfig,
    /// Rendering engine settings
    pub engine: EngineConfig,
    /// Output settings
    pub output: OutputConfig,
}

impl AppConfig {
    /// Load configuration from TOML file, or create default if not found
    pub fn load() -> Self {
        let config_path = Self::config_path();

        if config_path.exists() {
            match Self::load_from_file(&config_path) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    return config;
                }
                Err(e) => {
                    warn!("Failed to load config: {}. Using defaults.", e);
                }
            }
        }

        let config = Self::default();
        // Save default config for future editing
        if let Err(e) = config.save_to(&config_path) {
            warn!("Failed to save default config: {}", e);
        }
        config
    }

    /// Save configuration to the given TOML file
    pub fn save_to(&self, config_path: &Path) -> Result<(), AppError> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(config_path, toml_string)
            .map_err(|e| AppError::Config(format!("Failed to write config file: {}", e)))?;

        info!("Saved config to {}", config_path.display());
        Ok(())
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self, AppError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config file: {}", e)))?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("thumbnailer")
            .join("config.toml")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), AppError> {
        if self.pipeline.queue_capacity == 0 {
            return Err(AppError::Config(
                "Queue capacity must be at least 1".to_string(),
            ));
        }
        if self.pipeline.worker_count == 0 {
            return Err(AppError::Config(
                "Worker count must be at least 1".to_string(),
            ));
        }
        if self.pipeline.batch_size == 0 {
            return Err(AppError::Config("Batch size must be at least 1".to_string()));
        }
        if self.pipeline.watchdog_interval_ms == 0 {
            return Err(AppError::Config(
                "Watchdog interval must be greater than zero".to_string(),
            ));
        }
        if self.engine.thumbnail_size == 0 {
            return Err(AppError::Config(
                "Thumbnail size must be at least 1 pixel".to_string(),
            ));
        }
        if self.engine.interpreter.trim().is_empty() {
            return Err(AppError::Config(
                "Engine interpreter must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
