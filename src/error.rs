use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rendering engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Failed to start rendering engine: {0}")]
    EngineSpawn(String),

    #[error("Rendering engine failed: {0}")]
    EngineFailed(String),

    #[error("Rendering engine timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Status store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Failed to serialize TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
