use thiserror::Error;

use crate::media::presets::MediaKind;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Unknown format: {0}")]
    UnknownFormat(String),

    #[error("Unknown {kind} quality: {key}")]
    UnknownQuality { key: String, kind: MediaKind },

    #[error("Unknown resolution: {0}")]
    UnknownResolution(String),

    #[error("Unknown frame rate: {0}")]
    UnknownFrameRate(String),

    #[error("Invalid timestamp '{0}', expected H:MM:SS[.fraction]")]
    InvalidTimestamp(String),

    #[error("Media probe failed: {0}")]
    Probe(String),

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Conversion failed: {0}")]
    Runtime(String),

    #[error("A conversion is already running")]
    Busy,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {0}")]
    FileNotFound(String),
}

pub type Result<T> = std::result::Result<T, ConvertError>;
