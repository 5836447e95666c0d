use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SubsearchError {
    #[error("No cues could be decoded from {path} as {format}")]
    Decode { path: PathBuf, format: String },

    #[error("Encoding of {0} could not be determined; decoded with replacement characters")]
    EncodingUncertain(PathBuf),

    #[error("Track extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Raised inside the cache when a late parse loses to a newer entry.
    #[error("Concurrent parse of {0} was superseded by a newer entry")]
    CacheRaceResolved(String),

    #[error("Search cancelled")]
    Cancelled,

    #[error("Unknown document: {0}")]
    UnknownDocument(String),

    #[error("No video found next to {0}")]
    NoCompanionVideo(PathBuf),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SubsearchError>;
