//! Error types for the consensus index orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("All providers failed: {0}")]
    AllProvidersFailed(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Leaderboard parse error: {0}")]
    LeaderboardParse(String),

    #[error("Leaderboard empty: {0}")]
    LeaderboardEmpty(String),

    #[error("External data error: {0}")]
    ExternalDataError(String),

    #[error("Snapshot already exists for {0}")]
    SnapshotExists(String),

    #[error("State persistence error: {0}")]
    StateError(String),

    #[error("Scoring error: {0}")]
    ScoringError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
