use thiserror::Error;

/// Common error types used across the workspace.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A reject code arrived that has no disable-code mapping.
    #[error("Unmapped reject code: {0}")]
    UnmappedRejectCode(String),

    #[error("Upstream request failed: {0}")]
    Upstream(String),

    #[error("Credential decryption failed: {0}")]
    Decryption(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Domain errors are deterministic: redelivering the same message fails the same way.
    pub fn is_domain(&self) -> bool {
        matches!(self, AppError::UnmappedRejectCode(_) | AppError::NotFound(_))
    }
}

pub type AppResult<T> = Result<T, AppError>;
