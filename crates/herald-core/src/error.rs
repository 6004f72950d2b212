use thiserror::Error;

#[derive(Debug, Error)]
pub enum HeraldError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unsupported dispatch target: {category}/{message_type}")]
    UnsupportedDispatch {
        category: String,
        message_type: String,
    },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Dispatch failed: {0}")]
    DispatchFailed(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HeraldError {
    /// Short error code string sent to HTTP clients next to the message.
    pub fn code(&self) -> &'static str {
        match self {
            HeraldError::Config(_) => "CONFIG_ERROR",
            HeraldError::Unauthorized(_) => "UNAUTHORIZED",
            HeraldError::InvalidSchedule(_) => "INVALID_SCHEDULE",
            HeraldError::NotFound(_) => "NOT_FOUND",
            HeraldError::UnsupportedDispatch { .. } => "UNSUPPORTED_DISPATCH",
            HeraldError::InvalidPayload(_) => "INVALID_PAYLOAD",
            HeraldError::DispatchFailed(_) => "DISPATCH_FAILED",
            HeraldError::Database(_) => "DATABASE_ERROR",
            HeraldError::Serialization(_) => "SERIALIZATION_ERROR",
            HeraldError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, HeraldError>;
