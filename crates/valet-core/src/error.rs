use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValetError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("User not found: {id}")]
    UserNotFound { id: String },

    #[error("Permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ValetError>;
