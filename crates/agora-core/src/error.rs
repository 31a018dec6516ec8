use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgoraError {
    // Backend errors
    #[error("backend request failed: {0}")]
    BackendRequest(String),

    #[error("backend response parse error: {0}")]
    BackendParse(String),

    // Workflow errors
    #[error("workflow validation failed: {0}")]
    GraphValidation(String),

    // Run errors
    #[error("run cancelled")]
    Cancelled,

    // Config errors
    #[error("config error: {0}")]
    Config(String),

    #[error("config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AgoraError>;
