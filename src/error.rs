use std::time::Duration;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("channel disconnected")]
    ChannelDisconnected,

    #[error("no acknowledgment within {0:?}")]
    AckTimeout(Duration),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("api error: {0}")]
    Api(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl AppError {
    /// Returns whether retrying the operation can reasonably succeed
    /// (transient transport/API failures as opposed to caller mistakes).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Transport(_)
                | AppError::ChannelDisconnected
                | AppError::AckTimeout(_)
                | AppError::Api(_)
        )
    }
}
