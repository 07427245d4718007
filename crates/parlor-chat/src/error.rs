use thiserror::Error;

use parlor_types::events::ErrorCode;

/// Everything a chat operation can fail with. Each variant maps onto one
/// wire error code; store failures keep their internal detail for the logs
/// and surface as a bare `db` to the client.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("operation requires an authenticated user")]
    Unauthorized,

    #[error("message text is empty")]
    EmptyMessage,

    #[error("target id is not a positive integer")]
    InvalidId,

    #[error("message not found")]
    NotFound,

    #[error("not permitted")]
    Forbidden,

    #[error("own-message delete window has passed")]
    TimeLimitExceeded,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl ChatError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ChatError::Unauthorized => ErrorCode::Auth,
            ChatError::EmptyMessage => ErrorCode::Empty,
            ChatError::InvalidId => ErrorCode::BadId,
            ChatError::NotFound => ErrorCode::NotFound,
            ChatError::Forbidden => ErrorCode::Forbidden,
            ChatError::TimeLimitExceeded => ErrorCode::TimeLimit,
            ChatError::Store(_) => ErrorCode::Db,
        }
    }

    /// Recover a typed chat error that travelled through `anyhow` inside a
    /// store closure; anything else is a genuine store failure.
    pub fn from_store(err: anyhow::Error) -> Self {
        match err.downcast::<ChatError>() {
            Ok(chat) => chat,
            Err(other) => ChatError::Store(other),
        }
    }
}
