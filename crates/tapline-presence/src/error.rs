use thiserror::Error;

/// Failure taxonomy of presence operations. Callers at the REST and gateway
/// boundaries turn these into status codes or `:error` events.
#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("{0}")]
    Validation(String),

    #[error("Presence not found")]
    NotFound,

    #[error("Cannot modify another user's presence")]
    Forbidden,

    /// Store or runtime failure. Display stays generic; the source is logged.
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl PresenceError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

pub type PresenceResult<T> = Result<T, PresenceError>;
