use thiserror::Error;

pub type Result<T, E = LookoutError> = std::result::Result<T, E>;

/// Unified error type covering common failure scenarios across subsystems.
#[derive(Debug, Error)]
pub enum LookoutError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("backend returned {status}: {message}")]
    Http { status: u16, message: String },
    #[error("not authenticated")]
    Unauthorized,
    #[error("malformed payload: {0}")]
    Decode(String),
    #[error("invalid instance: {0}")]
    Validation(String),
    #[error("push channel error: {0}")]
    Push(String),
    #[error("operational error: {0}")]
    Ops(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LookoutError {
    /// Message suitable for a user-facing notification.
    ///
    /// Backend errors carry the server's own `error` text; everything else
    /// falls back to the display form.
    pub fn user_message(&self) -> String {
        match self {
            LookoutError::Http { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}
