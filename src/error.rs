use thiserror::Error;

/// Startup configuration failures. Fatal: the process exits before serving.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Per-call failures of a mailbox or relay operation.
#[derive(Debug, Error)]
pub enum MailError {
    /// TLS, authentication or network failure while establishing a session.
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("{0}")]
    NotFound(String),

    /// The server confirmed the requested action did not take effect.
    #[error("{0}")]
    Operation(String),

    #[error("send failed: {0}")]
    Send(String),

    /// Unexpected protocol failure on an established session.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("{0}")]
    InvalidArgument(String),
}

impl MailError {
    pub fn protocol(err: impl std::fmt::Display) -> Self {
        MailError::Protocol(err.to_string())
    }

    pub fn send(err: impl std::fmt::Display) -> Self {
        MailError::Send(err.to_string())
    }
}

pub type MailResult<T> = Result<T, MailError>;
