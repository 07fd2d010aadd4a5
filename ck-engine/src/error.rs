use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("persistence error: {0}")]
    Persist(#[from] PersistError),
}

/// Failure reported by an outbound transport.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The operator refuses direct messages at the transport level.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("direct delivery failed: {0}")]
    Direct(DeliveryError),

    #[error("fallback delivery failed: {0}")]
    Fallback(DeliveryError),

    #[error("direct delivery unavailable and no fallback destination is known")]
    NoFallback,
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("io error: {0}")]
    Io(String),

    #[error("encoding error: {0}")]
    Encoding(String),
}

impl From<std::io::Error> for PersistError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for PersistError {
    fn from(e: serde_json::Error) -> Self {
        Self::Encoding(e.to_string())
    }
}
