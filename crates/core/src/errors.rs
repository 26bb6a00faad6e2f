use thiserror::Error;

/// Error taxonomy for the core runtime, classified by semantics rather than
/// by originating subsystem. See the error handling design notes for fate
/// of each variant (terminal vs non-terminal).
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("establishment failed: {reason}")]
    EstablishmentFailure { reason: String },

    #[error("connection error: {reason}")]
    ConnectionError { reason: String },

    #[error("send failed: {reason}")]
    SendFailure { reason: String },

    #[error("receive failed: {reason}")]
    ReceiveFailure { reason: String },

    #[error("operation attempted on a closed connection")]
    ConnectionClosed,

    #[error("operation cancelled")]
    Cancelled,

    #[error("not supported: {reason}")]
    NotSupported { reason: String },

    #[error("soft error: {info}")]
    SoftError { info: String },
}

impl Error {
    pub fn establishment(reason: impl Into<String>) -> Self {
        Error::EstablishmentFailure {
            reason: reason.into(),
        }
    }

    pub fn connection(reason: impl Into<String>) -> Self {
        Error::ConnectionError {
            reason: reason.into(),
        }
    }

    pub fn send(reason: impl Into<String>) -> Self {
        Error::SendFailure {
            reason: reason.into(),
        }
    }

    pub fn receive(reason: impl Into<String>) -> Self {
        Error::ReceiveFailure {
            reason: reason.into(),
        }
    }

    pub fn not_supported(reason: impl Into<String>) -> Self {
        Error::NotSupported {
            reason: reason.into(),
        }
    }

    /// Whether this error, raised on an active connection, is fatal and
    /// must drive the connection to Closed.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            Error::ConnectionError { .. } | Error::EstablishmentFailure { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
