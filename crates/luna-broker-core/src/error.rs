//! Broker error taxonomy.
//!
//! Every failure in the request pipeline is one of these kinds and ends up as a
//! `BrokerResponse { success: false }` at the connection boundary.

use luna_platform::PlatformError;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Malformed line, unparseable JSON or a parameter payload of the wrong shape.
    #[error("{0}")]
    Protocol(String),

    /// Policy rejection. The executor was never invoked.
    #[error("{0}")]
    Validation(String),

    /// The OS call failed.
    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Operation timed out after {0}s")]
    Timeout(u64),

    /// Anything unexpected. Details stay in the server log.
    #[error("Internal error")]
    Internal(String),
}

impl BrokerError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "protocol",
            Self::Validation(_) => "validation",
            Self::Execution(_) => "execution",
            Self::Timeout(_) => "timeout",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<PlatformError> for BrokerError {
    fn from(err: PlatformError) -> Self {
        // Only the short form of OS failures crosses the trust boundary.
        match err {
            PlatformError::Io(io) => Self::Execution(io.kind().to_string()),
            other => Self::Execution(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;
