//! Platform error types.

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),

    #[error("{call} failed: {message}")]
    Os { call: &'static str, message: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PlatformError {
    pub fn os(call: &'static str, message: impl Into<String>) -> Self {
        Self::Os {
            call,
            message: message.into(),
        }
    }

    /// Build an OS error from the calling thread's last error code.
    pub fn last_os_error(call: &'static str) -> Self {
        Self::os(call, std::io::Error::last_os_error().to_string())
    }
}

pub type Result<T> = std::result::Result<T, PlatformError>;
