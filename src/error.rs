//! Error handling for the packethunt simulator
//!
//! Most of what goes wrong on the simulated wire is not an error at all:
//! unparseable frames are classified, unknown hosts are dropped and bad
//! protocol commands get a scripted reply. The variants below cover the
//! remaining failures, which are startup configuration problems and the
//! TAP device itself.

use thiserror::Error;

/// Main error type for simulator operations
#[derive(Debug, Error)]
pub enum HuntError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Permission denied: {0}")]
    PermissionError(String),

    #[error("Interface error: {0}")]
    InterfaceError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Encode error: {0}")]
    EncodeError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl HuntError {
    /// Map an io error raised while touching the TAP device, keeping
    /// permission problems distinguishable for the CLI hint.
    pub fn from_interface_io(context: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            HuntError::PermissionError(format!("{}: {}", context, err))
        } else {
            HuntError::InterfaceError(format!("{}: {}", context, err))
        }
    }

    /// Whether the error should abort startup.
    ///
    /// Every error reaching the binary is fatal except a failed frame write,
    /// which the primary loop logs and moves past.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, HuntError::NetworkError(_) | HuntError::EncodeError(_))
    }
}

/// Result type alias for simulator operations
pub type HuntResult<T> = Result<T, HuntError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_is_kept_apart() {
        let err = HuntError::from_interface_io(
            "open /dev/net/tun",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(matches!(err, HuntError::PermissionError(_)));
        assert!(err.is_fatal());

        let err = HuntError::from_interface_io(
            "TUNSETIFF",
            std::io::Error::from(std::io::ErrorKind::InvalidInput),
        );
        assert!(matches!(err, HuntError::InterfaceError(_)));
    }

    #[test]
    fn write_failures_are_not_fatal() {
        assert!(!HuntError::NetworkError("short write".to_string()).is_fatal());
        assert!(HuntError::ConfigError("bad".to_string()).is_fatal());
    }
}
