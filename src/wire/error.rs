//! Wire-level error types.

use std::fmt;
use std::io;

/// Result type for wire operations.
pub type WireResult<T> = Result<T, WireError>;

/// Wire protocol errors.
#[derive(Debug)]
pub enum WireError {
    /// I/O error
    Io(io::Error),

    /// Frame exceeds the configured size limit
    FrameTooLarge { size: usize, max: usize },

    /// Unknown frame kind byte
    UnknownFrameKind(u8),

    /// Malformed frame body
    Malformed(String),

    /// Error reported by the remote proxy
    Remote { code: i32, message: String },

    /// Unexpected frame for the current exchange
    UnexpectedFrame(String),

    /// Connection closed by peer
    ConnectionClosed,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Io(e) => write!(f, "I/O error: {}", e),
            WireError::FrameTooLarge { size, max } => {
                write!(f, "Frame too large: {} bytes (max: {})", size, max)
            }
            WireError::UnknownFrameKind(kind) => write!(f, "Unknown frame kind: 0x{:02X}", kind),
            WireError::Malformed(msg) => write!(f, "Malformed frame: {}", msg),
            WireError::Remote { code, message } => write!(f, "Remote error {}: {}", code, message),
            WireError::UnexpectedFrame(msg) => write!(f, "Unexpected frame: {}", msg),
            WireError::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for WireError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WireError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WireError {
    fn from(err: io::Error) -> Self {
        WireError::Io(err)
    }
}
