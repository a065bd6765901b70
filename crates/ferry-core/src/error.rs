//! Error types for Ferry.
//!
//! Transport and framing failures are errors and end the connection they
//! happened on. "Not found" conditions are not errors: they travel in-band as
//! sentinel values and surface as variants of the per-operation result types.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// A specialized `Result` type for Ferry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Framing and transfer violations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The stream ended before a fixed-width field was complete.
    #[error("truncated {field}: expected {expected} bytes, got {received}")]
    Truncated {
        /// Field being decoded
        field: &'static str,
        /// Bytes the field requires
        expected: usize,
        /// Bytes actually received
        received: usize,
    },

    /// A field was complete but its content could not be decoded.
    #[error("malformed {field}: {reason}")]
    Malformed {
        /// Field being decoded
        field: &'static str,
        /// What was wrong with it
        reason: String,
    },

    /// A bulk transfer ended before the announced size was moved.
    #[error("transfer incomplete: moved {moved} of {expected} bytes")]
    Incomplete {
        /// Announced size
        expected: u64,
        /// Bytes moved before the stream or source ran dry
        moved: u64,
    },

    /// The peer answered with something the handshake does not allow.
    #[error("unexpected reply: expected {expected}, got {actual}")]
    UnexpectedReply {
        /// What the handshake expected
        expected: String,
        /// What arrived instead
        actual: String,
    },
}

/// The main error type for Ferry.
#[derive(Error, Debug)]
pub enum Error {
    /// Cannot establish or keep the connection
    #[error("connection error: {0}")]
    Connection(String),

    /// An operation was attempted without a connection
    #[error("not connected, run CONN first")]
    NotConnected,

    /// `CONN` was issued on a session that is already connected
    #[error("connection already established")]
    AlreadyConnected,

    /// The session has been closed with `QUIT`
    #[error("session closed")]
    SessionClosed,

    /// Framing or transfer violation
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The first message on a connection was not `CONN`
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    /// Operation timeout
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// File name not usable in the store
    #[error("invalid file name '{0}'")]
    InvalidName(String),

    /// Invalid argument or input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns whether the connection this error happened on is unusable.
    ///
    /// Framing, transfer and transport failures leave the byte stream in an
    /// unknown position, so the session must drop it.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::Protocol(_)
                | Self::HandshakeRejected(_)
                | Self::Timeout(_)
                | Self::Io(_)
        )
    }

    /// Shorthand for [`ProtocolError::Truncated`].
    pub(crate) const fn truncated(field: &'static str, expected: usize, received: usize) -> Self {
        Self::Protocol(ProtocolError::Truncated {
            field,
            expected,
            received,
        })
    }

    /// Shorthand for [`ProtocolError::Malformed`].
    pub(crate) fn malformed(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Protocol(ProtocolError::Malformed {
            field,
            reason: reason.into(),
        })
    }
}
