use std::fmt;
use std::io;
use thiserror::Error;

/// Why a stream was reset before it completed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ResetReason {
    /// A filter or the proxy itself reset the stream.
    LocalReset,
    /// The peer reset the stream.
    RemoteReset,
    /// The underlying connection was closed cleanly while the stream was alive.
    ConnectionTermination,
    /// The underlying connection failed.
    ConnectionFailure,
    /// The peer violated the wire protocol.
    ProtocolError,
}

impl ResetReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ResetReason::LocalReset => "local_reset",
            ResetReason::RemoteReset => "remote_reset",
            ResetReason::ConnectionTermination => "connection_termination",
            ResetReason::ConnectionFailure => "connection_failure",
            ResetReason::ProtocolError => "protocol_error",
        }
    }
}

impl fmt::Display for ResetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors reported by the secure transport a stream rides on.
///
/// `WantRead` and `WantWrite` only ask the caller to retry once the socket is
/// ready again and never end a stream; every other variant maps onto a
/// [`ResetReason`] through [`TransportError::reset_reason`].
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport wants to read before making progress")]
    WantRead,

    #[error("transport wants to write before making progress")]
    WantWrite,

    #[error("transport closed by peer")]
    Closed,

    #[error("transport protocol violation: {reason}")]
    Protocol { reason: String },

    #[error("fatal transport error: {reason}")]
    Fatal { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl TransportError {
    pub fn protocol<S: ToString>(str: S) -> Self {
        Self::Protocol { reason: str.to_string() }
    }

    pub fn fatal<S: ToString>(str: S) -> Self {
        Self::Fatal { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    /// Returns true if the operation can simply be retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::WantRead | TransportError::WantWrite)
    }

    /// The reset a stream suffers from this error, `None` when retryable.
    pub fn reset_reason(&self) -> Option<ResetReason> {
        match self {
            TransportError::WantRead | TransportError::WantWrite => None,
            TransportError::Closed => Some(ResetReason::ConnectionTermination),
            TransportError::Protocol { .. } => Some(ResetReason::ProtocolError),
            TransportError::Fatal { .. } | TransportError::Io { .. } => Some(ResetReason::ConnectionFailure),
        }
    }
}
