//! Connection errors and I/O failure classification.

use std::io;

use thiserror::Error;

use cinch_core::CoreError;
use cinch_crypto::cipher::CipherError;
use cinch_crypto::handshake::HandshakeError;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("I/O failure: {0}")]
    Io(#[from] io::Error),

    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("cipher failure: {0}")]
    Cipher(#[from] CipherError),

    #[error("malformed packet: {0}")]
    Codec(#[from] CoreError),

    #[error("connection is closed")]
    Closed,

    #[error("receive timed out")]
    RecvTimeout,

    #[error("manual receive requires pull delivery mode")]
    NotPullMode,
}

/// Why a connection went down, as reported to the disconnect callback.
///
/// `Disconnect` covers peer-initiated graceful closes and clean
/// shutdowns; everything else is `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Disconnect,
    Error,
}

/// Coarse classification of an `io::Error` from the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoFailure {
    /// Peer reset the connection.
    Reset,
    /// Read timed out with no data; the reader loop continues.
    TimedOut,
    /// Clean shutdown (EOF or local close).
    Shutdown,
    /// Connection aborted mid-stream.
    Aborted,
    /// Anything else.
    Other,
}

impl IoFailure {
    pub fn classify(err: &io::Error) -> Self {
        use io::ErrorKind::*;
        match err.kind() {
            // Both appear for timed-out reads depending on platform.
            TimedOut | WouldBlock => Self::TimedOut,
            ConnectionReset => Self::Reset,
            ConnectionAborted | BrokenPipe => Self::Aborted,
            UnexpectedEof | NotConnected => Self::Shutdown,
            _ => Self::Other,
        }
    }

    /// The disconnect reason this failure maps to, or `None` when the
    /// reader loop should keep going.
    pub fn disconnect_reason(self) -> Option<DisconnectReason> {
        match self {
            Self::TimedOut => None,
            Self::Shutdown => Some(DisconnectReason::Disconnect),
            Self::Reset | Self::Aborted | Self::Other => Some(DisconnectReason::Error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(kind: io::ErrorKind) -> io::Error {
        io::Error::new(kind, "test")
    }

    #[test]
    fn timeouts_are_transient() {
        assert_eq!(
            IoFailure::classify(&kind(io::ErrorKind::TimedOut)),
            IoFailure::TimedOut
        );
        assert_eq!(
            IoFailure::classify(&kind(io::ErrorKind::WouldBlock)),
            IoFailure::TimedOut
        );
        assert_eq!(IoFailure::TimedOut.disconnect_reason(), None);
    }

    #[test]
    fn eof_is_a_clean_disconnect() {
        let failure = IoFailure::classify(&kind(io::ErrorKind::UnexpectedEof));
        assert_eq!(failure, IoFailure::Shutdown);
        assert_eq!(
            failure.disconnect_reason(),
            Some(DisconnectReason::Disconnect)
        );
    }

    #[test]
    fn resets_and_aborts_are_errors() {
        for k in [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::Other,
        ] {
            let failure = IoFailure::classify(&kind(k));
            assert_eq!(failure.disconnect_reason(), Some(DisconnectReason::Error));
        }
    }
}
