//! Error types for the IMAP session layer.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during IMAP operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or encryption error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Connecting to the server timed out.
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    /// Authentication failed.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The requested mailbox does not exist or cannot be selected.
    #[error("Mailbox not found: {0}")]
    MailboxNotFound(String),

    /// The server answered in a way we did not expect.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The session was logged out or dropped by the server.
    #[error("Session closed")]
    Closed,
}

impl Error {
    /// Returns true for failures that mean the server could not be reached
    /// or refused our credentials, as opposed to a failed command.
    #[must_use]
    pub const fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Tls(_)
                | Self::InvalidDnsName(_)
                | Self::Timeout(_)
                | Self::Auth(_)
                | Self::Closed
        )
    }
}

impl From<async_imap::error::Error> for Error {
    fn from(err: async_imap::error::Error) -> Self {
        match err {
            async_imap::error::Error::Io(e) => Self::Io(e),
            async_imap::error::Error::ConnectionLost => Self::Closed,
            other => Self::Protocol(other.to_string()),
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
