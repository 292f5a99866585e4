//! Error types for the core library.

use thiserror::Error;

use crate::account::AccountId;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Could not reach or authenticate against the mail server.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The server was reachable but in an unexpected state (missing mailbox,
    /// rejected command, malformed response).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The classifier backend was unreachable or answered with garbage.
    #[error("Classification error: {0}")]
    Classification(String),

    /// The daily classification budget is used up.
    #[error("Classification budget exceeded: {used} of {limit} used today")]
    BudgetExceeded {
        /// Amount consumed today.
        used: u64,
        /// Daily limit.
        limit: u64,
    },

    /// A referenced account, folder or email does not exist.
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    /// An email was requested through an account that does not own it.
    #[error("Email {email_id} does not belong to account {account_id}")]
    AccountMismatch {
        /// The requested email.
        email_id: i64,
        /// The account the request came through.
        account_id: AccountId,
    },

    /// A sync for this account is already running.
    #[error("Sync already in progress for account {0}")]
    SyncInProgress(AccountId),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential storage error.
    #[error("Credential error: {0}")]
    Credential(#[from] crate::account::credentials::CredentialError),
}

impl From<mailsieve_imap::Error> for Error {
    fn from(err: mailsieve_imap::Error) -> Self {
        if err.is_connection_failure() {
            Self::Connection(err.to_string())
        } else {
            Self::Protocol(err.to_string())
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
