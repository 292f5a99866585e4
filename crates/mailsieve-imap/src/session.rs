//! The session seam between the sync engine and the wire.

use std::time::Duration;

use async_trait::async_trait;

use crate::message::{FetchedMessage, MailboxInfo};
use crate::search::SearchQuery;
use crate::Result;

/// An authenticated IMAP session.
///
/// Only the subset of IMAP the sync and triage engines need: SELECT,
/// UID SEARCH, UID FETCH, UID MOVE, APPEND and mailbox management.
#[async_trait]
pub trait MailSession: Send {
    /// Selects a mailbox, returning its validity token and counts.
    async fn select(&mut self, mailbox: &str) -> Result<MailboxInfo>;

    /// Runs UID SEARCH in the selected mailbox.
    ///
    /// Returned UIDs are filtered against the query and sorted ascending.
    async fn uid_search(&mut self, query: &SearchQuery) -> Result<Vec<u32>>;

    /// Fetches envelope, flags and structure for the given UIDs.
    async fn fetch_envelopes(&mut self, uids: &[u32]) -> Result<Vec<FetchedMessage>>;

    /// Fetches the full RFC 822 message for one UID.
    async fn fetch_raw(&mut self, uid: u32) -> Result<Option<Vec<u8>>>;

    /// Moves one message from the selected mailbox to `destination`.
    async fn uid_move(&mut self, uid: u32, destination: &str) -> Result<()>;

    /// Appends a message to `mailbox` with the given flag list, e.g. `(\Seen)`.
    async fn append(&mut self, mailbox: &str, flags: &str, content: &[u8]) -> Result<()>;

    /// Lists every mailbox path.
    async fn list_mailboxes(&mut self) -> Result<Vec<String>>;

    /// Creates a mailbox.
    async fn create_mailbox(&mut self, mailbox: &str) -> Result<()>;

    /// Deletes a mailbox.
    async fn delete_mailbox(&mut self, mailbox: &str) -> Result<()>;

    /// Logs out and closes the connection.
    async fn logout(&mut self) -> Result<()>;
}

/// Where and how to log in.
#[derive(Clone)]
pub struct ConnectConfig {
    /// Server hostname.
    pub host: String,
    /// Server port (993 for implicit TLS).
    pub port: u16,
    /// Login name.
    pub username: String,
    /// Password or app password.
    pub password: String,
    /// Timeout for TCP connect, TLS handshake and LOGIN together.
    pub connect_timeout: Duration,
}

impl ConnectConfig {
    /// Creates a config with implicit TLS on port 993.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: 993,
            username: username.into(),
            password: password.into(),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl std::fmt::Debug for ConnectConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Opens authenticated sessions.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Connects and logs in.
    async fn connect(&self, config: &ConnectConfig) -> Result<Box<dyn MailSession>>;
}
