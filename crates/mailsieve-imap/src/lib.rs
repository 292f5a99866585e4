//! # mailsieve-imap
//!
//! The IMAP plumbing MailSieve needs and nothing more: SELECT, UID SEARCH,
//! UID FETCH, UID MOVE, APPEND and mailbox management, behind the
//! [`MailSession`] trait so the sync engine can be driven by a fake in tests.
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailsieve_imap::{ConnectConfig, SearchQuery, SessionConnector, TlsSessionConnector};
//!
//! let config = ConnectConfig::new("imap.example.com", "me@example.com", "app-password");
//! let mut session = TlsSessionConnector.connect(&config).await?;
//!
//! let mailbox = session.select("INBOX").await?;
//! let uids = session.uid_search(&SearchQuery::UidsAfter(1200)).await?;
//! let envelopes = session.fetch_envelopes(&uids).await?;
//! session.logout().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod connection;
mod error;
pub mod message;
pub mod provider;
pub mod search;
pub mod session;

pub use connection::{TlsSession, TlsSessionConnector, connect_tls};
pub use error::{Error, Result};
pub use message::{FetchedMessage, MailboxInfo, MessageFlags, WireAddress};
pub use provider::{Provider, ProviderPaths};
pub use search::{SearchQuery, uid_set};
pub use session::{ConnectConfig, MailSession, SessionConnector};
