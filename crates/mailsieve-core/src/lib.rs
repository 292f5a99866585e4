//! # mailsieve-core
//!
//! Sync and triage engine for `MailSieve`.
//!
//! This crate provides:
//! - Account management and credential lookup
//! - Incremental, cursor-based IMAP sync with a per-account session pool
//! - Local storage (`SQLite`)
//! - **Email Triage** - rule-based pattern hints arbitrated by a language
//!   model, with an audit log and learned sender rules
//! - **Review** - accept, dismiss or correct pending suggestions
//! - **Snooze** - park mail in a snooze folder and wake it on time
//! - **Bulk classification** - a bounded worker pool under a daily budget

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod account;
pub mod config;
mod database;
mod error;
pub mod mail;
pub mod snooze;
pub mod sync;
pub mod tasks;
pub mod triage;

#[cfg(test)]
mod test_support;

pub use account::credentials;
pub use account::{
    Account, AccountId, AccountRepository, CredentialError, CredentialResult, CredentialStore,
    ImapConfig, KeyringCredentials, MemoryCredentials,
};
pub use config::Settings;
pub use database::Database;
pub use error::{Error, Result};
pub use mail::{Email, EmailBody, EmailId, EmailRepository, Folder, FolderRepository};
pub use snooze::{SnoozeDuration, SnoozeReason, SnoozeScheduler, SnoozedEmail};
pub use sync::{
    FolderOperations, ImapFolderOperations, MailSynchronizer, ProgressBus, SessionRegistry,
    SyncOptions, SyncPhase, SyncProgress, SyncResult,
};
pub use tasks::{BulkClassifier, BulkSummary, ClassificationBudget};
pub use triage::{
    ReviewService, SenderRuleLearner, TriageClassificationResult, TriageClassifier, TriageFolder,
    TriageOptions, TriageOrchestrator,
};
