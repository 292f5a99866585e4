//! Account management module.
//!
//! Provides account configuration, storage, and credential lookup.

pub mod credentials;
mod model;
mod repository;

pub use credentials::{
    CredentialError, CredentialResult, CredentialStore, KeyringCredentials, MemoryCredentials,
};
pub use model::{Account, AccountId, ImapConfig};
pub use repository::AccountRepository;
