//! Credential lookup.
//!
//! IMAP passwords and the hosted classifier's API key live in the platform
//! keyring:
//! - Linux: Secret Service (GNOME Keyring, `KWallet`)
//! - macOS: Keychain
//! - Windows: Credential Manager
//!
//! Components never talk to the keyring directly; they receive a
//! [`CredentialStore`], which tests replace with [`MemoryCredentials`].

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use keyring::Entry;
use tracing::debug;

use super::AccountId;

/// Service name used for keyring entries.
const SERVICE_NAME: &str = "mailsieve";

/// Credential type identifier for IMAP passwords.
const IMAP_CREDENTIAL: &str = "imap";

/// Keyring user for the classifier API key (not tied to an account).
const ARBITER_KEY_USER: &str = "mailsieve_arbiter_api_key";

/// Error type for credential operations.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// Failed to access keyring.
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    /// No secret is stored for the requested key.
    #[error("No credential stored for {0}")]
    Missing(String),
}

/// Result type for credential operations.
pub type CredentialResult<T> = std::result::Result<T, CredentialError>;

/// Source of secrets.
pub trait CredentialStore: Send + Sync {
    /// Returns the IMAP password for an account.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Missing`] if nothing is stored.
    fn imap_password(&self, account_id: AccountId) -> CredentialResult<String>;

    /// Returns the API key for the hosted classifier.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Missing`] if nothing is stored.
    fn arbiter_api_key(&self) -> CredentialResult<String>;
}

/// Generates the keyring entry key for a credential.
fn credential_key(account_id: AccountId, credential_type: &str) -> String {
    format!("{SERVICE_NAME}_{credential_type}_{}", account_id.0)
}

fn read_entry(user: &str) -> CredentialResult<String> {
    let entry = Entry::new(SERVICE_NAME, user)?;
    match entry.get_password() {
        Ok(secret) => Ok(secret),
        Err(keyring::Error::NoEntry) => Err(CredentialError::Missing(user.to_string())),
        Err(e) => Err(e.into()),
    }
}

/// Credential store backed by the system keyring.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyringCredentials;

impl KeyringCredentials {
    /// Stores an IMAP password.
    ///
    /// # Errors
    ///
    /// Returns an error if the keyring operation fails.
    pub fn store_imap_password(&self, account_id: AccountId, password: &str) -> CredentialResult<()> {
        let key = credential_key(account_id, IMAP_CREDENTIAL);
        Entry::new(SERVICE_NAME, &key)?.set_password(password)?;
        debug!("Stored IMAP password for account {}", account_id.0);
        Ok(())
    }

    /// Stores the classifier API key.
    ///
    /// # Errors
    ///
    /// Returns an error if the keyring operation fails.
    pub fn store_arbiter_api_key(&self, key: &str) -> CredentialResult<()> {
        Entry::new(SERVICE_NAME, ARBITER_KEY_USER)?.set_password(key)?;
        debug!("Stored classifier API key");
        Ok(())
    }

    /// Deletes the IMAP password of an account. Missing entries are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the keyring operation fails.
    pub fn delete_imap_password(&self, account_id: AccountId) -> CredentialResult<()> {
        let key = credential_key(account_id, IMAP_CREDENTIAL);
        match Entry::new(SERVICE_NAME, &key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl CredentialStore for KeyringCredentials {
    fn imap_password(&self, account_id: AccountId) -> CredentialResult<String> {
        read_entry(&credential_key(account_id, IMAP_CREDENTIAL))
    }

    fn arbiter_api_key(&self) -> CredentialResult<String> {
        read_entry(ARBITER_KEY_USER)
    }
}

/// In-process credential store, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryCredentials {
    passwords: Mutex<HashMap<AccountId, String>>,
    api_key: Mutex<Option<String>>,
}

impl MemoryCredentials {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the IMAP password for an account.
    pub fn set_imap_password(&self, account_id: AccountId, password: impl Into<String>) {
        self.passwords
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(account_id, password.into());
    }

    /// Sets the classifier API key.
    pub fn set_arbiter_api_key(&self, key: impl Into<String>) {
        *self.api_key.lock().unwrap_or_else(PoisonError::into_inner) = Some(key.into());
    }
}

impl CredentialStore for MemoryCredentials {
    fn imap_password(&self, account_id: AccountId) -> CredentialResult<String> {
        self.passwords
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&account_id)
            .cloned()
            .ok_or_else(|| CredentialError::Missing(credential_key(account_id, IMAP_CREDENTIAL)))
    }

    fn arbiter_api_key(&self) -> CredentialResult<String> {
        self.api_key
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| CredentialError::Missing(ARBITER_KEY_USER.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_key_format() {
        assert_eq!(credential_key(AccountId(7), IMAP_CREDENTIAL), "mailsieve_imap_7");
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryCredentials::new();
        assert!(matches!(
            store.imap_password(AccountId(1)),
            Err(CredentialError::Missing(_))
        ));

        store.set_imap_password(AccountId(1), "secret");
        assert_eq!(store.imap_password(AccountId(1)).ok().as_deref(), Some("secret"));
        assert!(store.arbiter_api_key().is_err());
    }
}
