//! Account model types.

use std::time::Duration;

use mailsieve_imap::{ConnectConfig, ProviderPaths};
use serde::{Deserialize, Serialize};

/// Unique identifier for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(pub i64);

impl AccountId {
    /// Create a new account ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// IMAP server configuration. Only implicit TLS is supported.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImapConfig {
    /// Server hostname.
    pub host: String,
    /// Server port (993 unless the provider says otherwise).
    pub port: u16,
    /// Username for authentication.
    pub username: String,
}

/// Email account configuration.
///
/// The password is not part of the account; it is looked up in a
/// [`super::CredentialStore`] when a session is opened.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Account {
    /// Unique identifier (None for unsaved accounts).
    pub id: Option<AccountId>,
    /// Display name for the account.
    pub name: String,
    /// Email address.
    pub email: String,
    /// IMAP configuration.
    pub imap: ImapConfig,
}

impl Account {
    /// Create account with common defaults for well-known providers.
    #[must_use]
    pub fn with_email(email: &str) -> Self {
        let mut account = Self {
            email: email.to_string(),
            ..Default::default()
        };

        if let Some(domain) = email.split('@').nth(1) {
            let (name, host) = match domain.to_lowercase().as_str() {
                "gmail.com" | "googlemail.com" => ("Gmail", "imap.gmail.com"),
                "outlook.com" | "hotmail.com" | "live.com" => ("Outlook", "outlook.office365.com"),
                "yahoo.com" | "ymail.com" => ("Yahoo", "imap.mail.yahoo.com"),
                "icloud.com" | "me.com" | "mac.com" => ("iCloud", "imap.mail.me.com"),
                "fastmail.com" | "fastmail.fm" => ("Fastmail", "imap.fastmail.com"),
                _ => (domain, ""),
            };
            account.name = name.to_string();
            account.imap.host = host.to_string();
        }

        account.imap.port = 993;
        account.imap.username = email.to_string();
        account
    }

    /// Returns the ID, or a data integrity error for unsaved accounts.
    ///
    /// # Errors
    ///
    /// Returns an error if the account has not been saved yet.
    pub fn require_id(&self) -> crate::Result<AccountId> {
        self.id
            .ok_or_else(|| crate::Error::DataIntegrity(format!("account {} is not saved", self.email)))
    }

    /// Folder layout of this account's provider.
    #[must_use]
    pub fn provider_paths(&self) -> ProviderPaths {
        ProviderPaths::for_host(&self.imap.host)
    }

    /// Builds the login configuration for this account.
    #[must_use]
    pub fn connect_config(&self, password: String, connect_timeout: Duration) -> ConnectConfig {
        ConnectConfig {
            host: self.imap.host.clone(),
            port: if self.imap.port == 0 { 993 } else { self.imap.port },
            username: self.imap.username.clone(),
            password,
            connect_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailsieve_imap::Provider;

    #[test]
    fn test_account_id_display() {
        assert_eq!(format!("{}", AccountId::new(123)), "123");
    }

    #[test]
    fn test_with_email_gmail() {
        let account = Account::with_email("user@gmail.com");
        assert_eq!(account.name, "Gmail");
        assert_eq!(account.imap.host, "imap.gmail.com");
        assert_eq!(account.imap.port, 993);
        assert_eq!(account.imap.username, "user@gmail.com");
        assert_eq!(account.provider_paths().provider, Provider::Gmail);
    }

    #[test]
    fn test_with_email_outlook_aliases() {
        for email in ["a@outlook.com", "a@hotmail.com", "a@live.com"] {
            let account = Account::with_email(email);
            assert_eq!(account.name, "Outlook");
            assert_eq!(account.provider_paths().trash, "Deleted Items");
        }
    }

    #[test]
    fn test_with_email_unknown_domain() {
        let account = Account::with_email("user@example.org");
        assert_eq!(account.name, "example.org");
        assert!(account.imap.host.is_empty());
        assert_eq!(account.provider_paths().provider, Provider::Generic);
    }

    #[test]
    fn test_connect_config_defaults_port() {
        let mut account = Account::with_email("user@example.org");
        account.imap.host = "mail.example.org".to_string();
        account.imap.port = 0;
        let config = account.connect_config("pw".to_string(), Duration::from_secs(5));
        assert_eq!(config.port, 993);
        assert_eq!(config.host, "mail.example.org");
    }

    #[test]
    fn test_require_id_on_unsaved_account() {
        let account = Account::with_email("user@example.org");
        assert!(matches!(
            account.require_id(),
            Err(crate::Error::DataIntegrity(_))
        ));
    }
}
