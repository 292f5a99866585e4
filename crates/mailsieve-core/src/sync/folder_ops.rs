//! Remote folder operations.

use std::sync::Arc;

use async_trait::async_trait;
use mailsieve_imap::SearchQuery;
use tracing::{debug, info};

use super::registry::{SessionLease, SessionRegistry};
use crate::account::Account;
use crate::mail::Email;
use crate::snooze::SNOOZED_FOLDER;
use crate::triage::TriageFolder;
use crate::{Error, Result};

/// Folder-level operations against the server.
///
/// Callers own local state: after a move they record the returned UID.
#[async_trait]
pub trait FolderOperations: Send + Sync {
    /// Creates a folder.
    async fn create_folder(&self, account: &Account, path: &str) -> Result<()>;

    /// Deletes a folder.
    async fn delete_folder(&self, account: &Account, path: &str) -> Result<()>;

    /// Lists every folder path.
    async fn list_folders(&self, account: &Account) -> Result<Vec<String>>;

    /// Moves an email to `destination`, returning its UID there if the server
    /// lets us find it.
    async fn move_email(&self, account: &Account, email: &Email, destination: &str)
    -> Result<Option<u32>>;

    /// Moves an email to the provider's trash folder.
    async fn move_to_trash(&self, account: &Account, email: &Email) -> Result<Option<u32>> {
        let trash = account.provider_paths().trash;
        self.move_email(account, email, trash).await
    }

    /// Creates the triage and snooze folders that do not exist yet,
    /// returning the ones created.
    async fn ensure_standard_folders(&self, account: &Account) -> Result<Vec<String>>;

    /// Stores a copy of sent mail. Returns `false` when skipped because the
    /// provider files sent mail itself.
    async fn append_to_sent(&self, account: &Account, raw: &[u8]) -> Result<bool>;
}

/// Every folder triage and snooze may move mail into.
#[must_use]
pub fn standard_folders() -> Vec<&'static str> {
    TriageFolder::ALL
        .iter()
        .map(TriageFolder::as_str)
        .chain(std::iter::once(SNOOZED_FOLDER))
        .collect()
}

/// [`FolderOperations`] over pooled IMAP sessions.
pub struct ImapFolderOperations {
    registry: Arc<SessionRegistry>,
}

impl ImapFolderOperations {
    /// Creates folder operations over a session registry.
    #[must_use]
    pub const fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    async fn locate(session: &mut SessionLease, email: &Email) -> Result<Option<u32>> {
        let found = session
            .uid_search(&SearchQuery::MessageId(email.message_id.clone()))
            .await?;
        Ok(found.last().copied())
    }

    async fn move_on(
        session: &mut SessionLease,
        email: &Email,
        destination: &str,
    ) -> Result<Option<u32>> {
        session.select(&email.folder).await?;
        let uid = match email.uid {
            Some(uid) => uid,
            None => Self::locate(session, email).await?.ok_or_else(|| {
                Error::DataIntegrity(format!(
                    "{} not found in {} on the server",
                    email.message_id, email.folder
                ))
            })?,
        };

        session.uid_move(uid, destination).await?;
        info!("Moved {} from {} to {destination}", email.message_id, email.folder);

        session.select(destination).await?;
        let new_uid = Self::locate(session, email).await?;
        if new_uid.is_none() {
            debug!("{} not found in {destination} after move", email.message_id);
        }
        Ok(new_uid)
    }

    async fn create_missing(session: &mut SessionLease) -> Result<Vec<String>> {
        let existing = session.list_mailboxes().await?;

        let mut created = Vec::new();
        for folder in standard_folders() {
            if existing.iter().any(|e| e.eq_ignore_ascii_case(folder)) {
                continue;
            }
            session.create_mailbox(folder).await?;
            info!("Created folder {folder}");
            created.push(folder.to_string());
        }
        Ok(created)
    }
}

#[async_trait]
impl FolderOperations for ImapFolderOperations {
    async fn create_folder(&self, account: &Account, path: &str) -> Result<()> {
        let mut session = self.registry.acquire(account).await?;
        let result = session.create_mailbox(path).await.map_err(Error::from);
        self.registry.release(session, result)?;
        info!("Created folder {path}");
        Ok(())
    }

    async fn delete_folder(&self, account: &Account, path: &str) -> Result<()> {
        let mut session = self.registry.acquire(account).await?;
        let result = session.delete_mailbox(path).await.map_err(Error::from);
        self.registry.release(session, result)?;
        info!("Deleted folder {path}");
        Ok(())
    }

    async fn list_folders(&self, account: &Account) -> Result<Vec<String>> {
        let mut session = self.registry.acquire(account).await?;
        let result = session.list_mailboxes().await.map_err(Error::from);
        self.registry.release(session, result)
    }

    async fn move_email(
        &self,
        account: &Account,
        email: &Email,
        destination: &str,
    ) -> Result<Option<u32>> {
        let mut session = self.registry.acquire(account).await?;
        let result = Self::move_on(&mut session, email, destination).await;
        self.registry.release(session, result)
    }

    async fn ensure_standard_folders(&self, account: &Account) -> Result<Vec<String>> {
        let mut session = self.registry.acquire(account).await?;
        let result = Self::create_missing(&mut session).await;
        self.registry.release(session, result)
    }

    async fn append_to_sent(&self, account: &Account, raw: &[u8]) -> Result<bool> {
        let paths = account.provider_paths();
        if paths.auto_saves_sent {
            debug!("{:?} files sent mail itself, skipping append", paths.provider);
            return Ok(false);
        }

        let mut session = self.registry.acquire(account).await?;
        let result = session
            .append(paths.sent, r"(\Seen)", raw)
            .await
            .map_err(Error::from);
        self.registry.release(session, result)?;
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::{FakeConnector, FakeServer, email, test_account};

    fn ops(server: &FakeServer) -> ImapFolderOperations {
        let (connector, credentials) = FakeConnector::new(server.clone());
        ImapFolderOperations::new(Arc::new(SessionRegistry::new(connector, credentials)))
    }

    #[tokio::test]
    async fn test_move_reports_new_uid() {
        let server = FakeServer::default();
        server.add_message("INBOX", 42, "<a@test>");
        let ops = ops(&server);

        let new_uid = ops
            .move_email(&test_account(1), &email(1, "INBOX", 42, "a"), "Dev")
            .await
            .unwrap();

        assert!(new_uid.is_some());
        assert_eq!(server.moves(), vec![(42, "Dev".to_string())]);
        assert!(server.uids("INBOX").is_empty());
    }

    #[tokio::test]
    async fn test_move_without_uid_searches_by_message_id() {
        let server = FakeServer::default();
        server.add_message("INBOX", 7, "<a@test>");
        let ops = ops(&server);

        let mut stale = email(1, "INBOX", 1, "a");
        stale.uid = None;
        ops.move_email(&test_account(1), &stale, "Dev").await.unwrap();
        assert_eq!(server.moves(), vec![(7, "Dev".to_string())]);
    }

    #[tokio::test]
    async fn test_move_of_vanished_message_fails() {
        let server = FakeServer::default();
        let ops = ops(&server);
        let mut gone = email(1, "INBOX", 1, "a");
        gone.uid = None;

        assert!(matches!(
            ops.move_email(&test_account(1), &gone, "Dev").await,
            Err(Error::DataIntegrity(_))
        ));
    }

    #[tokio::test]
    async fn test_dead_session_is_replaced_on_next_move() {
        let server = FakeServer::default();
        server.add_message("INBOX", 1, "<a@test>");
        server.add_message("INBOX", 2, "<b@test>");
        server.kill_next_session();
        let ops = ops(&server);

        assert!(matches!(
            ops.move_email(&test_account(1), &email(1, "INBOX", 1, "a"), "Dev").await,
            Err(Error::Connection(_))
        ));
        ops.move_email(&test_account(1), &email(1, "INBOX", 2, "b"), "Dev")
            .await
            .unwrap();

        assert_eq!(server.connects(), 2);
        assert_eq!(server.moves(), vec![(2, "Dev".to_string())]);
    }

    #[tokio::test]
    async fn test_ensure_standard_folders_creates_missing_only() {
        let server = FakeServer::default();
        server.add_mailbox("Dev");
        let ops = ops(&server);

        let created = ops.ensure_standard_folders(&test_account(1)).await.unwrap();
        assert!(created.contains(&"Snoozed".to_string()));
        assert!(created.contains(&"Review".to_string()));
        assert!(!created.contains(&"Dev".to_string()));
        assert!(!created.contains(&"INBOX".to_string()));

        let again = ops.ensure_standard_folders(&test_account(1)).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_append_to_sent_skips_auto_saving_providers() {
        let server = FakeServer::default();
        let ops = ops(&server);

        let mut gmail = test_account(1);
        gmail.imap.host = "imap.gmail.com".to_string();
        assert!(!ops.append_to_sent(&gmail, b"raw").await.unwrap());
        assert_eq!(server.appends(), 0);

        assert!(ops.append_to_sent(&test_account(1), b"raw").await.unwrap());
        assert_eq!(server.appends(), 1);
    }
}
