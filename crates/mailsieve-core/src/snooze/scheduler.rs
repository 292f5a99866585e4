//! Parks emails in the snooze folder and brings them back when due.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::model::{SNOOZED_FOLDER, SnoozeReason, SnoozedEmail};
use super::repository::SnoozeRepository;
use crate::account::AccountRepository;
use crate::mail::{Email, EmailId, EmailRepository};
use crate::sync::FolderOperations;
use crate::{Error, Result};

/// Result of one wake-up sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Emails moved back to their origin folder.
    pub woken: usize,
    /// Due snoozes that could not be processed; they are retried next sweep.
    pub failed: usize,
}

/// Snoozes, unsnoozes and wakes emails.
pub struct SnoozeScheduler {
    accounts: AccountRepository,
    emails: EmailRepository,
    snoozes: SnoozeRepository,
    folder_ops: Arc<dyn FolderOperations>,
}

impl SnoozeScheduler {
    /// Creates a scheduler.
    #[must_use]
    pub fn new(
        accounts: AccountRepository,
        emails: EmailRepository,
        snoozes: SnoozeRepository,
        folder_ops: Arc<dyn FolderOperations>,
    ) -> Self {
        Self {
            accounts,
            emails,
            snoozes,
            folder_ops,
        }
    }

    /// Moves an email to the snooze folder until `until`.
    ///
    /// Snoozing an already snoozed email only changes its wake time.
    ///
    /// # Errors
    ///
    /// Returns an error if the email or its account is missing, or the move
    /// fails. Nothing is stored when the move fails.
    pub async fn snooze_email(
        &self,
        email_id: EmailId,
        until: DateTime<Utc>,
        reason: SnoozeReason,
    ) -> Result<SnoozedEmail> {
        let email = self.emails.require(email_id).await?;

        let origin = match self.snoozes.get(email_id).await? {
            Some(existing) => existing.origin_folder,
            None => email.folder.clone(),
        };

        if email.folder != SNOOZED_FOLDER {
            self.relocate(&email, SNOOZED_FOLDER).await?;
        }

        let snooze = SnoozedEmail::new(email_id, email.account_id, origin, until, reason);
        self.snoozes.snooze(&snooze).await?;
        info!("Snoozed email {email_id} until {until}");
        Ok(snooze)
    }

    /// Wakes an email now, returning it to its origin folder.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DataIntegrity`] if the email is not snoozed, or an
    /// error if the move fails.
    pub async fn unsnooze_email(&self, email_id: EmailId) -> Result<()> {
        let snooze = self
            .snoozes
            .get(email_id)
            .await?
            .ok_or_else(|| Error::DataIntegrity(format!("email {email_id} is not snoozed")))?;
        self.wake(&snooze).await
    }

    /// Wakes every snooze due now.
    ///
    /// # Errors
    ///
    /// Returns an error only if the due list cannot be read; per-email
    /// failures are logged and counted.
    pub async fn process_snoozed_emails(&self) -> Result<SweepOutcome> {
        self.process_due_at(Utc::now()).await
    }

    /// Wakes every snooze due at `now`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the due list cannot be read.
    pub async fn process_due_at(&self, now: DateTime<Utc>) -> Result<SweepOutcome> {
        let due = self.snoozes.due(now).await?;
        let mut outcome = SweepOutcome::default();

        for snooze in &due {
            match self.wake(snooze).await {
                Ok(()) => outcome.woken += 1,
                Err(e) => {
                    warn!("Failed to wake email {}: {e}", snooze.email_id);
                    outcome.failed += 1;
                }
            }
        }

        if !due.is_empty() {
            info!(
                "Snooze sweep: {} woken, {} failed",
                outcome.woken, outcome.failed
            );
        }
        Ok(outcome)
    }

    /// Runs [`Self::process_snoozed_emails`] every `interval` until aborted.
    #[must_use]
    pub fn spawn_sweep(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = scheduler.process_snoozed_emails().await {
                    warn!("Snooze sweep failed: {e}");
                }
            }
        })
    }

    async fn wake(&self, snooze: &SnoozedEmail) -> Result<()> {
        let Some(email) = self.emails.get(snooze.email_id).await? else {
            self.snoozes.unsnooze(snooze.email_id).await?;
            return Err(Error::DataIntegrity(format!(
                "snoozed email {} no longer exists",
                snooze.email_id
            )));
        };

        if email.folder != snooze.origin_folder {
            self.relocate(&email, &snooze.origin_folder).await?;
        }
        self.snoozes.unsnooze(snooze.email_id).await?;
        debug!(
            "Woke email {} back into {}",
            snooze.email_id, snooze.origin_folder
        );
        Ok(())
    }

    async fn relocate(&self, email: &Email, destination: &str) -> Result<()> {
        let id = email.require_id()?;
        let account = self.accounts.require(email.account_id).await?;
        let new_uid = self.folder_ops.move_email(&account, email, destination).await?;
        self.emails.update_location(id, destination, new_uid).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::Database;
    use crate::sync::{ImapFolderOperations, SessionRegistry};
    use crate::test_support::{FakeConnector, FakeServer, email, seed_account};
    use chrono::Duration as ChronoDuration;

    struct Harness {
        db: Database,
        server: FakeServer,
        scheduler: SnoozeScheduler,
    }

    async fn harness() -> Harness {
        let db = Database::in_memory().await.unwrap();
        seed_account(&db).await;
        let server = FakeServer::default();
        let (connector, credentials) = FakeConnector::new(server.clone());
        let registry = Arc::new(SessionRegistry::new(connector, credentials));
        let scheduler = SnoozeScheduler::new(
            db.accounts(),
            db.emails(),
            db.snoozes(),
            Arc::new(ImapFolderOperations::new(registry)),
        );
        Harness {
            db,
            server,
            scheduler,
        }
    }

    async fn stored(h: &Harness, folder: &str, uid: u32, key: &str) -> EmailId {
        h.server.add_message(folder, uid, &format!("<{key}@test>"));
        h.db
            .emails()
            .insert_batch(&[email(1, folder, uid, key)])
            .await
            .unwrap()
            .inserted[0]
    }

    #[tokio::test]
    async fn test_snooze_then_wake_round_trip() {
        let h = harness().await;
        let id = stored(&h, "Dev", 5, "a").await;
        let until = Utc::now() + ChronoDuration::hours(2);

        h.scheduler.snooze_email(id, until, SnoozeReason::Manual).await.unwrap();
        let parked = h.db.emails().require(id).await.unwrap();
        assert_eq!(parked.folder, SNOOZED_FOLDER);
        assert_eq!(h.server.uids(SNOOZED_FOLDER).len(), 1);

        let early = h.scheduler.process_due_at(Utc::now()).await.unwrap();
        assert_eq!(early, SweepOutcome::default());

        let outcome = h
            .scheduler
            .process_due_at(until + ChronoDuration::seconds(1))
            .await
            .unwrap();
        assert_eq!(outcome.woken, 1);
        assert_eq!(h.db.emails().require(id).await.unwrap().folder, "Dev");
        assert!(h.db.snoozes().get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resnooze_keeps_origin() {
        let h = harness().await;
        let id = stored(&h, "Dev", 5, "a").await;
        let now = Utc::now();

        h.scheduler.snooze_email(id, now, SnoozeReason::Manual).await.unwrap();
        let again = h
            .scheduler
            .snooze_email(id, now + ChronoDuration::days(1), SnoozeReason::Manual)
            .await
            .unwrap();
        assert_eq!(again.origin_folder, "Dev");
        assert_eq!(h.server.moves().len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_continues_past_failures() {
        let h = harness().await;
        let good = stored(&h, "INBOX", 1, "good").await;
        let bad = stored(&h, "INBOX", 2, "bad").await;
        let now = Utc::now();

        h.scheduler.snooze_email(bad, now, SnoozeReason::Manual).await.unwrap();
        h.scheduler.snooze_email(good, now, SnoozeReason::Manual).await.unwrap();
        h.server.remove_message(SNOOZED_FOLDER, "<bad@test>");

        let outcome = h.scheduler.process_due_at(now).await.unwrap();
        assert_eq!(outcome, SweepOutcome { woken: 1, failed: 1 });
        assert_eq!(h.db.emails().require(good).await.unwrap().folder, "INBOX");
        assert!(h.db.snoozes().get(bad).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unsnooze_of_unsnoozed_email_fails() {
        let h = harness().await;
        let id = stored(&h, "INBOX", 1, "a").await;
        assert!(matches!(
            h.scheduler.unsnooze_email(id).await,
            Err(Error::DataIntegrity(_))
        ));
    }

    #[tokio::test]
    async fn test_unsnooze_wakes_immediately() {
        let h = harness().await;
        let id = stored(&h, "INBOX", 1, "a").await;
        h.scheduler
            .snooze_email(id, Utc::now() + ChronoDuration::days(3), SnoozeReason::Shipping)
            .await
            .unwrap();

        h.scheduler.unsnooze_email(id).await.unwrap();
        assert_eq!(h.db.emails().require(id).await.unwrap().folder, "INBOX");
    }
}
