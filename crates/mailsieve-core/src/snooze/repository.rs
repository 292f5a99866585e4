//! Snooze storage repository.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};

use super::model::{SnoozeReason, SnoozedEmail};
use crate::database::parse_timestamp;
use crate::mail::EmailId;
use crate::{AccountId, Result};

/// Repository for pending snoozes. At most one per email.
#[derive(Debug, Clone)]
pub struct SnoozeRepository {
    pool: SqlitePool,
}

impl SnoozeRepository {
    /// Create a repository over an existing pool.
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize database schema.
    ///
    /// # Errors
    ///
    /// Returns an error if schema creation fails.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS snoozed_emails (
                email_id INTEGER PRIMARY KEY,
                account_id INTEGER NOT NULL,
                origin_folder TEXT NOT NULL,
                snooze_until TEXT NOT NULL,
                reason TEXT NOT NULL DEFAULT 'manual',
                snoozed_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_snoozed_until ON snoozed_emails(snooze_until)
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Snooze an email, replacing any earlier wake time. The origin folder
    /// of an existing snooze is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn snooze(&self, snooze: &SnoozedEmail) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO snoozed_emails
                (email_id, account_id, origin_folder, snooze_until, reason, snoozed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(email_id) DO UPDATE SET
                snooze_until = excluded.snooze_until,
                reason = excluded.reason,
                snoozed_at = excluded.snoozed_at
            ",
        )
        .bind(snooze.email_id)
        .bind(snooze.account_id.0)
        .bind(&snooze.origin_folder)
        .bind(snooze.snooze_until.to_rfc3339())
        .bind(snooze.reason.as_str())
        .bind(snooze.snoozed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// The pending snooze of an email.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, email_id: EmailId) -> Result<Option<SnoozedEmail>> {
        let row = sqlx::query(
            r"
            SELECT email_id, account_id, origin_folder, snooze_until, reason, snoozed_at
            FROM snoozed_emails
            WHERE email_id = ?
            ",
        )
        .bind(email_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_snooze))
    }

    /// Snoozes due at `now`, earliest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn due(&self, now: DateTime<Utc>) -> Result<Vec<SnoozedEmail>> {
        let rows = sqlx::query(
            r"
            SELECT email_id, account_id, origin_folder, snooze_until, reason, snoozed_at
            FROM snoozed_emails
            WHERE snooze_until <= ?
            ORDER BY snooze_until ASC
            ",
        )
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_snooze).collect())
    }

    /// Get all snoozes for an account.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list_for_account(&self, account_id: AccountId) -> Result<Vec<SnoozedEmail>> {
        let rows = sqlx::query(
            r"
            SELECT email_id, account_id, origin_folder, snooze_until, reason, snoozed_at
            FROM snoozed_emails
            WHERE account_id = ?
            ORDER BY snooze_until ASC
            ",
        )
        .bind(account_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_snooze).collect())
    }

    /// Remove a snooze.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn unsnooze(&self, email_id: EmailId) -> Result<()> {
        sqlx::query("DELETE FROM snoozed_emails WHERE email_id = ?")
            .bind(email_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn row_to_snooze(row: &SqliteRow) -> SnoozedEmail {
    SnoozedEmail {
        email_id: row.get("email_id"),
        account_id: AccountId::new(row.get("account_id")),
        origin_folder: row.get("origin_folder"),
        snooze_until: parse_timestamp(row.get("snooze_until")),
        reason: SnoozeReason::parse(row.get("reason")),
        snoozed_at: parse_timestamp(row.get("snoozed_at")),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::Database;
    use chrono::Duration;

    async fn repo() -> SnoozeRepository {
        Database::in_memory().await.unwrap().snoozes()
    }

    #[tokio::test]
    async fn test_due_returns_only_expired() {
        let repo = repo().await;
        let now = Utc::now();

        repo.snooze(&SnoozedEmail::new(1, AccountId(1), "INBOX", now - Duration::hours(1), SnoozeReason::Manual))
            .await
            .unwrap();
        repo.snooze(&SnoozedEmail::new(2, AccountId(1), "INBOX", now + Duration::hours(1), SnoozeReason::Manual))
            .await
            .unwrap();

        let due = repo.due(now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].email_id, 1);
        assert_eq!(repo.list_for_account(AccountId(1)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_resnooze_keeps_single_row_and_origin() {
        let repo = repo().await;
        let now = Utc::now();

        repo.snooze(&SnoozedEmail::new(1, AccountId(1), "Dev", now, SnoozeReason::Manual))
            .await
            .unwrap();
        repo.snooze(&SnoozedEmail::new(
            1,
            AccountId(1),
            "Snoozed",
            now + Duration::days(1),
            SnoozeReason::AwaitingReply,
        ))
        .await
        .unwrap();

        let stored = repo.get(1).await.unwrap().unwrap();
        assert_eq!(stored.origin_folder, "Dev");
        assert_eq!(stored.reason, SnoozeReason::AwaitingReply);
        assert!(repo.due(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsnooze() {
        let repo = repo().await;
        repo.snooze(&SnoozedEmail::new(1, AccountId(1), "INBOX", Utc::now(), SnoozeReason::Shipping))
            .await
            .unwrap();
        repo.unsnooze(1).await.unwrap();
        assert!(repo.get(1).await.unwrap().is_none());
    }
}
