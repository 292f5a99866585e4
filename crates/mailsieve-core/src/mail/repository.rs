//! Email and folder storage.

use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use tracing::{debug, warn};

use super::model::{AttachmentInfo, BatchInsert, Email, EmailBody, EmailId, Folder};
use crate::database::parse_timestamp;
use crate::{AccountId, Result};

const EMAIL_COLUMNS: &str = r"
    id, account_id, folder, uid, message_id, subject, from_name, from_address,
    to_addresses, date, snippet, is_read, is_starred, has_attachments, size, body_fetched
";

/// Repository for emails and their cached bodies.
#[derive(Debug, Clone)]
pub struct EmailRepository {
    pool: SqlitePool,
}

impl EmailRepository {
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
            CREATE TABLE IF NOT EXISTS emails (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                folder TEXT NOT NULL,
                uid INTEGER,
                message_id TEXT NOT NULL,
                subject TEXT NOT NULL DEFAULT '',
                from_name TEXT,
                from_address TEXT NOT NULL DEFAULT '',
                to_addresses TEXT NOT NULL DEFAULT '[]',
                date TEXT NOT NULL,
                snippet TEXT,
                is_read INTEGER NOT NULL DEFAULT 0,
                is_starred INTEGER NOT NULL DEFAULT 0,
                has_attachments INTEGER NOT NULL DEFAULT 0,
                size INTEGER NOT NULL DEFAULT 0,
                body_fetched INTEGER NOT NULL DEFAULT 0,
                body_text TEXT,
                body_html TEXT,
                attachments_json TEXT,
                UNIQUE(account_id, message_id)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_emails_location
            ON emails(account_id, folder, uid)
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a batch of emails in one transaction.
    ///
    /// Emails already known by (account, Message-ID) are not duplicated;
    /// their folder, UID and flags are refreshed instead, so re-delivering a
    /// batch is harmless.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails; nothing is written then.
    pub async fn insert_batch(&self, emails: &[Email]) -> Result<BatchInsert> {
        let mut tx = self.pool.begin().await?;
        let mut outcome = BatchInsert::default();

        for email in emails {
            let existing: Option<i64> = sqlx::query_scalar(
                "SELECT id FROM emails WHERE account_id = ? AND message_id = ?",
            )
            .bind(email.account_id.0)
            .bind(&email.message_id)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(id) = existing {
                sqlx::query(
                    r"
                    UPDATE emails SET folder = ?, uid = ?, is_read = ?, is_starred = ?
                    WHERE id = ?
                    ",
                )
                .bind(&email.folder)
                .bind(email.uid.map(i64::from))
                .bind(email.is_read)
                .bind(email.is_starred)
                .bind(id)
                .execute(&mut *tx)
                .await?;
                outcome.refreshed += 1;
            } else {
                let result = sqlx::query(
                    r"
                    INSERT INTO emails (
                        account_id, folder, uid, message_id, subject, from_name, from_address,
                        to_addresses, date, snippet, is_read, is_starred, has_attachments, size
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ",
                )
                .bind(email.account_id.0)
                .bind(&email.folder)
                .bind(email.uid.map(i64::from))
                .bind(&email.message_id)
                .bind(&email.subject)
                .bind(&email.from_name)
                .bind(&email.from_address)
                .bind(serde_json::to_string(&email.to)?)
                .bind(email.date.to_rfc3339())
                .bind(&email.snippet)
                .bind(email.is_read)
                .bind(email.is_starred)
                .bind(email.has_attachments)
                .bind(i64::from(email.size))
                .execute(&mut *tx)
                .await?;
                outcome.inserted.push(result.last_insert_rowid());
            }
        }

        tx.commit().await?;
        debug!(
            "Stored batch: {} new, {} refreshed",
            outcome.inserted.len(),
            outcome.refreshed
        );
        Ok(outcome)
    }

    /// Get an email by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, id: EmailId) -> Result<Option<Email>> {
        let row = sqlx::query(&format!("SELECT {EMAIL_COLUMNS} FROM emails WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(row_to_email))
    }

    /// Get an email by ID, failing if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::DataIntegrity`] if the email is missing.
    pub async fn require(&self, id: EmailId) -> Result<Email> {
        self.get(id)
            .await?
            .ok_or_else(|| crate::Error::DataIntegrity(format!("email {id} not found")))
    }

    /// Find the email stored at a UID in a folder.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_by_uid(
        &self,
        account_id: AccountId,
        folder: &str,
        uid: u32,
    ) -> Result<Option<Email>> {
        let row = sqlx::query(&format!(
            "SELECT {EMAIL_COLUMNS} FROM emails WHERE account_id = ? AND folder = ? AND uid = ?"
        ))
        .bind(account_id.0)
        .bind(folder)
        .bind(i64::from(uid))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_email))
    }

    /// List emails in a folder, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list_folder(&self, account_id: AccountId, folder: &str) -> Result<Vec<Email>> {
        let rows = sqlx::query(&format!(
            "SELECT {EMAIL_COLUMNS} FROM emails WHERE account_id = ? AND folder = ? ORDER BY date DESC"
        ))
        .bind(account_id.0)
        .bind(folder)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_email).collect())
    }

    /// Record that an email now lives in another folder under another UID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn update_location(&self, id: EmailId, folder: &str, uid: Option<u32>) -> Result<()> {
        sqlx::query("UPDATE emails SET folder = ?, uid = ? WHERE id = ?")
            .bind(folder)
            .bind(uid.map(i64::from))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Forget every UID in a folder after its validity token changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn clear_uids(&self, account_id: AccountId, folder: &str) -> Result<u64> {
        let result = sqlx::query("UPDATE emails SET uid = NULL WHERE account_id = ? AND folder = ?")
            .bind(account_id.0)
            .bind(folder)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Update read/starred flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn set_flags(&self, id: EmailId, is_read: bool, is_starred: bool) -> Result<()> {
        sqlx::query("UPDATE emails SET is_read = ?, is_starred = ? WHERE id = ?")
            .bind(is_read)
            .bind(is_starred)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Get the cached body, if it has been fetched.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn body(&self, id: EmailId) -> Result<Option<EmailBody>> {
        let row = sqlx::query(
            r"
            SELECT body_text, body_html, attachments_json
            FROM emails
            WHERE id = ? AND body_fetched = 1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let attachments = row
                .get::<Option<String>, _>("attachments_json")
                .and_then(|json| match serde_json::from_str::<Vec<AttachmentInfo>>(&json) {
                    Ok(list) => Some(list),
                    Err(e) => {
                        warn!("Discarding unreadable attachment list of email {id}: {e}");
                        None
                    }
                })
                .unwrap_or_default();

            EmailBody {
                text: row.get("body_text"),
                html: row.get("body_html"),
                attachments,
            }
        }))
    }

    /// Store a fetched body and mark the email as body-fetched.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the database query fails.
    pub async fn save_body(&self, id: EmailId, body: &EmailBody) -> Result<()> {
        let attachments_json = serde_json::to_string(&body.attachments)?;
        let has_attachments = !body.attachments.is_empty();

        sqlx::query(
            r"
            UPDATE emails SET
                body_text = ?, body_html = ?, attachments_json = ?,
                snippet = COALESCE(?, snippet),
                has_attachments = (has_attachments OR ?),
                body_fetched = 1
            WHERE id = ?
            ",
        )
        .bind(&body.text)
        .bind(&body.html)
        .bind(attachments_json)
        .bind(body.snippet())
        .bind(has_attachments)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Repository for folders and their sync cursors.
#[derive(Debug, Clone)]
pub struct FolderRepository {
    pool: SqlitePool,
}

impl FolderRepository {
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
            CREATE TABLE IF NOT EXISTS folders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                path TEXT NOT NULL,
                uid_validity INTEGER,
                last_uid INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(account_id, path)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get a folder record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, account_id: AccountId, path: &str) -> Result<Option<Folder>> {
        let row = sqlx::query(
            r"
            SELECT account_id, path, uid_validity, last_uid
            FROM folders
            WHERE account_id = ? AND path = ?
            ",
        )
        .bind(account_id.0)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_folder))
    }

    /// Get a folder record, creating an empty one if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn resolve(&self, account_id: AccountId, path: &str) -> Result<Folder> {
        sqlx::query("INSERT OR IGNORE INTO folders (account_id, path) VALUES (?, ?)")
            .bind(account_id.0)
            .bind(path)
            .execute(&self.pool)
            .await?;

        self.get(account_id, path).await?.ok_or_else(|| {
            crate::Error::DataIntegrity(format!("folder {path} vanished after creation"))
        })
    }

    /// List folders of an account.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list(&self, account_id: AccountId) -> Result<Vec<Folder>> {
        let rows = sqlx::query(
            r"
            SELECT account_id, path, uid_validity, last_uid
            FROM folders
            WHERE account_id = ?
            ORDER BY path ASC
            ",
        )
        .bind(account_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_folder).collect())
    }

    /// Advance the cursor. Lower values are ignored so the cursor never moves
    /// backwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn advance_cursor(&self, account_id: AccountId, path: &str, uid: u32) -> Result<()> {
        sqlx::query(
            r"
            UPDATE folders SET last_uid = MAX(last_uid, ?), updated_at = CURRENT_TIMESTAMP
            WHERE account_id = ? AND path = ?
            ",
        )
        .bind(i64::from(uid))
        .bind(account_id.0)
        .bind(path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Adopt a new validity token and rewind the cursor to zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn reset_cursor(
        &self,
        account_id: AccountId,
        path: &str,
        uid_validity: u32,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE folders SET uid_validity = ?, last_uid = 0, updated_at = CURRENT_TIMESTAMP
            WHERE account_id = ? AND path = ?
            ",
        )
        .bind(i64::from(uid_validity))
        .bind(account_id.0)
        .bind(path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete a folder record. Emails are left alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete(&self, account_id: AccountId, path: &str) -> Result<()> {
        sqlx::query("DELETE FROM folders WHERE account_id = ? AND path = ?")
            .bind(account_id.0)
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn row_to_email(row: &SqliteRow) -> Email {
    let to_json: String = row.get("to_addresses");
    Email {
        id: Some(row.get("id")),
        account_id: AccountId::new(row.get("account_id")),
        folder: row.get("folder"),
        uid: row.get::<Option<i64>, _>("uid").map(|uid| uid as u32),
        message_id: row.get("message_id"),
        subject: row.get("subject"),
        from_name: row.get("from_name"),
        from_address: row.get("from_address"),
        to: serde_json::from_str(&to_json).unwrap_or_default(),
        date: parse_timestamp(row.get("date")),
        snippet: row.get("snippet"),
        is_read: row.get("is_read"),
        is_starred: row.get("is_starred"),
        has_attachments: row.get("has_attachments"),
        size: row.get::<i64, _>("size") as u32,
        body_fetched: row.get("body_fetched"),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn row_to_folder(row: &SqliteRow) -> Folder {
    Folder {
        account_id: AccountId::new(row.get("account_id")),
        path: row.get("path"),
        uid_validity: row
            .get::<Option<i64>, _>("uid_validity")
            .map(|v| v as u32),
        last_uid: row.get::<i64, _>("last_uid") as u32,
    }
}
