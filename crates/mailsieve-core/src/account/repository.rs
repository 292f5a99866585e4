//! Accounts table.

use sqlx::Row;
use sqlx::sqlite::SqlitePool;
use tracing::debug;

use super::model::{Account, AccountId, ImapConfig};
use crate::{Error, Result};

/// Stores accounts. Passwords live in a [`super::CredentialStore`].
#[derive(Debug, Clone)]
pub struct AccountRepository {
    pool: SqlitePool,
}

impl AccountRepository {
    /// Create a repository over an existing pool.
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates the accounts table.
    ///
    /// # Errors
    ///
    /// Returns an error if schema creation fails.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                imap_host TEXT NOT NULL,
                imap_port INTEGER NOT NULL,
                imap_username TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Every account, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query(
            r"
            SELECT id, name, email, imap_host, imap_port, imap_username
            FROM accounts
            ORDER BY name ASC, id ASC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_account).collect())
    }

    /// Looks up an account.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, id: AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(
            r"
            SELECT id, name, email, imap_host, imap_port, imap_username
            FROM accounts
            WHERE id = ?
            ",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_account))
    }

    /// Get an account that must exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DataIntegrity`] if the account is missing, or an
    /// error if the database query fails.
    pub async fn require(&self, id: AccountId) -> Result<Account> {
        self.get(id)
            .await?
            .ok_or_else(|| Error::DataIntegrity(format!("account {id} not found")))
    }

    /// Save an account (insert or update). Assigns the ID on insert.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn save(&self, account: &mut Account) -> Result<()> {
        if let Some(id) = account.id {
            sqlx::query(
                r"
                UPDATE accounts SET
                    name = ?, email = ?,
                    imap_host = ?, imap_port = ?, imap_username = ?,
                    updated_at = CURRENT_TIMESTAMP
                WHERE id = ?
                ",
            )
            .bind(&account.name)
            .bind(&account.email)
            .bind(&account.imap.host)
            .bind(i64::from(account.imap.port))
            .bind(&account.imap.username)
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        } else {
            let result = sqlx::query(
                r"
                INSERT INTO accounts (name, email, imap_host, imap_port, imap_username)
                VALUES (?, ?, ?, ?, ?)
                ",
            )
            .bind(&account.name)
            .bind(&account.email)
            .bind(&account.imap.host)
            .bind(i64::from(account.imap.port))
            .bind(&account.imap.username)
            .execute(&self.pool)
            .await?;

            let new_id = AccountId::new(result.last_insert_rowid());
            debug!("Created account {} ({})", new_id, account.email);
            account.id = Some(new_id);
        }

        Ok(())
    }

    /// Removes an account. Its mail, triage and snooze rows are left to the
    /// caller.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete(&self, id: AccountId) -> Result<()> {
        sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn row_to_account(row: &sqlx::sqlite::SqliteRow) -> Account {
    Account {
        id: Some(AccountId::new(row.get("id"))),
        name: row.get("name"),
        email: row.get("email"),
        imap: ImapConfig {
            host: row.get("imap_host"),
            port: row.get::<i64, _>("imap_port") as u16,
            username: row.get("imap_username"),
        },
    }
}
