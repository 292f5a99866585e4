//! Database handle: one sqlite pool shared by every repository.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use crate::Result;
use crate::account::AccountRepository;
use crate::mail::{EmailRepository, FolderRepository};
use crate::snooze::SnoozeRepository;
use crate::tasks::BudgetRepository;
use crate::triage::TriageRepository;

/// Owns the connection pool and hands out repositories over it.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open or create a database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created, the
    /// connection fails or schema creation fails.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());
        info!("Opening database at {}", path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let db = Self { pool };
        db.initialize().await?;
        Ok(db)
    }

    /// Open an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let db = Self { pool };
        db.initialize().await?;
        Ok(db)
    }

    async fn initialize(&self) -> Result<()> {
        debug!("Initializing database schema");
        self.accounts().initialize().await?;
        self.folders().initialize().await?;
        self.emails().initialize().await?;
        self.triage().initialize().await?;
        self.snoozes().initialize().await?;
        self.budget().initialize().await?;
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Account repository.
    #[must_use]
    pub fn accounts(&self) -> AccountRepository {
        AccountRepository::new(self.pool.clone())
    }

    /// Folder repository.
    #[must_use]
    pub fn folders(&self) -> FolderRepository {
        FolderRepository::new(self.pool.clone())
    }

    /// Email repository.
    #[must_use]
    pub fn emails(&self) -> EmailRepository {
        EmailRepository::new(self.pool.clone())
    }

    /// Training examples, sender rules, triage log and classification state.
    #[must_use]
    pub fn triage(&self) -> TriageRepository {
        TriageRepository::new(self.pool.clone())
    }

    /// Snooze repository.
    #[must_use]
    pub fn snoozes(&self) -> SnoozeRepository {
        SnoozeRepository::new(self.pool.clone())
    }

    /// Daily classification usage.
    #[must_use]
    pub fn budget(&self) -> BudgetRepository {
        BudgetRepository::new(self.pool.clone())
    }
}

/// Reads an RFC 3339 column. Unreadable values become "now" rather than
/// failing the whole row.
pub(crate) fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
