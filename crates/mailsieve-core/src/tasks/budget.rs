//! Daily classification budget.

use chrono::{Local, NaiveDate};
use sqlx::Row;
use sqlx::sqlite::SqlitePool;
use tracing::{debug, warn};

use crate::config::BudgetSettings;
use crate::{Error, Result};

/// Classification usage for one local calendar day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DailyUsage {
    /// Emails sent to the arbiter.
    pub email_count: u64,
    /// Estimated tokens consumed.
    pub token_count: u64,
}

/// Persists per-day usage counters.
#[derive(Debug, Clone)]
pub struct BudgetRepository {
    pool: SqlitePool,
}

impl BudgetRepository {
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
            CREATE TABLE IF NOT EXISTS classification_usage (
                day TEXT PRIMARY KEY,
                email_count INTEGER NOT NULL DEFAULT 0,
                token_count INTEGER NOT NULL DEFAULT 0
            )
            ",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Usage on `day`; zero if nothing was recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    #[allow(clippy::cast_sign_loss)]
    pub async fn usage(&self, day: NaiveDate) -> Result<DailyUsage> {
        let row = sqlx::query(
            "SELECT email_count, token_count FROM classification_usage WHERE day = ?",
        )
        .bind(day.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map_or_else(DailyUsage::default, |row| DailyUsage {
            email_count: row.get::<i64, _>("email_count") as u64,
            token_count: row.get::<i64, _>("token_count") as u64,
        }))
    }

    /// Adds to the counters of `day`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    #[allow(clippy::cast_possible_wrap)]
    pub async fn add(&self, day: NaiveDate, emails: u64, tokens: u64) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO classification_usage (day, email_count, token_count)
            VALUES (?, ?, ?)
            ON CONFLICT(day) DO UPDATE SET
                email_count = email_count + excluded.email_count,
                token_count = token_count + excluded.token_count
            ",
        )
        .bind(day.to_string())
        .bind(emails as i64)
        .bind(tokens as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Enforces the configured daily limits.
#[derive(Debug, Clone)]
pub struct ClassificationBudget {
    repo: BudgetRepository,
    limits: BudgetSettings,
}

impl ClassificationBudget {
    /// Creates a budget with the given limits.
    #[must_use]
    pub const fn new(repo: BudgetRepository, limits: BudgetSettings) -> Self {
        Self { repo, limits }
    }

    /// Fails if today's budget is used up.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BudgetExceeded`] when a limit is reached, or a
    /// database error.
    pub async fn ensure_available(&self) -> Result<()> {
        self.ensure_available_on(today()).await
    }

    /// Fails if the budget of `day` is used up.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BudgetExceeded`] when a limit is reached, or a
    /// database error.
    pub async fn ensure_available_on(&self, day: NaiveDate) -> Result<()> {
        let usage = self.repo.usage(day).await?;

        let checks = [
            (usage.email_count, self.limits.daily_email_limit),
            (usage.token_count, self.limits.daily_token_limit),
        ];
        for (used, limit) in checks {
            if let Some(limit) = limit {
                if used >= limit {
                    warn!("Classification budget exhausted: {used} of {limit}");
                    return Err(Error::BudgetExceeded { used, limit });
                }
            }
        }
        Ok(())
    }

    /// Records one classified email and its estimated tokens against today.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn record(&self, tokens: u64) -> Result<()> {
        self.record_on(today(), tokens).await
    }

    /// Records one classified email against `day`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn record_on(&self, day: NaiveDate, tokens: u64) -> Result<()> {
        self.repo.add(day, 1, tokens).await?;
        debug!("Recorded classification of ~{tokens} tokens for {day}");
        Ok(())
    }

    /// Today's usage.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn usage_today(&self) -> Result<DailyUsage> {
        self.repo.usage(today()).await
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}
