//! Triage storage: training examples, sender rules, audit log and
//! classification state.

use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};

use super::model::{
    ClassificationSource, ClassificationState, ClassificationStatus, PatternType, SenderRule,
    TrainingExample, TrainingSource, TriageFolder, TriageLogEntry,
};
use crate::database::parse_timestamp;
use crate::mail::EmailId;
use crate::{AccountId, Result};

/// Repository for everything triage persists.
#[derive(Debug, Clone)]
pub struct TriageRepository {
    pool: SqlitePool,
}

impl TriageRepository {
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
            CREATE TABLE IF NOT EXISTS training_examples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                from_domain TEXT NOT NULL,
                subject TEXT NOT NULL DEFAULT '',
                ai_suggestion TEXT,
                user_choice TEXT NOT NULL,
                was_correction INTEGER NOT NULL DEFAULT 0,
                source TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_training_examples_domain
            ON training_examples(account_id, from_domain)
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS sender_rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                pattern TEXT NOT NULL,
                pattern_type TEXT NOT NULL,
                target_folder TEXT NOT NULL,
                confidence REAL NOT NULL,
                correction_count INTEGER NOT NULL DEFAULT 0,
                auto_apply INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(account_id, pattern, pattern_type)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS triage_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email_id INTEGER NOT NULL,
                account_id INTEGER NOT NULL,
                pattern_folder TEXT NOT NULL,
                pattern_confidence REAL NOT NULL,
                llm_folder TEXT,
                final_folder TEXT NOT NULL,
                confidence REAL NOT NULL,
                source TEXT NOT NULL,
                moved INTEGER NOT NULL DEFAULT 0,
                reasoning TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS classification_state (
                email_id INTEGER PRIMARY KEY,
                account_id INTEGER NOT NULL,
                status TEXT NOT NULL,
                suggested_folder TEXT,
                confidence REAL,
                detail TEXT,
                updated_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ---- training examples ----

    /// Append a training example.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn record_example(&self, example: &TrainingExample) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO training_examples (
                account_id, from_domain, subject, ai_suggestion, user_choice,
                was_correction, source, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(example.account_id.0)
        .bind(example.from_domain.to_lowercase())
        .bind(&example.subject)
        .bind(example.ai_suggestion.map(|f| f.as_str()))
        .bind(example.user_choice.as_str())
        .bind(example.was_correction)
        .bind(example.source.as_str())
        .bind(example.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most relevant examples for a sender: same domain first, then
    /// corrections, then newest.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn relevant_examples(
        &self,
        account_id: AccountId,
        from_domain: &str,
        limit: u32,
    ) -> Result<Vec<TrainingExample>> {
        let rows = sqlx::query(
            r"
            SELECT account_id, from_domain, subject, ai_suggestion, user_choice,
                   was_correction, source, created_at
            FROM training_examples
            WHERE account_id = ?
            ORDER BY (from_domain = ?) DESC, was_correction DESC, created_at DESC, id DESC
            LIMIT ?
            ",
        )
        .bind(account_id.0)
        .bind(from_domain.to_lowercase())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_example).collect())
    }

    // ---- sender rules ----

    /// Get a sender rule by its key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_rule(
        &self,
        account_id: AccountId,
        pattern: &str,
        pattern_type: PatternType,
    ) -> Result<Option<SenderRule>> {
        let row = sqlx::query(
            r"
            SELECT account_id, pattern, pattern_type, target_folder, confidence,
                   correction_count, auto_apply
            FROM sender_rules
            WHERE account_id = ? AND pattern = ? AND pattern_type = ?
            ",
        )
        .bind(account_id.0)
        .bind(pattern.to_lowercase())
        .bind(pattern_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_rule))
    }

    /// Insert or replace a sender rule.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn save_rule(&self, rule: &SenderRule) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO sender_rules (
                account_id, pattern, pattern_type, target_folder, confidence,
                correction_count, auto_apply
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(account_id, pattern, pattern_type) DO UPDATE SET
                target_folder = excluded.target_folder,
                confidence = excluded.confidence,
                correction_count = excluded.correction_count,
                auto_apply = excluded.auto_apply,
                updated_at = CURRENT_TIMESTAMP
            ",
        )
        .bind(rule.account_id.0)
        .bind(rule.pattern.to_lowercase())
        .bind(rule.pattern_type.as_str())
        .bind(rule.target_folder.as_str())
        .bind(rule.confidence)
        .bind(i64::from(rule.correction_count))
        .bind(rule.auto_apply)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The auto-apply rule for a sender address, if any. Address rules win
    /// over domain rules.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn auto_apply_rule(
        &self,
        account_id: AccountId,
        address: &str,
    ) -> Result<Option<SenderRule>> {
        let address = address.to_lowercase();
        let domain = address.rsplit_once('@').map_or("", |(_, d)| d);

        let row = sqlx::query(
            r"
            SELECT account_id, pattern, pattern_type, target_folder, confidence,
                   correction_count, auto_apply
            FROM sender_rules
            WHERE account_id = ? AND auto_apply = 1
              AND ((pattern_type = 'address' AND pattern = ?)
                OR (pattern_type = 'domain' AND pattern = ?))
            ORDER BY (pattern_type = 'address') DESC, confidence DESC
            LIMIT 1
            ",
        )
        .bind(account_id.0)
        .bind(&address)
        .bind(domain)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_rule))
    }

    // ---- audit log ----

    /// Append an audit entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn append_log(&self, entry: &TriageLogEntry) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO triage_log (
                email_id, account_id, pattern_folder, pattern_confidence, llm_folder,
                final_folder, confidence, source, moved, reasoning, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(entry.email_id)
        .bind(entry.account_id.0)
        .bind(entry.pattern_folder.as_str())
        .bind(entry.pattern_confidence)
        .bind(entry.llm_folder.map(|f| f.as_str()))
        .bind(entry.final_folder.as_str())
        .bind(entry.confidence)
        .bind(entry.source.as_str())
        .bind(entry.moved)
        .bind(&entry.reasoning)
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Audit entries of an email, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn log_for_email(&self, email_id: EmailId) -> Result<Vec<TriageLogEntry>> {
        let rows = sqlx::query(
            r"
            SELECT email_id, account_id, pattern_folder, pattern_confidence, llm_folder,
                   final_folder, confidence, source, moved, reasoning, created_at
            FROM triage_log
            WHERE email_id = ?
            ORDER BY id ASC
            ",
        )
        .bind(email_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_log).collect())
    }

    // ---- classification state ----

    /// Replace the classification state of an email.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn set_state(&self, state: &ClassificationState) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO classification_state (
                email_id, account_id, status, suggested_folder, confidence, detail, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(email_id) DO UPDATE SET
                status = excluded.status,
                suggested_folder = excluded.suggested_folder,
                confidence = excluded.confidence,
                detail = excluded.detail,
                updated_at = excluded.updated_at
            ",
        )
        .bind(state.email_id)
        .bind(state.account_id.0)
        .bind(state.status.as_str())
        .bind(state.suggested_folder.map(|f| f.as_str()))
        .bind(state.confidence)
        .bind(&state.detail)
        .bind(state.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Change only the status of an existing state row.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::DataIntegrity`] if the email has no state.
    pub async fn set_status(&self, email_id: EmailId, status: ClassificationStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE classification_state SET status = ?, updated_at = ? WHERE email_id = ?",
        )
        .bind(status.as_str())
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(email_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(crate::Error::DataIntegrity(format!(
                "email {email_id} has no classification state"
            )));
        }
        Ok(())
    }

    /// Classification state of an email.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_state(&self, email_id: EmailId) -> Result<Option<ClassificationState>> {
        let row = sqlx::query(
            r"
            SELECT email_id, account_id, status, suggested_folder, confidence, detail, updated_at
            FROM classification_state
            WHERE email_id = ?
            ",
        )
        .bind(email_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_state))
    }

    /// States of an account with a given status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn states_with_status(
        &self,
        account_id: AccountId,
        status: ClassificationStatus,
    ) -> Result<Vec<ClassificationState>> {
        let rows = sqlx::query(
            r"
            SELECT email_id, account_id, status, suggested_folder, confidence, detail, updated_at
            FROM classification_state
            WHERE account_id = ? AND status = ?
            ORDER BY updated_at ASC
            ",
        )
        .bind(account_id.0)
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_state).collect())
    }
}

fn folder_column(row: &SqliteRow, column: &str) -> TriageFolder {
    TriageFolder::parse(row.get(column)).unwrap_or(TriageFolder::Review)
}

fn optional_folder_column(row: &SqliteRow, column: &str) -> Option<TriageFolder> {
    row.get::<Option<String>, _>(column)
        .and_then(|s| TriageFolder::parse(&s))
}

fn row_to_example(row: &SqliteRow) -> TrainingExample {
    TrainingExample {
        account_id: AccountId::new(row.get("account_id")),
        from_domain: row.get("from_domain"),
        subject: row.get("subject"),
        ai_suggestion: optional_folder_column(row, "ai_suggestion"),
        user_choice: folder_column(row, "user_choice"),
        was_correction: row.get("was_correction"),
        source: TrainingSource::parse(row.get("source")),
        created_at: parse_timestamp(row.get("created_at")),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn row_to_rule(row: &SqliteRow) -> SenderRule {
    SenderRule {
        account_id: AccountId::new(row.get("account_id")),
        pattern: row.get("pattern"),
        pattern_type: PatternType::parse(row.get("pattern_type")),
        target_folder: folder_column(row, "target_folder"),
        confidence: row.get("confidence"),
        correction_count: row.get::<i64, _>("correction_count") as u32,
        auto_apply: row.get("auto_apply"),
    }
}

fn row_to_log(row: &SqliteRow) -> TriageLogEntry {
    TriageLogEntry {
        email_id: row.get("email_id"),
        account_id: AccountId::new(row.get("account_id")),
        pattern_folder: folder_column(row, "pattern_folder"),
        pattern_confidence: row.get("pattern_confidence"),
        llm_folder: optional_folder_column(row, "llm_folder"),
        final_folder: folder_column(row, "final_folder"),
        confidence: row.get("confidence"),
        source: ClassificationSource::parse(row.get("source")),
        moved: row.get("moved"),
        reasoning: row.get("reasoning"),
        created_at: parse_timestamp(row.get("created_at")),
    }
}

fn row_to_state(row: &SqliteRow) -> ClassificationState {
    ClassificationState {
        email_id: row.get("email_id"),
        account_id: AccountId::new(row.get("account_id")),
        status: ClassificationStatus::parse(row.get("status")),
        suggested_folder: optional_folder_column(row, "suggested_folder"),
        confidence: row.get("confidence"),
        detail: row.get("detail"),
        updated_at: parse_timestamp(row.get("updated_at")),
    }
}
