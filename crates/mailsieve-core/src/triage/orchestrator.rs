//! The single entry point for classifying and filing one email.
//!
//! Initial classification, reclassification and bulk triage all go through
//! [`TriageOrchestrator::triage_and_move_email`].

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::classifier::TriageClassifier;
use super::model::{
    ClassificationSource, ClassificationState, ClassificationStatus, PatternMatchResult,
    SenderRule, TriageClassificationResult, TriageLogEntry,
};
use super::pattern;
use super::repository::TriageRepository;
use crate::account::AccountRepository;
use crate::config::TriageSettings;
use crate::mail::{Email, EmailId, EmailRepository};
use crate::sync::FolderOperations;
use crate::tasks::ClassificationBudget;
use crate::Result;

/// Per-call triage knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriageOptions {
    /// Minimum confidence before the email is moved.
    pub confidence_threshold: f64,
}

impl Default for TriageOptions {
    fn default() -> Self {
        Self::from(&TriageSettings::default())
    }
}

impl From<&TriageSettings> for TriageOptions {
    fn from(settings: &TriageSettings) -> Self {
        Self {
            confidence_threshold: settings.confidence_threshold,
        }
    }
}

/// Pattern match, sender rules, arbiter, audit log and remote move.
pub struct TriageOrchestrator {
    accounts: AccountRepository,
    emails: EmailRepository,
    triage: TriageRepository,
    classifier: TriageClassifier,
    folder_ops: Arc<dyn FolderOperations>,
    budget: Option<ClassificationBudget>,
    training_examples: u32,
}

impl TriageOrchestrator {
    /// Training examples handed to the classifier by default.
    pub const DEFAULT_TRAINING_EXAMPLES: u32 = 10;

    /// Creates an orchestrator without a budget.
    #[must_use]
    pub fn new(
        accounts: AccountRepository,
        emails: EmailRepository,
        triage: TriageRepository,
        classifier: TriageClassifier,
        folder_ops: Arc<dyn FolderOperations>,
    ) -> Self {
        Self {
            accounts,
            emails,
            triage,
            classifier,
            folder_ops,
            budget: None,
            training_examples: Self::DEFAULT_TRAINING_EXAMPLES,
        }
    }

    /// Records arbiter usage against `budget`.
    #[must_use]
    pub fn with_budget(mut self, budget: ClassificationBudget) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Overrides how many training examples the classifier sees.
    #[must_use]
    pub const fn with_training_examples(mut self, count: u32) -> Self {
        self.training_examples = count;
        self
    }

    /// The classifier in use.
    #[must_use]
    pub const fn classifier(&self) -> &TriageClassifier {
        &self.classifier
    }

    /// Classifies an email and files it.
    ///
    /// Every call appends one audit log entry, whatever the outcome. The
    /// email is moved only when the confidence reaches the threshold and it
    /// is not already in the decided folder. Below the threshold the email
    /// waits for review.
    ///
    /// # Errors
    ///
    /// Returns an error if the email or its account is missing, storage
    /// fails, or the remote move fails. Arbiter failures are not errors;
    /// they produce the Review fallback. After the email is loaded, any
    /// failure is also persisted as its classification state.
    pub async fn triage_and_move_email(
        &self,
        email_id: EmailId,
        options: &TriageOptions,
    ) -> Result<TriageClassificationResult> {
        let email = self.emails.require(email_id).await?;

        match self.run(&email, email_id, options).await {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!("Triage of email {email_id} failed: {e}");
                let state = ClassificationState::error(email_id, email.account_id, e.to_string());
                if let Err(store_err) = self.triage.set_state(&state).await {
                    warn!("Could not record error state of email {email_id}: {store_err}");
                }
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        email: &Email,
        email_id: EmailId,
        options: &TriageOptions,
    ) -> Result<TriageClassificationResult> {
        let hint = pattern::match_email(email);

        let result = match self
            .triage
            .auto_apply_rule(email.account_id, &email.from_address)
            .await?
        {
            Some(rule) => {
                debug!("Sender rule {} decides email {email_id}", rule.pattern);
                from_rule(&rule, &hint)
            }
            None => self.classify(email, &hint).await?,
        };

        let target = result.folder.as_str();
        let confident = result.confidence >= options.confidence_threshold;
        let needs_move = confident && email.folder != target;

        let mut move_error = None;
        let moved = if needs_move {
            match self.move_email(email, email_id, target).await {
                Ok(()) => true,
                Err(e) => {
                    move_error = Some(e);
                    false
                }
            }
        } else {
            false
        };

        self.triage
            .append_log(&TriageLogEntry {
                email_id,
                account_id: email.account_id,
                pattern_folder: hint.folder,
                pattern_confidence: hint.confidence,
                llm_folder: (result.source == ClassificationSource::Arbiter).then_some(result.folder),
                final_folder: result.folder,
                confidence: result.confidence,
                source: result.source,
                moved,
                reasoning: result.reasoning.clone(),
                created_at: Utc::now(),
            })
            .await?;

        if let Some(e) = move_error {
            return Err(e);
        }

        let status = if confident {
            ClassificationStatus::Classified
        } else {
            ClassificationStatus::PendingReview
        };
        self.triage
            .set_state(&ClassificationState::from_result(
                email_id,
                email.account_id,
                status,
                &result,
            ))
            .await?;

        info!(
            "Email {email_id} -> {} ({:.2}, {}), moved: {moved}",
            result.folder,
            result.confidence,
            result.source.as_str()
        );
        Ok(result)
    }

    async fn classify(
        &self,
        email: &Email,
        hint: &PatternMatchResult,
    ) -> Result<TriageClassificationResult> {
        let examples = self
            .triage
            .relevant_examples(
                email.account_id,
                &email.from_domain().to_lowercase(),
                self.training_examples,
            )
            .await?;

        let outcome = self.classifier.classify_with_usage(email, hint, &examples).await;
        if let Some(budget) = &self.budget {
            budget.record(outcome.tokens).await?;
        }
        Ok(outcome.result)
    }

    async fn move_email(&self, email: &Email, email_id: EmailId, target: &str) -> Result<()> {
        let account = self.accounts.require(email.account_id).await?;
        let new_uid = self.folder_ops.move_email(&account, email, target).await?;
        self.emails.update_location(email_id, target, new_uid).await
    }
}

/// Result of an auto-applying sender rule. Pattern tags and hints are kept
/// when the rule agrees with the pattern matcher.
fn from_rule(rule: &SenderRule, hint: &PatternMatchResult) -> TriageClassificationResult {
    let agreed = rule.target_folder == hint.folder;
    TriageClassificationResult {
        folder: rule.target_folder,
        tags: hint.tags.clone(),
        confidence: rule.confidence.clamp(0.0, 1.0),
        snooze_until: hint.snooze_until.filter(|_| agreed),
        auto_delete_after: hint.auto_delete_after.filter(|_| agreed),
        pattern_hint: Some(hint.folder),
        pattern_agreed: agreed,
        reasoning: format!(
            "sender rule {} -> {} after {} corrections",
            rule.pattern, rule.target_folder, rule.correction_count
        ),
        source: ClassificationSource::SenderRule,
    }
}
