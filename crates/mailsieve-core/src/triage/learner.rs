//! Turns user corrections into training examples and sender rules.

use chrono::Utc;
use tracing::{debug, info};

use super::model::{PatternType, SenderRule, TrainingExample, TrainingSource, TriageFolder};
use super::repository::TriageRepository;
use crate::Result;
use crate::mail::{EmailId, EmailRepository};

/// Confidence of a freshly learned rule.
pub const INITIAL_RULE_CONFIDENCE: f64 = 0.6;

/// Confidence gained per consistent correction.
pub const RULE_CONFIDENCE_STEP: f64 = 0.1;

/// Ceiling of learned confidence.
pub const MAX_RULE_CONFIDENCE: f64 = 0.95;

/// Consistent corrections before a rule applies itself.
pub const AUTO_APPLY_AFTER: u32 = 3;

/// Records decisions and maintains per-domain sender rules.
#[derive(Debug, Clone)]
pub struct SenderRuleLearner {
    emails: EmailRepository,
    triage: TriageRepository,
}

impl SenderRuleLearner {
    /// Creates a learner.
    #[must_use]
    pub const fn new(emails: EmailRepository, triage: TriageRepository) -> Self {
        Self { emails, triage }
    }

    /// Records the user's choice for an email after a triage suggestion.
    ///
    /// Always appends a training example. When the choice differs from the
    /// suggestion, the sender domain's rule is created or reinforced and
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the email is missing or a database query fails.
    pub async fn learn_from_triage_correction(
        &self,
        email_id: EmailId,
        ai_suggestion: Option<TriageFolder>,
        user_choice: TriageFolder,
    ) -> Result<Option<SenderRule>> {
        self.learn(email_id, ai_suggestion, user_choice, TrainingSource::TriageCorrection)
            .await
    }

    /// Like [`Self::learn_from_triage_correction`] with an explicit source.
    ///
    /// # Errors
    ///
    /// Returns an error if the email is missing or a database query fails.
    pub async fn learn(
        &self,
        email_id: EmailId,
        ai_suggestion: Option<TriageFolder>,
        user_choice: TriageFolder,
        source: TrainingSource,
    ) -> Result<Option<SenderRule>> {
        let email = self.emails.require(email_id).await?;
        let domain = email.from_domain().to_lowercase();
        let was_correction = ai_suggestion != Some(user_choice);

        self.triage
            .record_example(&TrainingExample {
                account_id: email.account_id,
                from_domain: domain.clone(),
                subject: email.subject.clone(),
                ai_suggestion,
                user_choice,
                was_correction,
                source,
                created_at: Utc::now(),
            })
            .await?;

        if !was_correction {
            return Ok(None);
        }
        if domain.is_empty() {
            debug!("Email {email_id} has no sender domain, no rule learned");
            return Ok(None);
        }

        let existing = self
            .triage
            .get_rule(email.account_id, &domain, PatternType::Domain)
            .await?;
        let rule = reinforce(existing, email.account_id, &domain, user_choice);
        self.triage.save_rule(&rule).await?;

        if rule.auto_apply {
            info!(
                "Sender rule {} -> {} applies automatically ({} corrections)",
                rule.pattern, rule.target_folder, rule.correction_count
            );
        }
        Ok(Some(rule))
    }
}

/// Applies one correction to a rule. A correction to a different folder
/// starts the rule over.
fn reinforce(
    existing: Option<SenderRule>,
    account_id: crate::AccountId,
    domain: &str,
    target: TriageFolder,
) -> SenderRule {
    match existing {
        Some(mut rule) if rule.target_folder == target => {
            rule.correction_count = rule.correction_count.saturating_add(1);
            rule.confidence = (rule.confidence + RULE_CONFIDENCE_STEP).min(MAX_RULE_CONFIDENCE);
            rule.auto_apply = rule.auto_apply || rule.correction_count >= AUTO_APPLY_AFTER;
            rule
        }
        _ => SenderRule {
            account_id,
            pattern: domain.to_string(),
            pattern_type: PatternType::Domain,
            target_folder: target,
            confidence: INITIAL_RULE_CONFIDENCE,
            correction_count: 1,
            auto_apply: false,
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::email;
    use crate::{AccountId, Database};

    async fn setup() -> (Database, SenderRuleLearner, Vec<EmailId>) {
        let db = Database::in_memory().await.unwrap();
        let batch: Vec<_> = (1..=4)
            .map(|uid| {
                let mut e = email(1, "INBOX", uid, &format!("m{uid}"));
                e.from_address = "builds@ci.example".to_string();
                e
            })
            .collect();
        let ids = db.emails().insert_batch(&batch).await.unwrap().inserted;
        let learner = SenderRuleLearner::new(db.emails(), db.triage());
        (db, learner, ids)
    }

    #[tokio::test]
    async fn test_three_consistent_corrections_enable_auto_apply() {
        let (db, learner, ids) = setup().await;

        let mut rule = None;
        for id in &ids[..3] {
            rule = learner
                .learn_from_triage_correction(*id, Some(TriageFolder::Inbox), TriageFolder::Dev)
                .await
                .unwrap();
        }

        let rule = rule.unwrap();
        assert!(rule.auto_apply);
        assert_eq!(rule.correction_count, 3);
        assert!(rule.confidence > INITIAL_RULE_CONFIDENCE);

        let stored = db
            .triage()
            .get_rule(AccountId(1), "ci.example", PatternType::Domain)
            .await
            .unwrap();
        assert_eq!(stored, Some(rule));
    }

    #[tokio::test]
    async fn test_two_corrections_do_not_auto_apply() {
        let (_db, learner, ids) = setup().await;
        let mut rule = None;
        for id in &ids[..2] {
            rule = learner
                .learn_from_triage_correction(*id, Some(TriageFolder::Inbox), TriageFolder::Dev)
                .await
                .unwrap();
        }
        assert!(!rule.unwrap().auto_apply);
    }

    #[tokio::test]
    async fn test_confirmation_records_example_without_rule() {
        let (db, learner, ids) = setup().await;

        let rule = learner
            .learn(ids[0], Some(TriageFolder::Dev), TriageFolder::Dev, TrainingSource::ReviewAccept)
            .await
            .unwrap();
        assert!(rule.is_none());

        let examples = db.triage().relevant_examples(AccountId(1), "ci.example", 10).await.unwrap();
        assert_eq!(examples.len(), 1);
        assert!(!examples[0].was_correction);
        assert_eq!(examples[0].source, TrainingSource::ReviewAccept);
    }

    #[tokio::test]
    async fn test_conflicting_correction_resets_rule() {
        let (_db, learner, ids) = setup().await;
        for id in &ids[..2] {
            learner
                .learn_from_triage_correction(*id, Some(TriageFolder::Inbox), TriageFolder::Dev)
                .await
                .unwrap();
        }
        let rule = learner
            .learn_from_triage_correction(ids[2], Some(TriageFolder::Dev), TriageFolder::Admin)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rule.target_folder, TriageFolder::Admin);
        assert_eq!(rule.correction_count, 1);
        assert!((rule.confidence - INITIAL_RULE_CONFIDENCE).abs() < f64::EPSILON);
    }

    #[test]
    fn test_confidence_is_capped() {
        let mut rule = reinforce(None, AccountId(1), "x.example", TriageFolder::Dev);
        for _ in 0..20 {
            rule = reinforce(Some(rule), AccountId(1), "x.example", TriageFolder::Dev);
        }
        assert!(rule.confidence <= MAX_RULE_CONFIDENCE);
        assert!(rule.auto_apply);
    }

    #[tokio::test]
    async fn test_missing_email_is_an_error() {
        let (_db, learner, _ids) = setup().await;
        assert!(matches!(
            learner.learn_from_triage_correction(999, None, TriageFolder::Dev).await,
            Err(crate::Error::DataIntegrity(_))
        ));
    }
}
