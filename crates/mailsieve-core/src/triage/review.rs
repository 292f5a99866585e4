//! Acting on classifications that waited for the user.

use std::sync::Arc;

use tracing::{info, warn};

use super::learner::SenderRuleLearner;
use super::model::{
    ClassificationState, ClassificationStatus, SenderRule, TrainingSource, TriageFolder,
};
use super::repository::TriageRepository;
use crate::account::AccountRepository;
use crate::mail::{Email, EmailId, EmailRepository};
use crate::sync::FolderOperations;
use crate::{Error, Result};

/// Per-item tally of a bulk review action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    /// Items handled.
    pub succeeded: usize,
    /// Items that failed; the rest were still processed.
    pub failed: usize,
}

/// Accept, dismiss or correct triage suggestions.
pub struct ReviewService {
    accounts: AccountRepository,
    emails: EmailRepository,
    triage: TriageRepository,
    learner: SenderRuleLearner,
    folder_ops: Arc<dyn FolderOperations>,
}

impl ReviewService {
    /// Creates a review service.
    #[must_use]
    pub fn new(
        accounts: AccountRepository,
        emails: EmailRepository,
        triage: TriageRepository,
        folder_ops: Arc<dyn FolderOperations>,
    ) -> Self {
        let learner = SenderRuleLearner::new(emails.clone(), triage.clone());
        Self {
            accounts,
            emails,
            triage,
            learner,
            folder_ops,
        }
    }

    /// Emails waiting for review, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn pending(&self, account_id: crate::AccountId) -> Result<Vec<ClassificationState>> {
        self.triage
            .states_with_status(account_id, ClassificationStatus::PendingReview)
            .await
    }

    /// Files the email where the classifier suggested and records the
    /// confirmation as a training example.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DataIntegrity`] if the email has no suggestion, or
    /// an error if the move or storage fails.
    pub async fn accept(&self, email_id: EmailId) -> Result<()> {
        let suggestion = self.suggestion(email_id).await?.ok_or_else(|| {
            Error::DataIntegrity(format!("email {email_id} has no suggestion to accept"))
        })?;

        self.file(email_id, suggestion).await?;
        self.learner
            .learn(email_id, Some(suggestion), suggestion, TrainingSource::ReviewAccept)
            .await?;
        self.triage
            .set_status(email_id, ClassificationStatus::Accepted)
            .await?;
        info!("Accepted {suggestion} for email {email_id}");
        Ok(())
    }

    /// Rejects the suggestion and leaves the email in the inbox.
    ///
    /// # Errors
    ///
    /// Returns an error if the email is missing, or the move or storage
    /// fails.
    pub async fn dismiss(&self, email_id: EmailId) -> Result<()> {
        let email = self.emails.require(email_id).await?;
        let account = self.accounts.require(email.account_id).await?;
        let inbox = account.provider_paths().inbox;

        if !email.folder.eq_ignore_ascii_case(inbox) {
            self.relocate(&email, email_id, inbox).await?;
        }
        self.triage
            .set_status(email_id, ClassificationStatus::Dismissed)
            .await?;
        info!("Dismissed suggestion for email {email_id}");
        Ok(())
    }

    /// Files the email where the user says it belongs and learns from the
    /// choice. Returns the sender rule when the choice was a correction.
    ///
    /// # Errors
    ///
    /// Returns an error if the email is missing, or the move or storage
    /// fails.
    pub async fn correct(
        &self,
        email_id: EmailId,
        user_choice: TriageFolder,
    ) -> Result<Option<SenderRule>> {
        self.apply_choice(email_id, user_choice, TrainingSource::TriageCorrection)
            .await
    }

    /// Records a move the user made outside review, so it trains future
    /// classification like a correction does.
    ///
    /// # Errors
    ///
    /// Returns an error if the email is missing, or the move or storage
    /// fails.
    pub async fn manual_move(
        &self,
        email_id: EmailId,
        destination: TriageFolder,
    ) -> Result<Option<SenderRule>> {
        self.apply_choice(email_id, destination, TrainingSource::ManualMove)
            .await
    }

    /// Accepts every email, continuing past failures.
    pub async fn bulk_accept(&self, email_ids: &[EmailId]) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for &id in email_ids {
            tally(&mut outcome, id, "accept", self.accept(id).await);
        }
        outcome
    }

    /// Dismisses every email, continuing past failures.
    pub async fn bulk_dismiss(&self, email_ids: &[EmailId]) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for &id in email_ids {
            tally(&mut outcome, id, "dismiss", self.dismiss(id).await);
        }
        outcome
    }

    async fn apply_choice(
        &self,
        email_id: EmailId,
        choice: TriageFolder,
        source: TrainingSource,
    ) -> Result<Option<SenderRule>> {
        let suggestion = self.suggestion(email_id).await?;
        self.file(email_id, choice).await?;
        let rule = self.learner.learn(email_id, suggestion, choice, source).await?;

        if self.triage.get_state(email_id).await?.is_some() {
            self.triage
                .set_status(email_id, ClassificationStatus::Accepted)
                .await?;
        }
        Ok(rule)
    }

    async fn suggestion(&self, email_id: EmailId) -> Result<Option<TriageFolder>> {
        Ok(self
            .triage
            .get_state(email_id)
            .await?
            .and_then(|state| state.suggested_folder))
    }

    async fn file(&self, email_id: EmailId, folder: TriageFolder) -> Result<()> {
        let email = self.emails.require(email_id).await?;
        if email.folder != folder.as_str() {
            self.relocate(&email, email_id, folder.as_str()).await?;
        }
        Ok(())
    }

    async fn relocate(&self, email: &Email, email_id: EmailId, destination: &str) -> Result<()> {
        let account = self.accounts.require(email.account_id).await?;
        let new_uid = self.folder_ops.move_email(&account, email, destination).await?;
        self.emails.update_location(email_id, destination, new_uid).await
    }
}

fn tally(outcome: &mut BulkOutcome, email_id: EmailId, action: &str, result: Result<()>) {
    match result {
        Ok(()) => outcome.succeeded += 1,
        Err(e) => {
            warn!("Could not {action} email {email_id}: {e}");
            outcome.failed += 1;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sync::{ImapFolderOperations, SessionRegistry};
    use crate::test_support::{FakeConnector, FakeServer, email, seed_account};
    use crate::triage::{PatternMatchResult, TriageClassificationResult};
    use crate::{AccountId, Database};

    struct Harness {
        db: Database,
        server: FakeServer,
        review: ReviewService,
    }

    async fn harness() -> Harness {
        let db = Database::in_memory().await.unwrap();
        seed_account(&db).await;
        let server = FakeServer::default();
        let (connector, credentials) = FakeConnector::new(server.clone());
        let registry = Arc::new(SessionRegistry::new(connector, credentials));
        let review = ReviewService::new(
            db.accounts(),
            db.emails(),
            db.triage(),
            Arc::new(ImapFolderOperations::new(registry)),
        );
        Harness { db, server, review }
    }

    /// Stores an email pending review with a suggestion.
    async fn pending(h: &Harness, uid: u32, suggested: TriageFolder) -> EmailId {
        let key = format!("p{uid}");
        h.server.add_message("INBOX", uid, &format!("<{key}@test>"));
        let mut e = email(1, "INBOX", uid, &key);
        e.from_address = "news@paper.example".to_string();
        let id = h.db.emails().insert_batch(&[e]).await.unwrap().inserted[0];

        let hint = PatternMatchResult {
            folder: suggested,
            confidence: 0.5,
            tags: Vec::new(),
            snooze_until: None,
            auto_delete_after: None,
        };
        let mut result = TriageClassificationResult::fallback(&hint, "");
        result.folder = suggested;
        result.confidence = 0.5;
        h.db.triage()
            .set_state(&ClassificationState::from_result(
                id,
                AccountId(1),
                ClassificationStatus::PendingReview,
                &result,
            ))
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn test_accept_moves_and_trains() {
        let h = harness().await;
        let id = pending(&h, 1, TriageFolder::Newsletters).await;
        assert_eq!(h.review.pending(AccountId(1)).await.unwrap().len(), 1);

        h.review.accept(id).await.unwrap();

        assert_eq!(h.db.emails().require(id).await.unwrap().folder, "Newsletters");
        let state = h.db.triage().get_state(id).await.unwrap().unwrap();
        assert_eq!(state.status, ClassificationStatus::Accepted);
        let examples = h
            .db
            .triage()
            .relevant_examples(AccountId(1), "paper.example", 10)
            .await
            .unwrap();
        assert_eq!(examples.len(), 1);
        assert!(!examples[0].was_correction);
        assert!(h.review.pending(AccountId(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_correct_moves_to_choice_and_learns_rule() {
        let h = harness().await;
        let id = pending(&h, 1, TriageFolder::Newsletters).await;

        let rule = h.review.correct(id, TriageFolder::Promotions).await.unwrap().unwrap();
        assert_eq!(rule.target_folder, TriageFolder::Promotions);
        assert_eq!(h.db.emails().require(id).await.unwrap().folder, "Promotions");
        assert_eq!(h.server.moves(), vec![(1, "Promotions".to_string())]);
    }

    #[tokio::test]
    async fn test_dismiss_keeps_email_in_inbox() {
        let h = harness().await;
        let id = pending(&h, 1, TriageFolder::Newsletters).await;

        h.review.dismiss(id).await.unwrap();
        assert!(h.server.moves().is_empty());
        let state = h.db.triage().get_state(id).await.unwrap().unwrap();
        assert_eq!(state.status, ClassificationStatus::Dismissed);
    }

    #[tokio::test]
    async fn test_bulk_accept_counts_failures_and_continues() {
        let h = harness().await;
        let a = pending(&h, 1, TriageFolder::Newsletters).await;
        let b = pending(&h, 2, TriageFolder::Newsletters).await;
        let c = pending(&h, 3, TriageFolder::Newsletters).await;
        h.server.remove_message("INBOX", "<p2@test>");

        let outcome = h.review.bulk_accept(&[a, b, c, 999]).await;
        assert_eq!(outcome, BulkOutcome { succeeded: 2, failed: 2 });
        assert_eq!(h.db.emails().require(c).await.unwrap().folder, "Newsletters");
    }

    #[tokio::test]
    async fn test_bulk_dismiss() {
        let h = harness().await;
        let a = pending(&h, 1, TriageFolder::Dev).await;
        let b = pending(&h, 2, TriageFolder::Dev).await;

        let outcome = h.review.bulk_dismiss(&[a, b]).await;
        assert_eq!(outcome, BulkOutcome { succeeded: 2, failed: 0 });
    }

    #[tokio::test]
    async fn test_accept_without_suggestion_fails() {
        let h = harness().await;
        h.server.add_message("INBOX", 1, "<x@test>");
        let id = h.db.emails().insert_batch(&[email(1, "INBOX", 1, "x")]).await.unwrap().inserted[0];
        assert!(matches!(h.review.accept(id).await, Err(Error::DataIntegrity(_))));
    }
}
