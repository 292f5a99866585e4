//! Bulk classification over a bounded worker pool.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::budget::ClassificationBudget;
use crate::Error;
use crate::mail::EmailId;
use crate::triage::{TriageOptions, TriageOrchestrator};

/// What happened to one email.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Classified, and filed if confident.
    Classified,
    /// Not attempted because the daily budget is used up.
    Skipped,
    /// Failed; the error state is persisted where possible.
    Failed,
}

/// Sent once per finished email, whatever the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkProgress {
    /// The email just finished.
    pub email_id: EmailId,
    /// Its outcome.
    pub outcome: ItemOutcome,
    /// Emails finished so far, this one included.
    pub completed: usize,
    /// Emails in the run.
    pub total: usize,
}

/// Totals of a bulk run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkSummary {
    /// Emails finished.
    pub processed: usize,
    /// Emails classified.
    pub classified: usize,
    /// Emails skipped for budget.
    pub skipped: usize,
    /// Emails that failed.
    pub failed: usize,
}

impl BulkSummary {
    fn record(&mut self, outcome: ItemOutcome) {
        self.processed += 1;
        match outcome {
            ItemOutcome::Classified => self.classified += 1,
            ItemOutcome::Skipped => self.skipped += 1,
            ItemOutcome::Failed => self.failed += 1,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs the orchestrator over many emails with N workers pulling from one
/// queue.
pub struct BulkClassifier {
    orchestrator: Arc<TriageOrchestrator>,
    budget: Option<ClassificationBudget>,
}

impl BulkClassifier {
    /// Creates a bulk classifier without a budget check.
    #[must_use]
    pub const fn new(orchestrator: Arc<TriageOrchestrator>) -> Self {
        Self {
            orchestrator,
            budget: None,
        }
    }

    /// Skips emails once `budget` is used up.
    #[must_use]
    pub fn with_budget(mut self, budget: ClassificationBudget) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Workers suited to the classifier backend: one for rate-limited
    /// remote arbiters, a few for local ones.
    #[must_use]
    pub fn default_concurrency(&self) -> usize {
        self.orchestrator.classifier().backend_kind().concurrency()
    }

    /// Classifies every email with [`Self::default_concurrency`] workers.
    pub async fn classify_all(
        &self,
        email_ids: Vec<EmailId>,
        options: &TriageOptions,
        progress: Option<&mpsc::UnboundedSender<BulkProgress>>,
    ) -> BulkSummary {
        self.classify_with_concurrency(email_ids, self.default_concurrency(), options, progress)
            .await
    }

    /// Classifies every email with `concurrency` workers. Per-email failures
    /// never stop the run.
    pub async fn classify_with_concurrency(
        &self,
        email_ids: Vec<EmailId>,
        concurrency: usize,
        options: &TriageOptions,
        progress: Option<&mpsc::UnboundedSender<BulkProgress>>,
    ) -> BulkSummary {
        let total = email_ids.len();
        if total == 0 {
            return BulkSummary::default();
        }

        let queue = Mutex::new(email_ids.into_iter().collect::<VecDeque<_>>());
        let summary = Mutex::new(BulkSummary::default());
        let workers = concurrency.clamp(1, total);
        info!("Bulk triage of {total} email(s) with {workers} worker(s)");

        join_all((0..workers).map(|_| async {
            loop {
                let Some(email_id) = lock(&queue).pop_front() else {
                    break;
                };
                let outcome = self.process(email_id, options).await;

                let completed = {
                    let mut summary = lock(&summary);
                    summary.record(outcome);
                    summary.processed
                };
                let event = BulkProgress {
                    email_id,
                    outcome,
                    completed,
                    total,
                };
                if progress.is_some_and(|tx| tx.send(event).is_err()) {
                    debug!("Progress receiver gone, dropped event for email {email_id}");
                }
            }
        }))
        .await;

        let summary = summary.into_inner().unwrap_or_else(PoisonError::into_inner);
        info!(
            "Bulk triage done: {} classified, {} skipped, {} failed",
            summary.classified, summary.skipped, summary.failed
        );
        summary
    }

    async fn process(&self, email_id: EmailId, options: &TriageOptions) -> ItemOutcome {
        if let Some(budget) = &self.budget {
            match budget.ensure_available().await {
                Ok(()) => {}
                Err(Error::BudgetExceeded { .. }) => {
                    debug!("Budget exhausted, skipping email {email_id}");
                    return ItemOutcome::Skipped;
                }
                Err(e) => {
                    warn!("Budget check for email {email_id} failed: {e}");
                    return ItemOutcome::Failed;
                }
            }
        }

        match self.orchestrator.triage_and_move_email(email_id, options).await {
            Ok(_) => ItemOutcome::Classified,
            Err(e) => {
                warn!("Bulk triage of email {email_id} failed: {e}");
                ItemOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::Database;
    use crate::config::BudgetSettings;
    use crate::sync::{ImapFolderOperations, SessionRegistry};
    use crate::test_support::{FakeCompletion, FakeConnector, FakeServer, email, seed_account};
    use crate::triage::{ClassificationStatus, TriageClassifier};

    const ANSWER: &str = r#"{"folder": "Dev", "confidence": 0.9, "reasoning": "ci"}"#;

    struct Harness {
        db: Database,
        server: FakeServer,
        ids: Vec<EmailId>,
    }

    async fn harness(count: u32) -> Harness {
        let db = Database::in_memory().await.unwrap();
        seed_account(&db).await;
        let server = FakeServer::default();
        let batch: Vec<_> = (1..=count)
            .map(|uid| {
                let key = format!("b{uid}");
                server.add_message("INBOX", uid, &format!("<{key}@test>"));
                email(1, "INBOX", uid, &key)
            })
            .collect();
        let ids = db.emails().insert_batch(&batch).await.unwrap().inserted;
        Harness { db, server, ids }
    }

    fn orchestrator(h: &Harness, budget: Option<ClassificationBudget>) -> Arc<TriageOrchestrator> {
        let (connector, credentials) = FakeConnector::new(h.server.clone());
        let registry = Arc::new(SessionRegistry::new(connector, credentials));
        let orchestrator = TriageOrchestrator::new(
            h.db.accounts(),
            h.db.emails(),
            h.db.triage(),
            TriageClassifier::new(FakeCompletion::answering(ANSWER)),
            Arc::new(ImapFolderOperations::new(registry)),
        );
        Arc::new(match budget {
            Some(budget) => orchestrator.with_budget(budget),
            None => orchestrator,
        })
    }

    #[tokio::test]
    async fn test_progress_once_per_item() {
        let h = harness(5).await;
        let bulk = BulkClassifier::new(orchestrator(&h, None));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let summary = bulk
            .classify_with_concurrency(h.ids.clone(), 3, &TriageOptions::default(), Some(&tx))
            .await;
        drop(tx);

        assert_eq!(summary.processed, 5);
        assert_eq!(summary.classified, 5);

        let mut completed = Vec::new();
        while let Some(event) = rx.recv().await {
            assert_eq!(event.total, 5);
            completed.push(event.completed);
        }
        assert_eq!(completed, vec![1, 2, 3, 4, 5]);
        assert_eq!(h.server.uids("Dev").len(), 5);
    }

    #[tokio::test]
    async fn test_exhausted_budget_skips_without_error() {
        let h = harness(4).await;
        let budget = ClassificationBudget::new(
            h.db.budget(),
            BudgetSettings {
                daily_email_limit: Some(2),
                daily_token_limit: None,
            },
        );
        let bulk =
            BulkClassifier::new(orchestrator(&h, Some(budget.clone()))).with_budget(budget);

        let summary = bulk
            .classify_with_concurrency(h.ids.clone(), 1, &TriageOptions::default(), None)
            .await;
        assert_eq!(
            summary,
            BulkSummary {
                processed: 4,
                classified: 2,
                skipped: 2,
                failed: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_failures_are_recorded_and_do_not_stop_the_run() {
        let h = harness(3).await;
        h.server.remove_message("INBOX", "<b2@test>");
        let bulk = BulkClassifier::new(orchestrator(&h, None));

        let mut ids = h.ids.clone();
        ids.push(404);
        let summary = bulk
            .classify_with_concurrency(ids, 2, &TriageOptions::default(), None)
            .await;
        assert_eq!(summary.classified, 2);
        assert_eq!(summary.failed, 2);

        let state = h.db.triage().get_state(h.ids[1]).await.unwrap().unwrap();
        assert_eq!(state.status, ClassificationStatus::Error);
    }

    #[tokio::test]
    async fn test_dead_session_fails_only_one_item() {
        let h = harness(4).await;
        h.server.kill_next_session();
        let bulk = BulkClassifier::new(orchestrator(&h, None));

        let summary = bulk
            .classify_with_concurrency(h.ids.clone(), 1, &TriageOptions::default(), None)
            .await;
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.classified, 3);
        assert_eq!(h.server.connects(), 2);
        assert_eq!(h.server.uids("Dev").len(), 3);

        let state = h.db.triage().get_state(h.ids[0]).await.unwrap().unwrap();
        assert_eq!(state.status, ClassificationStatus::Error);
    }

    #[tokio::test]
    async fn test_closed_progress_receiver_does_not_stop_the_run() {
        let h = harness(2).await;
        let bulk = BulkClassifier::new(orchestrator(&h, None));
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        let summary = bulk
            .classify_with_concurrency(h.ids.clone(), 1, &TriageOptions::default(), Some(&tx))
            .await;
        assert_eq!(summary.classified, 2);
    }

    #[tokio::test]
    async fn test_empty_run() {
        let h = harness(0).await;
        let bulk = BulkClassifier::new(orchestrator(&h, None));
        let summary = bulk.classify_all(Vec::new(), &TriageOptions::default(), None).await;
        assert_eq!(summary, BulkSummary::default());
    }
}
