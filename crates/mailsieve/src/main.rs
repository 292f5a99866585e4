//! `MailSieve` - headless IMAP sync and email triage daemon.
//!
//! Every poll interval each configured account is synced, new mail is
//! triaged, and due snoozes are woken in the background.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use mailsieve_core::triage::backend_from_config;
use mailsieve_core::{
    Account, AccountId, BulkClassifier, ClassificationBudget, Database, FolderOperations,
    ImapFolderOperations, KeyringCredentials, MailSynchronizer, ProgressBus, SessionRegistry,
    Settings, SnoozeScheduler, SyncOptions, SyncPhase, TriageClassifier, TriageOptions,
    TriageOrchestrator,
};
use mailsieve_imap::TlsSessionConnector;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "mailsieve=info,mailsieve_core=debug,mailsieve_imap=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting MailSieve");

    let settings_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(Settings::default_path)
        .context("no config directory; pass a settings file path")?;
    let settings = Settings::load(&settings_path)
        .with_context(|| format!("loading {}", settings_path.display()))?;

    Daemon::start(settings).await?.run().await
}

/// Wired components shared by every poll cycle.
struct Daemon {
    settings: Settings,
    db: Database,
    registry: Arc<SessionRegistry>,
    folder_ops: Arc<dyn FolderOperations>,
    synchronizer: MailSynchronizer,
    bulk: BulkClassifier,
    snoozer: Arc<SnoozeScheduler>,
    sync_options: SyncOptions,
    triage_options: TriageOptions,
}

impl Daemon {
    async fn start(settings: Settings) -> Result<Self> {
        let db_path = settings.database_path()?;
        let db = Database::open(&db_path)
            .await
            .with_context(|| format!("opening {}", db_path.display()))?;

        let credentials = Arc::new(KeyringCredentials);
        let registry = Arc::new(SessionRegistry::new(
            Arc::new(TlsSessionConnector),
            credentials.clone(),
        ));
        let folder_ops: Arc<dyn FolderOperations> =
            Arc::new(ImapFolderOperations::new(Arc::clone(&registry)));

        let progress = ProgressBus::new(64);
        spawn_progress_log(&progress);
        let synchronizer = MailSynchronizer::new(
            Arc::clone(&registry),
            db.emails(),
            db.folders(),
            progress,
        );

        let backend = backend_from_config(&settings.arbiter, credentials.as_ref())
            .context("configuring the classifier backend")?;
        let budget = ClassificationBudget::new(db.budget(), settings.budget.clone());
        let orchestrator = TriageOrchestrator::new(
            db.accounts(),
            db.emails(),
            db.triage(),
            TriageClassifier::new(backend),
            Arc::clone(&folder_ops),
        )
        .with_budget(budget.clone())
        .with_training_examples(settings.triage.training_examples);
        let bulk = BulkClassifier::new(Arc::new(orchestrator)).with_budget(budget);

        let snoozer = Arc::new(SnoozeScheduler::new(
            db.accounts(),
            db.emails(),
            db.snoozes(),
            Arc::clone(&folder_ops),
        ));

        Ok(Self {
            sync_options: SyncOptions::from(&settings.sync),
            triage_options: TriageOptions::from(&settings.triage),
            settings,
            db,
            registry,
            folder_ops,
            synchronizer,
            bulk,
            snoozer,
        })
    }

    async fn run(self) -> Result<()> {
        let sync = &self.settings.sync;
        let eviction = self.registry.spawn_eviction_sweep(
            Duration::from_secs(sync.eviction_interval_secs),
            sync.session_idle(),
        );
        let sweep = self
            .snoozer
            .spawn_sweep(Duration::from_secs(self.settings.snooze.sweep_interval_secs));
        let poll = Duration::from_secs(sync.poll_interval_secs);

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);
        let mut prepared = HashSet::new();

        loop {
            tokio::select! {
                res = &mut shutdown => {
                    res?;
                    break;
                }
                () = self.cycle(&mut prepared) => {}
            }
            tokio::select! {
                res = &mut shutdown => {
                    res?;
                    break;
                }
                () = tokio::time::sleep(poll) => {}
            }
        }

        info!("Shutting down");
        sweep.abort();
        eviction.abort();
        for id in prepared {
            self.registry.disconnect(id).await;
        }
        Ok(())
    }

    async fn cycle(&self, prepared: &mut HashSet<AccountId>) {
        let accounts = match self.db.accounts().list().await {
            Ok(accounts) => accounts,
            Err(e) => {
                error!("Could not list accounts: {e}");
                return;
            }
        };
        if accounts.is_empty() {
            warn!("No accounts configured");
        }

        for account in &accounts {
            if let Err(e) = self.process_account(account, prepared).await {
                warn!("Cycle for {} failed: {e}", account.email);
            }
        }
    }

    async fn process_account(
        &self,
        account: &Account,
        prepared: &mut HashSet<AccountId>,
    ) -> mailsieve_core::Result<()> {
        let account_id = account.require_id()?;

        if !prepared.contains(&account_id) {
            let created = self.folder_ops.ensure_standard_folders(account).await?;
            if !created.is_empty() {
                info!("Created {} for {}", created.join(", "), account.email);
            }
            prepared.insert(account_id);
        }

        let result = self.synchronizer.sync(account, &self.sync_options).await?;
        if result.truncated {
            info!(
                "{}: {} message(s) available, kept the newest {}",
                account.email, result.total_available, self.sync_options.max_messages
            );
        }
        if result.new_email_ids.is_empty() {
            return Ok(());
        }

        let summary = self
            .bulk
            .classify_all(result.new_email_ids, &self.triage_options, None)
            .await;
        debug!("{}: triage summary {summary:?}", account.email);
        Ok(())
    }
}

fn spawn_progress_log(progress: &ProgressBus) {
    let mut rx = progress.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match event.phase {
                    SyncPhase::Complete => info!(
                        "Account {} {}: {} new",
                        event.account_id, event.folder, event.new_count
                    ),
                    SyncPhase::Error => warn!(
                        "Account {} {}: {}",
                        event.account_id,
                        event.folder,
                        event.error.unwrap_or_default()
                    ),
                    phase => debug!(
                        "Account {} {}: {phase:?} {}/{}",
                        event.account_id, event.folder, event.current, event.total
                    ),
                },
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Progress log skipped {skipped} event(s)");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}
