//! Cursor-based incremental sync and on-demand body fetch.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, MimeHeaders};
use mailsieve_imap::{FetchedMessage, SearchQuery};
use tracing::{debug, error, info, warn};

use super::progress::{ProgressBus, SyncPhase, SyncProgress};
use super::registry::{SessionLease, SessionRegistry, SyncGuard};
use crate::account::{Account, AccountId};
use crate::config::SyncSettings;
use crate::mail::{AttachmentInfo, Email, EmailBody, EmailId, EmailRepository, FolderRepository};
use crate::{Error, Result};

/// What to sync and how hard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Mailbox to sync.
    pub folder: String,
    /// Hard cap on UIDs per sync; the newest are kept.
    pub max_messages: usize,
    /// UIDs per fetch-and-store batch.
    pub batch_size: usize,
    /// Window of a folder's first sync, in days.
    pub lookback_days: u32,
    /// Pause between batches.
    pub batch_pause: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from(&SyncSettings::default())
    }
}

impl From<&SyncSettings> for SyncOptions {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            folder: settings.folder.clone(),
            max_messages: settings.max_messages,
            batch_size: settings.batch_size,
            lookback_days: settings.lookback_days,
            batch_pause: settings.batch_pause(),
        }
    }
}

/// Outcome of one sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncResult {
    /// Emails stored for the first time.
    pub new_count: usize,
    /// IDs of those emails.
    pub new_email_ids: Vec<EmailId>,
    /// Whether the cap was reached and older UIDs were left out.
    pub truncated: bool,
    /// UIDs matched on the server before the cap.
    pub total_available: usize,
    /// UIDs fetched and stored.
    pub synced: usize,
}

/// Pulls new mail from the server into local storage.
pub struct MailSynchronizer {
    registry: Arc<SessionRegistry>,
    emails: EmailRepository,
    folders: FolderRepository,
    progress: ProgressBus,
}

impl MailSynchronizer {
    /// Creates a synchronizer.
    #[must_use]
    pub const fn new(
        registry: Arc<SessionRegistry>,
        emails: EmailRepository,
        folders: FolderRepository,
        progress: ProgressBus,
    ) -> Self {
        Self {
            registry,
            emails,
            folders,
            progress,
        }
    }

    /// The progress channel.
    #[must_use]
    pub const fn progress(&self) -> &ProgressBus {
        &self.progress
    }

    /// Syncs one folder of an account.
    ///
    /// The folder cursor only advances after a batch is stored, so a crash
    /// re-fetches at most one batch and never skips mail. Cancellation via
    /// [`SessionRegistry::cancel`] stops at the next batch boundary and
    /// returns the partial counts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SyncInProgress`] if the account is already syncing,
    /// and connection, protocol and storage errors after emitting an
    /// [`SyncPhase::Error`] event. Nothing is retried.
    pub async fn sync(&self, account: &Account, options: &SyncOptions) -> Result<SyncResult> {
        let account_id = account.require_id()?;
        let guard = self.registry.begin_sync(account_id)?;
        let folder = options.folder.as_str();

        self.emit(account_id, folder, SyncPhase::Connecting, (0, 0, 0), None);

        match self.run(account, account_id, options, &guard).await {
            Ok(result) => Ok(result),
            Err(e) => {
                error!("Sync of {folder} for account {account_id} failed: {e}");
                self.emit(account_id, folder, SyncPhase::Error, (0, 0, 0), Some(e.to_string()));
                if matches!(e, Error::Connection(_)) {
                    self.registry.disconnect(account_id).await;
                }
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        account: &Account,
        account_id: AccountId,
        options: &SyncOptions,
        guard: &SyncGuard<'_>,
    ) -> Result<SyncResult> {
        let folder = options.folder.as_str();
        let mut session = self.registry.acquire(account).await?;
        let mailbox = session.select(folder).await?;

        let mut record = self.folders.resolve(account_id, folder).await?;
        if record.uid_validity != Some(mailbox.uid_validity) {
            if let Some(old) = record.uid_validity {
                let cleared = self.emails.clear_uids(account_id, folder).await?;
                warn!(
                    "UIDVALIDITY of {folder} changed {old} -> {}, resetting cursor ({cleared} UIDs dropped)",
                    mailbox.uid_validity
                );
            }
            self.folders
                .reset_cursor(account_id, folder, mailbox.uid_validity)
                .await?;
            record.last_uid = 0;
        }

        self.emit(account_id, folder, SyncPhase::Counting, (0, 0, 0), None);

        let query = if record.last_uid > 0 {
            SearchQuery::UidsAfter(record.last_uid)
        } else {
            let since = Utc::now() - chrono::Duration::days(i64::from(options.lookback_days));
            SearchQuery::Since(since.date_naive())
        };

        let mut uids = session.uid_search(&query).await?;
        let total_available = uids.len();
        let truncated = total_available >= options.max_messages;
        if uids.len() > options.max_messages {
            uids.drain(..uids.len() - options.max_messages);
        }

        info!(
            "{folder}: {total_available} candidate(s) after UID {}, syncing {}{}",
            record.last_uid,
            uids.len(),
            if truncated { " (capped)" } else { "" }
        );

        let mut result = SyncResult {
            truncated,
            total_available,
            ..SyncResult::default()
        };

        self.store_batches(&mut session, account_id, &uids, mailbox.uid_validity, options, guard, &mut result)
            .await?;

        let phase = if guard.is_cancelled() && result.synced < uids.len() {
            SyncPhase::Cancelled
        } else {
            SyncPhase::Complete
        };
        self.emit(
            account_id,
            folder,
            phase,
            (result.synced, uids.len(), result.new_count),
            None,
        );
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    async fn store_batches(
        &self,
        session: &mut SessionLease,
        account_id: AccountId,
        uids: &[u32],
        uid_validity: u32,
        options: &SyncOptions,
        guard: &SyncGuard<'_>,
        result: &mut SyncResult,
    ) -> Result<()> {
        let folder = options.folder.as_str();
        let total = uids.len();

        for (index, batch) in uids.chunks(options.batch_size.max(1)).enumerate() {
            if guard.is_cancelled() {
                info!(
                    "Sync of {folder} for account {account_id} cancelled after {} of {total}",
                    result.synced
                );
                return Ok(());
            }
            if index > 0 && !options.batch_pause.is_zero() {
                tokio::time::sleep(options.batch_pause).await;
            }

            let counts = (result.synced, total, result.new_count);
            self.emit(account_id, folder, SyncPhase::Fetching, counts, None);
            let fetched = session.fetch_envelopes(batch).await?;
            let emails: Vec<Email> = fetched
                .iter()
                .map(|m| to_email(account_id, folder, uid_validity, m))
                .collect();

            self.emit(account_id, folder, SyncPhase::Storing, counts, None);
            let stored = self.emails.insert_batch(&emails).await?;

            if let Some(&highest) = batch.last() {
                self.folders.advance_cursor(account_id, folder, highest).await?;
            }

            result.synced += batch.len();
            result.new_count += stored.inserted.len();
            result.new_email_ids.extend(stored.inserted);
            debug!(
                "{folder}: batch {} stored, {}/{total} synced, {} new",
                index + 1,
                result.synced,
                result.new_count
            );
        }
        Ok(())
    }

    /// Returns the body of an email, fetching and caching it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AccountMismatch`] if the email belongs to another
    /// account, [`Error::DataIntegrity`] if it no longer exists locally or on
    /// the server, and connection or parse errors.
    pub async fn fetch_body(&self, account: &Account, email_id: EmailId) -> Result<EmailBody> {
        let account_id = account.require_id()?;
        let email = self.emails.require(email_id).await?;
        if email.account_id != account_id {
            return Err(Error::AccountMismatch {
                email_id,
                account_id,
            });
        }

        if let Some(body) = self.emails.body(email_id).await? {
            debug!("Body of email {email_id} served from cache");
            return Ok(body);
        }

        let mut session = self.registry.acquire(account).await?;
        let fetched = fetch_raw(&mut session, &email, email_id).await;
        let raw = self.registry.release(session, fetched)?;

        let body = parse_body(&raw)?;
        self.emails.save_body(email_id, &body).await?;
        debug!("Fetched body of email {email_id} ({} bytes)", raw.len());
        Ok(body)
    }

    fn emit(
        &self,
        account_id: AccountId,
        folder: &str,
        phase: SyncPhase,
        (current, total, new_count): (usize, usize, usize),
        error: Option<String>,
    ) {
        self.progress.emit(SyncProgress {
            account_id,
            folder: folder.to_string(),
            phase,
            current,
            total,
            new_count,
            error,
        });
    }
}

async fn fetch_raw(session: &mut SessionLease, email: &Email, email_id: EmailId) -> Result<Vec<u8>> {
    session.select(&email.folder).await?;
    let uid = match email.uid {
        Some(uid) => Some(uid),
        None => session
            .uid_search(&SearchQuery::MessageId(email.message_id.clone()))
            .await?
            .last()
            .copied(),
    };
    let uid = uid.ok_or_else(|| {
        Error::DataIntegrity(format!("email {email_id} not found in {}", email.folder))
    })?;
    session
        .fetch_raw(uid)
        .await?
        .ok_or_else(|| Error::DataIntegrity(format!("server returned no body for UID {uid}")))
}

/// Maps an envelope to a domain email. Messages without a Message-ID get a
/// stable synthetic one so the batch insert stays idempotent.
fn to_email(account_id: AccountId, folder: &str, uid_validity: u32, m: &FetchedMessage) -> Email {
    let message_id = m
        .message_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map_or_else(
            || format!("<{uid_validity}.{}.{folder}@mailsieve.invalid>", m.uid),
            ToString::to_string,
        );

    Email {
        id: None,
        account_id,
        folder: folder.to_string(),
        uid: Some(m.uid),
        message_id,
        subject: m.subject.clone().unwrap_or_default(),
        from_name: m.from.as_ref().and_then(|a| a.name.clone()),
        from_address: m.from.as_ref().map(|a| a.address.clone()).unwrap_or_default(),
        to: m.to.iter().map(|a| a.address.clone()).collect(),
        date: m
            .date
            .as_deref()
            .and_then(parse_envelope_date)
            .unwrap_or_else(Utc::now),
        snippet: None,
        is_read: m.flags.seen,
        is_starred: m.flags.flagged,
        has_attachments: m.has_attachments,
        size: m.size,
        body_fetched: false,
    }
}

/// Parses an RFC 2822 date, ignoring a trailing comment like `(UTC)`.
fn parse_envelope_date(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.split(" (").next()?.trim();
    DateTime::parse_from_rfc2822(trimmed)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Extracts text, HTML and attachment metadata from a raw message.
fn parse_body(raw: &[u8]) -> Result<EmailBody> {
    let message = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| Error::Protocol("unparseable message body".to_string()))?;

    let attachments = message
        .attachments()
        .map(|part| AttachmentInfo {
            filename: part.attachment_name().map(ToString::to_string),
            content_type: part.content_type().map_or_else(
                || "application/octet-stream".to_string(),
                |ct| match ct.subtype() {
                    Some(sub) => format!("{}/{sub}", ct.ctype()),
                    None => ct.ctype().to_string(),
                },
            ),
            size: part.contents().len(),
        })
        .collect();

    Ok(EmailBody {
        text: message.body_text(0).map(|t| t.into_owned()),
        html: message.body_html(0).map(|h| h.into_owned()),
        attachments,
    })
}
