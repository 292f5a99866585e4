//! Builders and in-memory fakes shared by unit tests.

#![allow(clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailsieve_imap::{
    ConnectConfig, FetchedMessage, MailSession, MailboxInfo, SearchQuery, SessionConnector,
    WireAddress,
};

use crate::account::{Account, AccountId, ImapConfig, MemoryCredentials};
use crate::mail::Email;
use crate::sync::SessionRegistry;
use crate::triage::{BackendKind, CompletionBackend};
use crate::{Database, Error, Result};

/// An unsaved email with message ID `<{key}@test>`.
pub fn email(account_id: i64, folder: &str, uid: u32, key: &str) -> Email {
    Email {
        id: None,
        account_id: AccountId(account_id),
        folder: folder.to_string(),
        uid: Some(uid),
        message_id: format!("<{key}@test>"),
        subject: format!("Message {key}"),
        from_name: None,
        from_address: "sender@example.com".to_string(),
        to: vec!["me@example.com".to_string()],
        date: Utc::now(),
        snippet: None,
        is_read: false,
        is_starred: false,
        has_attachments: false,
        size: 1024,
        body_fetched: false,
    }
}

/// An unsaved inbox email with the given sender and subject.
pub fn email_from(from_address: &str, subject: &str) -> Email {
    let mut e = email(1, "INBOX", 1, "from");
    e.from_address = from_address.to_string();
    e.subject = subject.to_string();
    e
}

/// An account with the given ID on a generic provider.
pub fn test_account(id: i64) -> Account {
    Account {
        id: Some(AccountId(id)),
        name: "Test".to_string(),
        email: format!("user{id}@example.com"),
        imap: ImapConfig {
            host: "imap.example.com".to_string(),
            port: 993,
            username: format!("user{id}@example.com"),
        },
    }
}

/// Stores `test_account(1)` so it gets ID 1.
pub async fn seed_account(db: &Database) -> Account {
    let mut account = test_account(1);
    account.id = None;
    db.accounts().save(&mut account).await.unwrap();
    assert_eq!(account.id, Some(AccountId(1)));
    account
}

// ---- IMAP ----

#[derive(Debug, Clone)]
struct FakeMessage {
    uid: u32,
    message_id: String,
    date: DateTime<Utc>,
    raw: Vec<u8>,
}

#[derive(Debug)]
struct FakeMailbox {
    uid_validity: u32,
    next_uid: u32,
    messages: Vec<FakeMessage>,
}

impl FakeMailbox {
    const fn new() -> Self {
        Self {
            uid_validity: 1,
            next_uid: 1,
            messages: Vec::new(),
        }
    }

    fn insert(&mut self, message: FakeMessage) {
        self.next_uid = self.next_uid.max(message.uid + 1);
        self.messages.push(message);
        self.messages.sort_by_key(|m| m.uid);
    }
}

#[derive(Default)]
struct ServerState {
    mailboxes: BTreeMap<String, FakeMailbox>,
    connects: usize,
    logouts: usize,
    appends: usize,
    raw_fetches: usize,
    moves: Vec<(u32, String)>,
    fetched_batches: Vec<usize>,
    fetch_limit: Option<usize>,
    dead_session: Option<usize>,
    cancel_after: Option<(Weak<SessionRegistry>, AccountId, usize)>,
}

/// An in-memory IMAP server. Clones share state.
#[derive(Clone)]
pub struct FakeServer {
    state: Arc<Mutex<ServerState>>,
}

impl Default for FakeServer {
    fn default() -> Self {
        let mut state = ServerState::default();
        state.mailboxes.insert("INBOX".to_string(), FakeMailbox::new());
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }
}

impl FakeServer {
    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a minimal message.
    pub fn add_message(&self, mailbox: &str, uid: u32, message_id: &str) {
        let raw = format!(
            "Message-ID: {message_id}\r\nFrom: sender@example.com\r\nSubject: Message {uid}\r\n\r\nHello\r\n"
        );
        self.add_raw_message(mailbox, uid, message_id, raw.as_bytes());
    }

    /// Adds a message with a given RFC 822 body.
    pub fn add_raw_message(&self, mailbox: &str, uid: u32, message_id: &str, raw: &[u8]) {
        self.insert(mailbox, uid, message_id, raw, Utc::now());
    }

    /// Adds a minimal message with an internal date.
    pub fn add_dated_message(&self, mailbox: &str, uid: u32, message_id: &str, date: DateTime<Utc>) {
        self.insert(mailbox, uid, message_id, b"Subject: old\r\n\r\nHello\r\n", date);
    }

    fn insert(&self, mailbox: &str, uid: u32, message_id: &str, raw: &[u8], date: DateTime<Utc>) {
        self.state()
            .mailboxes
            .entry(mailbox.to_string())
            .or_insert_with(FakeMailbox::new)
            .insert(FakeMessage {
                uid,
                message_id: message_id.to_string(),
                date,
                raw: raw.to_vec(),
            });
    }

    /// Expunges a message behind the client's back.
    pub fn remove_message(&self, mailbox: &str, message_id: &str) {
        if let Some(mb) = self.state().mailboxes.get_mut(mailbox) {
            mb.messages.retain(|m| m.message_id != message_id);
        }
    }

    /// Creates an empty mailbox.
    pub fn add_mailbox(&self, name: &str) {
        self.state()
            .mailboxes
            .entry(name.to_string())
            .or_insert_with(FakeMailbox::new);
    }

    /// Sets a mailbox's UIDVALIDITY.
    pub fn set_uid_validity(&self, mailbox: &str, validity: u32) {
        self.state()
            .mailboxes
            .entry(mailbox.to_string())
            .or_insert_with(FakeMailbox::new)
            .uid_validity = validity;
    }

    /// UIDs in a mailbox, ascending.
    pub fn uids(&self, mailbox: &str) -> Vec<u32> {
        self.state()
            .mailboxes
            .get(mailbox)
            .map(|mb| mb.messages.iter().map(|m| m.uid).collect())
            .unwrap_or_default()
    }

    /// Every UID MOVE as (source UID, destination).
    pub fn moves(&self) -> Vec<(u32, String)> {
        self.state().moves.clone()
    }

    /// Number of APPENDs.
    pub fn appends(&self) -> usize {
        self.state().appends
    }

    /// Number of logins.
    pub fn connects(&self) -> usize {
        self.state().connects
    }

    /// Number of logouts.
    pub fn logouts(&self) -> usize {
        self.state().logouts
    }

    /// Number of full-message fetches.
    pub fn raw_fetches(&self) -> usize {
        self.state().raw_fetches
    }

    /// Size of every envelope fetch, in order.
    pub fn fetched_batches(&self) -> Vec<usize> {
        self.state().fetched_batches.clone()
    }

    /// Makes every envelope fetch fail as if the connection dropped.
    pub fn fail_fetches(&self) {
        self.fail_fetches_after(0);
    }

    /// Lets `batches` more envelope fetches succeed, then fails the rest.
    pub fn fail_fetches_after(&self, batches: usize) {
        let mut state = self.state();
        state.fetch_limit = Some(state.fetched_batches.len() + batches);
    }

    /// Lets envelope fetches succeed again.
    pub fn restore_fetches(&self) {
        self.state().fetch_limit = None;
    }

    /// Makes the next session opened fail every command with a closed
    /// connection.
    pub fn kill_next_session(&self) {
        let mut state = self.state();
        state.dead_session = Some(state.connects + 1);
    }

    /// Requests cancellation of the account's sync after `fetches` envelope
    /// fetches.
    pub fn cancel_after_fetches(
        &self,
        registry: &Arc<SessionRegistry>,
        account_id: AccountId,
        fetches: usize,
    ) {
        self.state().cancel_after = Some((Arc::downgrade(registry), account_id, fetches));
    }
}

struct FakeSession {
    server: FakeServer,
    selected: Option<String>,
    number: usize,
}

impl FakeSession {
    fn alive(&self) -> mailsieve_imap::Result<()> {
        if self.server.state().dead_session == Some(self.number) {
            return Err(mailsieve_imap::Error::Closed);
        }
        Ok(())
    }

    fn selected(&self) -> mailsieve_imap::Result<String> {
        self.selected
            .clone()
            .ok_or_else(|| mailsieve_imap::Error::Protocol("no mailbox selected".to_string()))
    }
}

#[async_trait]
impl MailSession for FakeSession {
    async fn select(&mut self, mailbox: &str) -> mailsieve_imap::Result<MailboxInfo> {
        self.alive()?;
        let state = self.server.state();
        let mb = state
            .mailboxes
            .get(mailbox)
            .ok_or_else(|| mailsieve_imap::Error::MailboxNotFound(mailbox.to_string()))?;
        let info = MailboxInfo {
            uid_validity: mb.uid_validity,
            uid_next: Some(mb.next_uid),
            exists: u32::try_from(mb.messages.len()).unwrap(),
        };
        drop(state);
        self.selected = Some(mailbox.to_string());
        Ok(info)
    }

    async fn uid_search(&mut self, query: &SearchQuery) -> mailsieve_imap::Result<Vec<u32>> {
        self.alive()?;
        let selected = self.selected()?;
        let state = self.server.state();
        let Some(mb) = state.mailboxes.get(&selected) else {
            return Ok(Vec::new());
        };
        Ok(mb
            .messages
            .iter()
            .filter(|m| match query {
                SearchQuery::All => true,
                SearchQuery::UidsAfter(cursor) => m.uid > *cursor,
                SearchQuery::Since(day) => m.date.date_naive() >= *day,
                SearchQuery::MessageId(id) => &m.message_id == id,
            })
            .map(|m| m.uid)
            .collect())
    }

    async fn fetch_envelopes(&mut self, uids: &[u32]) -> mailsieve_imap::Result<Vec<FetchedMessage>> {
        self.alive()?;
        let selected = self.selected()?;
        let (fetched, cancel) = {
            let mut state = self.server.state();
            if state
                .fetch_limit
                .is_some_and(|limit| state.fetched_batches.len() >= limit)
            {
                return Err(mailsieve_imap::Error::Closed);
            }
            state.fetched_batches.push(uids.len());
            let batches = state.fetched_batches.len();

            let fetched = state
                .mailboxes
                .get(&selected)
                .map(|mb| {
                    mb.messages
                        .iter()
                        .filter(|m| uids.contains(&m.uid))
                        .map(envelope)
                        .collect()
                })
                .unwrap_or_default();

            let cancel = match &state.cancel_after {
                Some((registry, account_id, after)) if *after == batches => {
                    registry.upgrade().map(|r| (r, *account_id))
                }
                _ => None,
            };
            (fetched, cancel)
        };

        if let Some((registry, account_id)) = cancel {
            registry.cancel(account_id);
        }
        Ok(fetched)
    }

    async fn fetch_raw(&mut self, uid: u32) -> mailsieve_imap::Result<Option<Vec<u8>>> {
        self.alive()?;
        let selected = self.selected()?;
        let mut state = self.server.state();
        state.raw_fetches += 1;
        Ok(state.mailboxes.get(&selected).and_then(|mb| {
            mb.messages
                .iter()
                .find(|m| m.uid == uid)
                .map(|m| m.raw.clone())
        }))
    }

    async fn uid_move(&mut self, uid: u32, destination: &str) -> mailsieve_imap::Result<()> {
        self.alive()?;
        let selected = self.selected()?;
        let mut state = self.server.state();

        let source = state
            .mailboxes
            .get_mut(&selected)
            .ok_or_else(|| mailsieve_imap::Error::MailboxNotFound(selected.clone()))?;
        let index = source
            .messages
            .iter()
            .position(|m| m.uid == uid)
            .ok_or_else(|| mailsieve_imap::Error::Protocol(format!("no message with UID {uid}")))?;
        let mut message = source.messages.remove(index);

        let dest = state
            .mailboxes
            .entry(destination.to_string())
            .or_insert_with(FakeMailbox::new);
        message.uid = dest.next_uid;
        dest.insert(message);
        state.moves.push((uid, destination.to_string()));
        Ok(())
    }

    async fn append(&mut self, _mailbox: &str, _flags: &str, _content: &[u8]) -> mailsieve_imap::Result<()> {
        self.alive()?;
        self.server.state().appends += 1;
        Ok(())
    }

    async fn list_mailboxes(&mut self) -> mailsieve_imap::Result<Vec<String>> {
        self.alive()?;
        Ok(self.server.state().mailboxes.keys().cloned().collect())
    }

    async fn create_mailbox(&mut self, mailbox: &str) -> mailsieve_imap::Result<()> {
        self.alive()?;
        let mut state = self.server.state();
        if state.mailboxes.contains_key(mailbox) {
            return Err(mailsieve_imap::Error::Protocol(format!("{mailbox} already exists")));
        }
        state.mailboxes.insert(mailbox.to_string(), FakeMailbox::new());
        Ok(())
    }

    async fn delete_mailbox(&mut self, mailbox: &str) -> mailsieve_imap::Result<()> {
        self.alive()?;
        self.server
            .state()
            .mailboxes
            .remove(mailbox)
            .map(|_| ())
            .ok_or_else(|| mailsieve_imap::Error::MailboxNotFound(mailbox.to_string()))
    }

    async fn logout(&mut self) -> mailsieve_imap::Result<()> {
        self.server.state().logouts += 1;
        Ok(())
    }
}

fn envelope(m: &FakeMessage) -> FetchedMessage {
    FetchedMessage {
        uid: m.uid,
        message_id: Some(m.message_id.clone()),
        subject: Some(format!("Message {}", m.uid)),
        from: Some(WireAddress {
            name: None,
            address: "sender@example.com".to_string(),
        }),
        to: Vec::new(),
        date: Some(m.date.to_rfc2822()),
        flags: mailsieve_imap::MessageFlags::default(),
        size: u32::try_from(m.raw.len()).unwrap(),
        has_attachments: false,
    }
}

/// Hands out sessions on a [`FakeServer`].
pub struct FakeConnector {
    server: FakeServer,
}

impl FakeConnector {
    /// A connector plus credentials holding a password for account 1.
    pub fn new(server: FakeServer) -> (Arc<Self>, Arc<MemoryCredentials>) {
        let credentials = MemoryCredentials::new();
        credentials.set_imap_password(AccountId(1), "secret");
        (Arc::new(Self { server }), Arc::new(credentials))
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn connect(&self, _config: &ConnectConfig) -> mailsieve_imap::Result<Box<dyn MailSession>> {
        tokio::task::yield_now().await;
        let number = {
            let mut state = self.server.state();
            state.connects += 1;
            state.connects
        };
        Ok(Box::new(FakeSession {
            server: self.server.clone(),
            selected: None,
            number,
        }))
    }
}

// ---- arbiter ----

/// A completion backend with a canned answer, or none at all.
pub struct FakeCompletion {
    answer: Option<String>,
    calls: AtomicUsize,
}

impl FakeCompletion {
    /// Always answers `answer`.
    pub fn answering(answer: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: Some(answer.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    /// Always fails as if unreachable.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            answer: None,
            calls: AtomicUsize::new(0),
        })
    }

    /// Completions requested so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionBackend for FakeCompletion {
    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer
            .clone()
            .ok_or_else(|| Error::Classification("connection refused".to_string()))
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }
}
