//! Per-account IMAP session pool.
//!
//! One authenticated session per account, created lazily and closed after it
//! sits idle. Holding a [`SessionLease`] gives exclusive use of the account's
//! session, which is what serializes a sync against a folder move on the same
//! mailbox. The registry also owns the per-account cancellation flags and
//! the set of accounts with a sync in flight.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use mailsieve_imap::{MailSession, SessionConnector};
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::account::{Account, AccountId, CredentialStore};
use crate::{Error, Result};

type SharedSession = Arc<tokio::sync::Mutex<Box<dyn MailSession>>>;

struct PooledSession {
    session: SharedSession,
    last_used: Arc<Mutex<Instant>>,
}

impl PooledSession {
    fn idle_for(&self) -> Duration {
        lock(&self.last_used).elapsed()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Exclusive use of an account's session. Dereferences to the session.
pub struct SessionLease {
    account_id: AccountId,
    guard: OwnedMutexGuard<Box<dyn MailSession>>,
    last_used: Arc<Mutex<Instant>>,
}

impl SessionLease {
    /// Account the session belongs to.
    #[must_use]
    pub const fn account_id(&self) -> AccountId {
        self.account_id
    }
}

impl Deref for SessionLease {
    type Target = dyn MailSession;

    fn deref(&self) -> &Self::Target {
        self.guard.as_ref()
    }
}

impl DerefMut for SessionLease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.guard.as_mut()
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        *lock(&self.last_used) = Instant::now();
    }
}

/// Marks a running sync. Dropping it lets the account sync again.
pub struct SyncGuard<'a> {
    registry: &'a SessionRegistry,
    account_id: AccountId,
    cancelled: Arc<AtomicBool>,
}

impl SyncGuard<'_> {
    /// Whether cancellation was requested since the sync began.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        lock(&self.registry.active_syncs).remove(&self.account_id);
    }
}

/// Pool of authenticated sessions keyed by account.
pub struct SessionRegistry {
    connector: Arc<dyn SessionConnector>,
    credentials: Arc<dyn CredentialStore>,
    connect_timeout: Duration,
    sessions: Mutex<HashMap<AccountId, PooledSession>>,
    cancel_flags: Mutex<HashMap<AccountId, Arc<AtomicBool>>>,
    active_syncs: Mutex<HashSet<AccountId>>,
}

impl SessionRegistry {
    /// Timeout for connect, TLS and LOGIN together.
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Creates an empty registry.
    #[must_use]
    pub fn new(connector: Arc<dyn SessionConnector>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            connector,
            credentials,
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            sessions: Mutex::new(HashMap::new()),
            cancel_flags: Mutex::new(HashMap::new()),
            active_syncs: Mutex::new(HashSet::new()),
        }
    }

    /// Overrides the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Takes exclusive use of the account's session, connecting first if
    /// there is none. Waits while another task holds it.
    ///
    /// # Errors
    ///
    /// Returns an error if the account is unsaved, has no stored password,
    /// or the connection fails.
    pub async fn acquire(&self, account: &Account) -> Result<SessionLease> {
        let account_id = account.require_id()?;

        let existing = lock(&self.sessions)
            .get(&account_id)
            .map(|p| (Arc::clone(&p.session), Arc::clone(&p.last_used)));

        let (session, last_used) = if let Some(pooled) = existing {
            pooled
        } else {
            let password = self.credentials.imap_password(account_id)?;
            let config = account.connect_config(password, self.connect_timeout);
            let fresh = self.connector.connect(&config).await?;

            let (pooled, surplus) = match lock(&self.sessions).entry(account_id) {
                Entry::Occupied(entry) => {
                    let pooled = entry.get();
                    let handles = (Arc::clone(&pooled.session), Arc::clone(&pooled.last_used));
                    (handles, Some(fresh))
                }
                Entry::Vacant(entry) => {
                    let pooled = entry.insert(PooledSession {
                        session: Arc::new(tokio::sync::Mutex::new(fresh)),
                        last_used: Arc::new(Mutex::new(Instant::now())),
                    });
                    let handles = (Arc::clone(&pooled.session), Arc::clone(&pooled.last_used));
                    (handles, None)
                }
            };

            match surplus {
                Some(mut surplus) => {
                    debug!("Account {account_id} connected concurrently, closing the extra session");
                    if let Err(e) = surplus.logout().await {
                        debug!("Logout of extra session for account {account_id} failed: {e}");
                    }
                }
                None => info!("Opened session for account {account_id}"),
            }
            pooled
        };

        let guard = session.lock_owned().await;
        *lock(&last_used) = Instant::now();
        Ok(SessionLease {
            account_id,
            guard,
            last_used,
        })
    }

    /// Hands back a lease along with the result of the work done on it.
    ///
    /// A [`Error::Connection`] means the session is dead, so it is dropped
    /// from the pool and the next [`Self::acquire`] reconnects. Any other
    /// result leaves the session pooled. The result is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns `result`'s error.
    pub fn release<T>(&self, lease: SessionLease, result: Result<T>) -> Result<T> {
        if let Err(Error::Connection(e)) = &result {
            let account_id = lease.account_id;
            let session = Arc::clone(OwnedMutexGuard::mutex(&lease.guard));
            drop(lease);

            let mut sessions = lock(&self.sessions);
            if sessions
                .get(&account_id)
                .is_some_and(|pooled| Arc::ptr_eq(&pooled.session, &session))
            {
                sessions.remove(&account_id);
                warn!("Dropped broken session for account {account_id}: {e}");
            }
        }
        result
    }

    /// Whether the account has a pooled session.
    #[must_use]
    pub fn is_connected(&self, account_id: AccountId) -> bool {
        lock(&self.sessions).contains_key(&account_id)
    }

    /// Closes sessions idle for at least `ttl` that nobody is using.
    /// Returns how many were closed.
    pub async fn evict_idle(&self, ttl: Duration) -> usize {
        let idle: Vec<(AccountId, OwnedMutexGuard<Box<dyn MailSession>>)> = {
            let mut sessions = lock(&self.sessions);
            let candidates: Vec<AccountId> = sessions
                .iter()
                .filter(|(_, pooled)| pooled.idle_for() >= ttl)
                .map(|(id, _)| *id)
                .collect();

            candidates
                .into_iter()
                .filter_map(|id| {
                    let guard = Arc::clone(&sessions.get(&id)?.session).try_lock_owned().ok()?;
                    sessions.remove(&id);
                    Some((id, guard))
                })
                .collect()
        };

        let count = idle.len();
        for (account_id, mut session) in idle {
            if let Err(e) = session.logout().await {
                debug!("Logout of idle session for account {account_id} failed: {e}");
            }
            info!("Evicted idle session for account {account_id}");
        }
        count
    }

    /// Runs [`Self::evict_idle`] every `interval` until the task is aborted.
    #[must_use]
    pub fn spawn_eviction_sweep(
        self: &Arc<Self>,
        interval: Duration,
        ttl: Duration,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                registry.evict_idle(ttl).await;
            }
        })
    }

    /// Drops the account's session and trips its cancellation flag. A lease
    /// still in use keeps the connection until it is released.
    pub async fn disconnect(&self, account_id: AccountId) {
        self.cancel(account_id);
        let removed = lock(&self.sessions).remove(&account_id);

        if let Some(pooled) = removed {
            if let Ok(mut session) = pooled.session.try_lock_owned() {
                if let Err(e) = session.logout().await {
                    debug!("Logout for account {account_id} failed: {e}");
                }
            }
            info!("Disconnected account {account_id}");
        }
    }

    /// Requests cancellation of the account's running sync.
    pub fn cancel(&self, account_id: AccountId) {
        self.cancel_flag(account_id).store(true, Ordering::SeqCst);
        debug!("Cancellation requested for account {account_id}");
    }

    fn cancel_flag(&self, account_id: AccountId) -> Arc<AtomicBool> {
        Arc::clone(lock(&self.cancel_flags).entry(account_id).or_default())
    }

    /// Marks a sync of the account as running and clears any stale
    /// cancellation request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SyncInProgress`] if the account is already syncing.
    pub fn begin_sync(&self, account_id: AccountId) -> Result<SyncGuard<'_>> {
        if !lock(&self.active_syncs).insert(account_id) {
            return Err(Error::SyncInProgress(account_id));
        }

        let cancelled = self.cancel_flag(account_id);
        cancelled.store(false, Ordering::SeqCst);
        Ok(SyncGuard {
            registry: self,
            account_id,
            cancelled,
        })
    }
}
