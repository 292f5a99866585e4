//! Sync progress events.

use tokio::sync::broadcast;

use crate::AccountId;

/// Stage of a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Acquiring the session.
    Connecting,
    /// Searching for new UIDs.
    Counting,
    /// Pulling envelopes.
    Fetching,
    /// Writing a batch.
    Storing,
    /// Finished normally.
    Complete,
    /// Failed; see `error`.
    Error,
    /// Stopped at a batch boundary on request.
    Cancelled,
}

impl SyncPhase {
    /// Whether no further events follow for this sync.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Cancelled)
    }
}

/// One progress event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncProgress {
    /// Account being synced.
    pub account_id: AccountId,
    /// Folder being synced.
    pub folder: String,
    /// Stage.
    pub phase: SyncPhase,
    /// Messages processed so far.
    pub current: usize,
    /// Messages to process.
    pub total: usize,
    /// New emails stored so far.
    pub new_count: usize,
    /// Failure message for [`SyncPhase::Error`].
    pub error: Option<String>,
}

/// Multi-subscriber progress channel. Each subscriber has its own bounded
/// queue; a slow subscriber loses its oldest events without affecting others.
#[derive(Debug, Clone)]
pub struct ProgressBus {
    sender: broadcast::Sender<SyncProgress>,
}

impl ProgressBus {
    /// Events buffered per subscriber.
    pub const DEFAULT_CAPACITY: usize = 256;

    /// Creates a bus with the given per-subscriber capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to events emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncProgress> {
        self.sender.subscribe()
    }

    /// Emits an event. Having no subscribers is fine.
    pub fn emit(&self, event: SyncProgress) {
        let _ = self.sender.send(event);
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
