//! Server-side mail: the session pool, incremental sync, folder operations
//! and the progress channel.

mod folder_ops;
mod progress;
mod registry;
mod synchronizer;

pub use folder_ops::{FolderOperations, ImapFolderOperations, standard_folders};
pub use progress::{ProgressBus, SyncPhase, SyncProgress};
pub use registry::{SessionLease, SessionRegistry, SyncGuard};
pub use synchronizer::{MailSynchronizer, SyncOptions, SyncResult};
