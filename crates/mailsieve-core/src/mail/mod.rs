//! Locally stored mail: emails, bodies and folder cursors.
//!
//! The synchronizer is the only writer of new emails and cursors; triage,
//! snooze and review only relocate existing rows.

mod model;
mod repository;

pub use model::{AttachmentInfo, BatchInsert, Email, EmailBody, EmailId, Folder};
pub use repository::{EmailRepository, FolderRepository};
