//! Snooze/reminder system for emails.
//!
//! A snoozed email is moved to the snooze folder and remembers where it came
//! from; a periodic sweep moves it back once its wake time has passed.

mod model;
mod repository;
mod scheduler;

pub use model::{SNOOZED_FOLDER, SnoozeDuration, SnoozeReason, SnoozedEmail};
pub use repository::SnoozeRepository;
pub use scheduler::{SnoozeScheduler, SweepOutcome};
