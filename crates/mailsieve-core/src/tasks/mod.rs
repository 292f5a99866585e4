//! Background work: bulk classification and its daily budget.

mod budget;
mod bulk;

pub use budget::{BudgetRepository, ClassificationBudget, DailyUsage};
pub use bulk::{BulkClassifier, BulkProgress, BulkSummary, ItemOutcome};
