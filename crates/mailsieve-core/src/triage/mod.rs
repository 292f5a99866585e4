//! Email triage.
//!
//! A fast rule-based [`pattern`] matcher makes a first guess, an arbiter
//! backed [`TriageClassifier`] confirms or overrides it, and the
//! [`TriageOrchestrator`] logs the decision and files the email. User
//! decisions flow back through [`ReviewService`] and [`SenderRuleLearner`].

pub mod arbiter;
pub mod classifier;
mod learner;
mod model;
mod orchestrator;
pub mod pattern;
mod repository;
mod review;

pub use arbiter::{
    BackendKind, CompletionBackend, LocalCompletion, RemoteCompletion, backend_from_config,
};
pub use classifier::{ClassifyOutcome, TriageClassifier};
pub use learner::{
    AUTO_APPLY_AFTER, INITIAL_RULE_CONFIDENCE, MAX_RULE_CONFIDENCE, RULE_CONFIDENCE_STEP,
    SenderRuleLearner,
};
pub use model::{
    ClassificationSource, ClassificationState, ClassificationStatus, PatternMatchResult,
    PatternType, SenderRule, TrainingExample, TrainingSource, TriageClassificationResult,
    TriageFolder, TriageLogEntry,
};
pub use orchestrator::{TriageOptions, TriageOrchestrator};
pub use repository::TriageRepository;
pub use review::{BulkOutcome, ReviewService};
