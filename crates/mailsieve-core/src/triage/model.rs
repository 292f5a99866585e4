//! Triage data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AccountId;
use crate::mail::EmailId;

/// The closed set of destination folders triage routes mail into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriageFolder {
    /// Personal mail and anything time-sensitive.
    #[serde(rename = "INBOX")]
    Inbox,
    /// Uncertain decisions waiting for a human.
    Review,
    /// Social network notifications.
    Social,
    /// Developer tooling: CI, code review, issue trackers.
    Dev,
    /// Order and delivery tracking.
    Shipping,
    /// Invoices, receipts and payment confirmations.
    Receipts,
    /// Bookings and itineraries.
    Travel,
    /// Contracts, accounts, legal and administrative mail.
    Admin,
    /// Subscribed editorial content.
    Newsletters,
    /// Marketing and sales.
    Promotions,
}

impl TriageFolder {
    /// Every folder, in prompt order.
    pub const ALL: [Self; 10] = [
        Self::Inbox,
        Self::Review,
        Self::Social,
        Self::Dev,
        Self::Shipping,
        Self::Receipts,
        Self::Travel,
        Self::Admin,
        Self::Newsletters,
        Self::Promotions,
    ];

    /// Parse a folder name, case-insensitively. Anything outside the
    /// taxonomy is `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|folder| folder.as_str().eq_ignore_ascii_case(s.trim()))
    }

    /// Mailbox path of this folder.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Inbox => "INBOX",
            Self::Review => "Review",
            Self::Social => "Social",
            Self::Dev => "Dev",
            Self::Shipping => "Shipping",
            Self::Receipts => "Receipts",
            Self::Travel => "Travel",
            Self::Admin => "Admin",
            Self::Newsletters => "Newsletters",
            Self::Promotions => "Promotions",
        }
    }

    /// What belongs in this folder.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Inbox => "Personal mail, direct messages and anything needing action soon",
            Self::Review => "Cannot decide; a human should look at it",
            Self::Social => "Notifications from social networks (likes, follows, digests)",
            Self::Dev => "CI results, code review, issue trackers, deploy alerts",
            Self::Shipping => "Order confirmations with tracking, delivery updates",
            Self::Receipts => "Invoices, receipts, payment and billing confirmations",
            Self::Travel => "Flight, hotel, train and car bookings, itineraries",
            Self::Admin => "Contracts, account and legal notices, tax, insurance",
            Self::Newsletters => "Subscribed newsletters and editorial digests",
            Self::Promotions => "Marketing, sales, coupons and offers",
        }
    }
}

impl std::fmt::Display for TriageFolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The pattern matcher's cheap first opinion. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatchResult {
    /// Suggested folder.
    pub folder: TriageFolder,
    /// Rule-specific fixed confidence in [0, 1].
    pub confidence: f64,
    /// Descriptive tags, e.g. `2fa`.
    pub tags: Vec<String>,
    /// When to resurface the email, for mail awaiting an external event.
    pub snooze_until: Option<DateTime<Utc>>,
    /// Minutes after which the email may be deleted.
    pub auto_delete_after: Option<u32>,
}

/// Where a classification decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationSource {
    /// The generative arbiter decided.
    Arbiter,
    /// The arbiter failed or answered unusably.
    Fallback,
    /// A learned auto-apply sender rule decided without the arbiter.
    SenderRule,
}

impl ClassificationSource {
    /// Convert to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Arbiter => "arbiter",
            Self::Fallback => "fallback",
            Self::SenderRule => "sender_rule",
        }
    }

    /// Parse from database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "arbiter" => Self::Arbiter,
            "sender_rule" => Self::SenderRule,
            _ => Self::Fallback,
        }
    }
}

/// Final classification of one email.
#[derive(Debug, Clone, PartialEq)]
pub struct TriageClassificationResult {
    /// Decided folder.
    pub folder: TriageFolder,
    /// Tags (arbiter tags merged with pattern tags).
    pub tags: Vec<String>,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// When to resurface the email.
    pub snooze_until: Option<DateTime<Utc>>,
    /// Minutes after which the email may be deleted.
    pub auto_delete_after: Option<u32>,
    /// The pattern matcher's suggestion.
    pub pattern_hint: Option<TriageFolder>,
    /// Whether the decision agrees with the pattern hint.
    pub pattern_agreed: bool,
    /// Free-text explanation, or the failure cause for fallbacks.
    pub reasoning: String,
    /// Who decided.
    pub source: ClassificationSource,
}

impl TriageClassificationResult {
    /// The uniform fallback: Review at zero confidence, pattern tags kept.
    #[must_use]
    pub fn fallback(hint: &PatternMatchResult, cause: impl Into<String>) -> Self {
        Self {
            folder: TriageFolder::Review,
            tags: hint.tags.clone(),
            confidence: 0.0,
            snooze_until: None,
            auto_delete_after: None,
            pattern_hint: Some(hint.folder),
            pattern_agreed: false,
            reasoning: cause.into(),
            source: ClassificationSource::Fallback,
        }
    }

    /// Whether this is the fallback result.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.source == ClassificationSource::Fallback
    }
}

/// How a training example was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingSource {
    /// The user corrected or confirmed a triage suggestion.
    TriageCorrection,
    /// The user accepted a pending review item.
    ReviewAccept,
    /// The user moved an email by hand.
    ManualMove,
}

impl TrainingSource {
    /// Convert to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TriageCorrection => "triage_correction",
            Self::ReviewAccept => "review_accept",
            Self::ManualMove => "manual_move",
        }
    }

    /// Parse from database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "review_accept" => Self::ReviewAccept,
            "manual_move" => Self::ManualMove,
            _ => Self::TriageCorrection,
        }
    }
}

/// A recorded (suggested, chosen) pair. Append-only.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingExample {
    /// Account.
    pub account_id: AccountId,
    /// Sender domain, lowercased.
    pub from_domain: String,
    /// Subject of the email.
    pub subject: String,
    /// What the classifier suggested, if anything.
    pub ai_suggestion: Option<TriageFolder>,
    /// What the user chose.
    pub user_choice: TriageFolder,
    /// Whether the user overrode the suggestion.
    pub was_correction: bool,
    /// How the example was produced.
    pub source: TrainingSource,
    /// When it was recorded.
    pub created_at: DateTime<Utc>,
}

/// What a sender rule's pattern matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternType {
    /// The sender's domain.
    Domain,
    /// The full sender address.
    Address,
}

impl PatternType {
    /// Convert to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Domain => "domain",
            Self::Address => "address",
        }
    }

    /// Parse from database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        if s == "address" {
            Self::Address
        } else {
            Self::Domain
        }
    }
}

/// A learned mapping from sender to folder.
#[derive(Debug, Clone, PartialEq)]
pub struct SenderRule {
    /// Account.
    pub account_id: AccountId,
    /// Domain or address, lowercased.
    pub pattern: String,
    /// What `pattern` is.
    pub pattern_type: PatternType,
    /// Folder to route to.
    pub target_folder: TriageFolder,
    /// Confidence in [0, 1]; grows on reconfirmation.
    pub confidence: f64,
    /// Consecutive corrections to `target_folder`.
    pub correction_count: u32,
    /// Whether the rule decides without the arbiter.
    pub auto_apply: bool,
}

impl SenderRule {
    /// Whether the rule applies to an email from `address`.
    #[must_use]
    pub fn matches(&self, address: &str) -> bool {
        let address = address.to_lowercase();
        match self.pattern_type {
            PatternType::Address => address == self.pattern,
            PatternType::Domain => address
                .rsplit_once('@')
                .is_some_and(|(_, domain)| domain == self.pattern),
        }
    }
}

/// One audit row per classification event. Never updated.
#[derive(Debug, Clone, PartialEq)]
pub struct TriageLogEntry {
    /// Classified email.
    pub email_id: EmailId,
    /// Account.
    pub account_id: AccountId,
    /// Pattern matcher suggestion.
    pub pattern_folder: TriageFolder,
    /// Pattern matcher confidence.
    pub pattern_confidence: f64,
    /// Arbiter decision; `None` unless the arbiter decided.
    pub llm_folder: Option<TriageFolder>,
    /// Final folder.
    pub final_folder: TriageFolder,
    /// Final confidence.
    pub confidence: f64,
    /// Who decided.
    pub source: ClassificationSource,
    /// Whether a remote move was issued.
    pub moved: bool,
    /// Explanation or failure cause.
    pub reasoning: String,
    /// When the event happened.
    pub created_at: DateTime<Utc>,
}

/// Status of the latest triage outcome of an email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClassificationStatus {
    /// Never classified.
    #[default]
    Unprocessed,
    /// Classified and applied.
    Classified,
    /// Classified below the threshold; waiting for a human.
    PendingReview,
    /// A human accepted the suggestion.
    Accepted,
    /// A human dismissed the suggestion.
    Dismissed,
    /// Classification failed.
    Error,
}

impl ClassificationStatus {
    /// Convert to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unprocessed => "unprocessed",
            Self::Classified => "classified",
            Self::PendingReview => "pending_review",
            Self::Accepted => "accepted",
            Self::Dismissed => "dismissed",
            Self::Error => "error",
        }
    }

    /// Parse from database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "classified" => Self::Classified,
            "pending_review" => Self::PendingReview,
            "accepted" => Self::Accepted,
            "dismissed" => Self::Dismissed,
            "error" => Self::Error,
            _ => Self::Unprocessed,
        }
    }
}

/// Latest triage outcome of an email, as shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationState {
    /// Email.
    pub email_id: EmailId,
    /// Account.
    pub account_id: AccountId,
    /// Status.
    pub status: ClassificationStatus,
    /// Suggested folder.
    pub suggested_folder: Option<TriageFolder>,
    /// Confidence of the suggestion.
    pub confidence: Option<f64>,
    /// Reasoning or error message.
    pub detail: Option<String>,
    /// Last change.
    pub updated_at: DateTime<Utc>,
}

impl ClassificationState {
    /// Builds the state for a fresh classification.
    #[must_use]
    pub fn from_result(
        email_id: EmailId,
        account_id: AccountId,
        status: ClassificationStatus,
        result: &TriageClassificationResult,
    ) -> Self {
        Self {
            email_id,
            account_id,
            status,
            suggested_folder: Some(result.folder),
            confidence: Some(result.confidence),
            detail: Some(result.reasoning.clone()),
            updated_at: Utc::now(),
        }
    }

    /// Builds the error state for a failed classification.
    #[must_use]
    pub fn error(email_id: EmailId, account_id: AccountId, message: impl Into<String>) -> Self {
        Self {
            email_id,
            account_id,
            status: ClassificationStatus::Error,
            suggested_folder: None,
            confidence: None,
            detail: Some(message.into()),
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_parse_is_closed_and_case_insensitive() {
        assert_eq!(TriageFolder::parse("inbox"), Some(TriageFolder::Inbox));
        assert_eq!(TriageFolder::parse(" Receipts "), Some(TriageFolder::Receipts));
        assert_eq!(TriageFolder::parse("Spam"), None);
        assert_eq!(TriageFolder::parse(""), None);
    }

    #[test]
    fn test_folder_round_trip() {
        for folder in TriageFolder::ALL {
            assert_eq!(TriageFolder::parse(folder.as_str()), Some(folder));
        }
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            ClassificationStatus::Unprocessed,
            ClassificationStatus::Classified,
            ClassificationStatus::PendingReview,
            ClassificationStatus::Accepted,
            ClassificationStatus::Dismissed,
            ClassificationStatus::Error,
        ] {
            assert_eq!(ClassificationStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn test_sender_rule_matches_domain() {
        let rule = SenderRule {
            account_id: AccountId(1),
            pattern: "github.com".to_string(),
            pattern_type: PatternType::Domain,
            target_folder: TriageFolder::Dev,
            confidence: 0.8,
            correction_count: 3,
            auto_apply: true,
        };
        assert!(rule.matches("Noreply@GitHub.com"));
        assert!(!rule.matches("someone@notgithub.com.evil"));
    }

    #[test]
    fn test_fallback_keeps_pattern_tags() {
        let hint = PatternMatchResult {
            folder: TriageFolder::Inbox,
            confidence: 0.95,
            tags: vec!["2fa".to_string()],
            snooze_until: None,
            auto_delete_after: Some(15),
        };
        let result = TriageClassificationResult::fallback(&hint, "arbiter unreachable");
        assert_eq!(result.folder, TriageFolder::Review);
        assert!(result.confidence.abs() < f64::EPSILON);
        assert_eq!(result.tags, vec!["2fa".to_string()]);
        assert!(result.is_fallback());
    }
}
