//! Snooze data models.

use chrono::{DateTime, Datelike, Duration, Local, TimeZone, Utc};

use crate::AccountId;
use crate::mail::EmailId;

/// Folder snoozed mail is parked in until it wakes.
pub const SNOOZED_FOLDER: &str = "Snoozed";

/// Why an email was snoozed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnoozeReason {
    /// The user asked for it.
    Manual,
    /// A shipping notice, resurfaced around delivery.
    Shipping,
    /// Waiting for the other side to reply.
    AwaitingReply,
}

impl SnoozeReason {
    /// Stored form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Shipping => "shipping",
            Self::AwaitingReply => "awaiting_reply",
        }
    }

    /// Parses the stored form, defaulting to [`Self::Manual`].
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "shipping" => Self::Shipping,
            "awaiting_reply" => Self::AwaitingReply,
            _ => Self::Manual,
        }
    }
}

/// A pending wake-up for one email.
#[derive(Debug, Clone, PartialEq)]
pub struct SnoozedEmail {
    /// The snoozed email.
    pub email_id: EmailId,
    /// Owning account.
    pub account_id: AccountId,
    /// Folder the email goes back to.
    pub origin_folder: String,
    /// When it wakes.
    pub snooze_until: DateTime<Utc>,
    /// Why.
    pub reason: SnoozeReason,
    /// When it was snoozed.
    pub snoozed_at: DateTime<Utc>,
}

impl SnoozedEmail {
    /// Creates a snooze starting now.
    #[must_use]
    pub fn new(
        email_id: EmailId,
        account_id: AccountId,
        origin_folder: impl Into<String>,
        snooze_until: DateTime<Utc>,
        reason: SnoozeReason,
    ) -> Self {
        Self {
            email_id,
            account_id,
            origin_folder: origin_folder.into(),
            snooze_until,
            reason,
            snoozed_at: Utc::now(),
        }
    }

    /// Returns true if the snooze is due at `now`.
    #[must_use]
    pub fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.snooze_until
    }

    /// Returns the remaining time until the snooze expires.
    #[must_use]
    pub fn time_remaining(&self) -> Option<Duration> {
        let now = Utc::now();
        (now < self.snooze_until).then(|| self.snooze_until - now)
    }
}

/// Preset snooze duration options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnoozeDuration {
    /// Snooze for 3 hours.
    LaterToday,
    /// Snooze until tomorrow morning (9 AM).
    Tomorrow,
    /// Snooze until next Monday 9 AM.
    NextWeek,
    /// Custom date/time.
    Custom(DateTime<Utc>),
}

impl SnoozeDuration {
    /// Calculates the snooze expiry time from now, in local time.
    #[must_use]
    pub fn expiry_time(&self) -> DateTime<Utc> {
        self.expiry_from(Local::now())
    }

    /// Calculates the snooze expiry time from `now`.
    #[must_use]
    pub fn expiry_from<Tz: TimeZone>(&self, now: DateTime<Tz>) -> DateTime<Utc> {
        let at_nine = |days: u64, fallback: Duration| {
            (now.date_naive() + chrono::Days::new(days))
                .and_hms_opt(9, 0, 0)
                .and_then(|t| t.and_local_timezone(now.timezone()).single())
                .map_or_else(
                    || (now.clone() + fallback).with_timezone(&Utc),
                    |t| t.with_timezone(&Utc),
                )
        };

        match self {
            Self::LaterToday => (now.clone() + Duration::hours(3)).with_timezone(&Utc),
            Self::Tomorrow => at_nine(1, Duration::hours(24)),
            Self::NextWeek => {
                let days = 7 - now.weekday().num_days_from_monday();
                at_nine(u64::from(days), Duration::days(i64::from(days)))
            }
            Self::Custom(dt) => *dt,
        }
    }

    /// Returns a human-readable description of the snooze duration.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::LaterToday => "Later today (3 hours)".to_string(),
            Self::Tomorrow => "Tomorrow morning".to_string(),
            Self::NextWeek => "Next Monday".to_string(),
            Self::Custom(dt) => {
                let local: DateTime<Local> = dt.with_timezone(&Local);
                local.format("%a, %b %d at %H:%M").to_string()
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_presets_from_a_wednesday() {
        let now = at("2026-10-14T15:30:00Z");
        assert_eq!(
            SnoozeDuration::LaterToday.expiry_from(now),
            at("2026-10-14T18:30:00Z")
        );
        assert_eq!(
            SnoozeDuration::Tomorrow.expiry_from(now),
            at("2026-10-15T09:00:00Z")
        );
        assert_eq!(
            SnoozeDuration::NextWeek.expiry_from(now),
            at("2026-10-19T09:00:00Z")
        );
    }

    #[test]
    fn test_next_week_from_monday_is_a_week_out() {
        let monday = at("2026-10-19T08:00:00Z");
        assert_eq!(
            SnoozeDuration::NextWeek.expiry_from(monday),
            at("2026-10-26T09:00:00Z")
        );
    }

    #[test]
    fn test_reason_round_trips_through_storage_form() {
        for reason in [
            SnoozeReason::Manual,
            SnoozeReason::Shipping,
            SnoozeReason::AwaitingReply,
        ] {
            assert_eq!(SnoozeReason::parse(reason.as_str()), reason);
        }
    }

    #[test]
    fn test_due() {
        let snooze = SnoozedEmail::new(
            1,
            AccountId(1),
            "INBOX",
            at("2026-10-14T09:00:00Z"),
            SnoozeReason::Manual,
        );
        assert!(!snooze.is_due_at(at("2026-10-14T08:59:59Z")));
        assert!(snooze.is_due_at(at("2026-10-14T09:00:00Z")));
    }
}
