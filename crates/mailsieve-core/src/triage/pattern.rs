//! Deterministic first-opinion classifier.
//!
//! A fixed, priority-ordered rule table over sender domain, subject and
//! snippet. The first matching rule wins. No I/O, no state.

use chrono::{DateTime, Duration, Utc};

use super::model::{PatternMatchResult, TriageFolder};
use crate::mail::Email;

/// Confidence when nothing matches.
pub const NO_MATCH_CONFIDENCE: f64 = 0.3;

/// Minutes a one-time code stays useful.
pub const CODE_AUTO_DELETE_MINUTES: u32 = 15;

/// Minutes before a promotion may be deleted (one week).
pub const PROMOTION_AUTO_DELETE_MINUTES: u32 = 7 * 24 * 60;

/// Hours a shipping notice is snoozed while the parcel travels.
pub const SHIPPING_SNOOZE_HOURS: i64 = 72;

struct Rule {
    folder: TriageFolder,
    confidence: f64,
    tags: &'static [&'static str],
    /// Sender domains; subdomains match too.
    senders: &'static [&'static str],
    /// Substrings of the lowercased subject and snippet.
    phrases: &'static [&'static str],
    /// Whole words of the lowercased subject and snippet.
    words: &'static [&'static str],
    /// Require a sender hit and a text hit instead of either.
    needs_both: bool,
    snooze_hours: Option<i64>,
    auto_delete_after: Option<u32>,
}

const SOCIAL_SENDERS: &[&str] = &[
    "facebookmail.com",
    "linkedin.com",
    "twitter.com",
    "x.com",
    "instagram.com",
    "redditmail.com",
    "discord.com",
    "mastodon.social",
    "threads.net",
    "pinterest.com",
];

const EMPTY: &[&str] = &[];

const RULES: &[Rule] = &[
    // Security codes.
    Rule {
        folder: TriageFolder::Inbox,
        confidence: 0.95,
        tags: &["2fa"],
        senders: EMPTY,
        phrases: &[
            "verification code",
            "security code",
            "one-time code",
            "one-time password",
            "one time password",
            "login code",
            "sign-in code",
            "sign in code",
            "your code is",
            "two-factor",
            "authentication code",
            "confirmation code",
        ],
        words: &["otp", "2fa"],
        needs_both: false,
        snooze_hours: None,
        auto_delete_after: Some(CODE_AUTO_DELETE_MINUTES),
    },
    // Social direct messages.
    Rule {
        folder: TriageFolder::Inbox,
        confidence: 0.85,
        tags: &["social", "dm"],
        senders: SOCIAL_SENDERS,
        phrases: &[
            "sent you a message",
            "new message from",
            "messaged you",
            "direct message",
            "replied to your message",
            "sent you a private message",
        ],
        words: EMPTY,
        needs_both: true,
        snooze_hours: None,
        auto_delete_after: None,
    },
    // Social notifications.
    Rule {
        folder: TriageFolder::Social,
        confidence: 0.85,
        tags: &["social"],
        senders: SOCIAL_SENDERS,
        phrases: EMPTY,
        words: EMPTY,
        needs_both: false,
        snooze_hours: None,
        auto_delete_after: None,
    },
    // Developer tooling.
    Rule {
        folder: TriageFolder::Dev,
        confidence: 0.9,
        tags: &["dev"],
        senders: &[
            "github.com",
            "gitlab.com",
            "bitbucket.org",
            "atlassian.net",
            "circleci.com",
            "travis-ci.com",
            "vercel.com",
            "netlify.com",
            "sentry.io",
            "linear.app",
            "docker.com",
            "npmjs.com",
            "crates.io",
        ],
        phrases: &["pull request", "merge request", "build failed", "pipeline failed"],
        words: EMPTY,
        needs_both: false,
        snooze_hours: None,
        auto_delete_after: None,
    },
    // Shipping.
    Rule {
        folder: TriageFolder::Shipping,
        confidence: 0.85,
        tags: &["shipping"],
        senders: &["ups.com", "fedex.com", "dhl.com", "usps.com", "dpd.com", "royalmail.com"],
        phrases: &[
            "has shipped",
            "have shipped",
            "out for delivery",
            "tracking number",
            "track your package",
            "your package",
            "delivery update",
            "shipment",
            "on its way",
            "on the way",
        ],
        words: EMPTY,
        needs_both: false,
        snooze_hours: Some(SHIPPING_SNOOZE_HOURS),
        auto_delete_after: None,
    },
    // Invoices and receipts.
    Rule {
        folder: TriageFolder::Receipts,
        confidence: 0.85,
        tags: &["receipt"],
        senders: EMPTY,
        phrases: &[
            "receipt",
            "invoice",
            "payment received",
            "payment confirmation",
            "order confirmation",
            "billing statement",
            "your order",
            "thanks for your purchase",
            "thank you for your purchase",
        ],
        words: EMPTY,
        needs_both: false,
        snooze_hours: None,
        auto_delete_after: None,
    },
    // Travel.
    Rule {
        folder: TriageFolder::Travel,
        confidence: 0.85,
        tags: &["travel"],
        senders: &["airbnb.com", "booking.com", "expedia.com", "trainline.com", "kayak.com"],
        phrases: &[
            "boarding pass",
            "itinerary",
            "booking confirmation",
            "reservation",
            "check-in",
            "your trip",
            "your flight",
        ],
        words: &["flight"],
        needs_both: false,
        snooze_hours: None,
        auto_delete_after: None,
    },
    // Contracts and administration.
    Rule {
        folder: TriageFolder::Admin,
        confidence: 0.75,
        tags: &["admin"],
        senders: EMPTY,
        phrases: &[
            "contract",
            "agreement",
            "terms of service",
            "privacy policy",
            "policy update",
            "account statement",
            "insurance",
            "signature requested",
        ],
        words: &["tax", "legal"],
        needs_both: false,
        snooze_hours: None,
        auto_delete_after: None,
    },
    // Newsletters.
    Rule {
        folder: TriageFolder::Newsletters,
        confidence: 0.8,
        tags: &["newsletter"],
        senders: &["substack.com", "beehiiv.com", "mailchimpapp.com", "buttondown.email"],
        phrases: &["newsletter", "weekly digest", "daily digest", "this week in", "issue #"],
        words: &["digest"],
        needs_both: false,
        snooze_hours: None,
        auto_delete_after: None,
    },
    // Promotions.
    Rule {
        folder: TriageFolder::Promotions,
        confidence: 0.7,
        tags: &["promotion"],
        senders: EMPTY,
        phrases: &[
            "% off",
            "limited time",
            "free shipping",
            "special offer",
            "exclusive offer",
            "don't miss",
            "last chance",
            "flash sale",
            "black friday",
            "promo code",
        ],
        words: &["sale", "discount", "coupon", "deal", "deals"],
        needs_both: false,
        snooze_hours: None,
        auto_delete_after: Some(PROMOTION_AUTO_DELETE_MINUTES),
    },
];

impl Rule {
    fn matches(&self, domain: &str, text: &str) -> bool {
        let sender_hit = self.senders.iter().any(|s| domain_matches(domain, s));
        let text_hit = self.phrases.iter().any(|p| text.contains(p))
            || self.words.iter().any(|w| contains_word(text, w));

        if self.needs_both {
            sender_hit && text_hit
        } else {
            sender_hit || text_hit
        }
    }

    fn to_result(&self, now: DateTime<Utc>) -> PatternMatchResult {
        PatternMatchResult {
            folder: self.folder,
            confidence: self.confidence,
            tags: self.tags.iter().map(ToString::to_string).collect(),
            snooze_until: self.snooze_hours.map(|h| now + Duration::hours(h)),
            auto_delete_after: self.auto_delete_after,
        }
    }
}

fn domain_matches(domain: &str, sender: &str) -> bool {
    domain == sender
        || domain
            .strip_suffix(sender)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

fn contains_word(text: &str, word: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric())
        .any(|token| token == word)
}

/// Classify an email relative to `now`, which anchors snooze hints.
#[must_use]
pub fn match_at(email: &Email, now: DateTime<Utc>) -> PatternMatchResult {
    let domain = email.from_domain().to_lowercase();
    let text = format!(
        "{} {}",
        email.subject,
        email.snippet.as_deref().unwrap_or_default()
    )
    .to_lowercase();

    RULES
        .iter()
        .find(|rule| rule.matches(&domain, &text))
        .map_or_else(
            || PatternMatchResult {
                folder: TriageFolder::Inbox,
                confidence: NO_MATCH_CONFIDENCE,
                tags: Vec::new(),
                snooze_until: None,
                auto_delete_after: None,
            },
            |rule| rule.to_result(now),
        )
}

/// Classify an email now.
#[must_use]
pub fn match_email(email: &Email) -> PatternMatchResult {
    match_at(email, Utc::now())
}
