//! Mail data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AccountId;

/// Local row ID of an email.
pub type EmailId = i64;

/// A locally stored email.
///
/// The server UID is only meaningful within (account, folder) and is `None`
/// when the folder's validity token changed or a move could not locate the
/// message in its destination. `message_id` is the cross-folder identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    /// Row ID (None until stored).
    pub id: Option<EmailId>,
    /// Owning account.
    pub account_id: AccountId,
    /// Folder path the message currently lives in.
    pub folder: String,
    /// Server UID within `folder`.
    pub uid: Option<u32>,
    /// Message-ID header, angle brackets included.
    pub message_id: String,
    /// Subject line.
    pub subject: String,
    /// Sender display name.
    pub from_name: Option<String>,
    /// Sender address, lowercased.
    pub from_address: String,
    /// Recipient addresses.
    pub to: Vec<String>,
    /// Sent date.
    pub date: DateTime<Utc>,
    /// Short plain-text preview, once known.
    pub snippet: Option<String>,
    /// `\Seen`.
    pub is_read: bool,
    /// `\Flagged`.
    pub is_starred: bool,
    /// Whether the message carries attachments.
    pub has_attachments: bool,
    /// Size in bytes as reported by the server.
    pub size: u32,
    /// Whether the full body has been fetched and stored.
    pub body_fetched: bool,
}

impl Email {
    /// Domain part of the sender address, lowercased. Empty if the address
    /// has no `@`.
    #[must_use]
    pub fn from_domain(&self) -> &str {
        self.from_address
            .rsplit_once('@')
            .map_or("", |(_, domain)| domain)
    }

    /// Row ID, or a data integrity error for unsaved emails.
    ///
    /// # Errors
    ///
    /// Returns an error if the email has not been stored yet.
    pub fn require_id(&self) -> crate::Result<EmailId> {
        self.id.ok_or_else(|| {
            crate::Error::DataIntegrity(format!("email {} is not stored", self.message_id))
        })
    }
}

/// Attachment metadata. Content is not stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentInfo {
    /// File name, if the part named one.
    pub filename: Option<String>,
    /// MIME type, e.g. `application/pdf`.
    pub content_type: String,
    /// Decoded size in bytes.
    pub size: usize,
}

/// Parsed body of an email.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailBody {
    /// Plain-text body.
    pub text: Option<String>,
    /// HTML body.
    pub html: Option<String>,
    /// Attachment metadata.
    pub attachments: Vec<AttachmentInfo>,
}

impl EmailBody {
    /// Maximum snippet length in characters.
    pub const SNIPPET_CHARS: usize = 200;

    /// Whitespace-collapsed preview of the text body.
    #[must_use]
    pub fn snippet(&self) -> Option<String> {
        let text = self.text.as_deref()?;
        let collapsed: String = text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .chars()
            .take(Self::SNIPPET_CHARS)
            .collect();
        (!collapsed.is_empty()).then_some(collapsed)
    }
}

/// A folder and its sync cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    /// Owning account.
    pub account_id: AccountId,
    /// Full mailbox path.
    pub path: String,
    /// UIDVALIDITY last seen from the server.
    pub uid_validity: Option<u32>,
    /// Highest UID stored locally. Never decreases while `uid_validity` holds.
    pub last_uid: u32,
}

/// Outcome of an idempotent batch insert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchInsert {
    /// IDs of emails that did not exist before.
    pub inserted: Vec<EmailId>,
    /// Number of already-known emails whose location and flags were refreshed.
    pub refreshed: usize,
}
