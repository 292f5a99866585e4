//! Wire-level message types returned by a [`crate::MailSession`].

/// State of a mailbox after SELECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxInfo {
    /// UIDVALIDITY token; when it changes every cached UID is meaningless.
    pub uid_validity: u32,
    /// Predicted next UID, if the server reported it.
    pub uid_next: Option<u32>,
    /// Number of messages in the mailbox.
    pub exists: u32,
}

/// A parsed address from an envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireAddress {
    /// Display name, if any.
    pub name: Option<String>,
    /// `mailbox@host`.
    pub address: String,
}

/// Message flags we care about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageFlags {
    /// `\Seen`.
    pub seen: bool,
    /// `\Flagged`.
    pub flagged: bool,
}

/// Envelope, flags and structural metadata for one message.
///
/// This is what a sync batch pulls down; the body is fetched separately.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedMessage {
    /// UID within the selected mailbox.
    pub uid: u32,
    /// Message-ID header, angle brackets included.
    pub message_id: Option<String>,
    /// Subject header.
    pub subject: Option<String>,
    /// First From address.
    pub from: Option<WireAddress>,
    /// To addresses.
    pub to: Vec<WireAddress>,
    /// Raw Date header.
    pub date: Option<String>,
    /// Flags.
    pub flags: MessageFlags,
    /// `RFC822.SIZE`.
    pub size: u32,
    /// Whether BODYSTRUCTURE advertises a `multipart/mixed` body.
    pub has_attachments: bool,
}
