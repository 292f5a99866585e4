//! UID SEARCH predicates.

use chrono::NaiveDate;

/// A search predicate understood by [`crate::MailSession::uid_search`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchQuery {
    /// Every message in the mailbox.
    All,
    /// Messages with a UID strictly greater than the given one.
    ///
    /// `UID n:*` always matches the highest message in the mailbox even when
    /// its UID is below `n`, so results must still be filtered with
    /// [`SearchQuery::retain_matching`].
    UidsAfter(u32),
    /// Messages whose internal date is on or after the given day.
    Since(NaiveDate),
    /// Messages carrying a given Message-ID header.
    MessageId(String),
}

impl SearchQuery {
    /// Renders the predicate in IMAP search syntax.
    #[must_use]
    pub fn to_imap(&self) -> String {
        match self {
            Self::All => "ALL".to_string(),
            Self::UidsAfter(uid) => format!("UID {}:*", uid.saturating_add(1)),
            Self::Since(date) => format!("SINCE {}", date.format("%d-%b-%Y")),
            Self::MessageId(id) => {
                let escaped = id.replace('\\', "\\\\").replace('"', "\\\"");
                format!("HEADER Message-ID \"{escaped}\"")
            }
        }
    }

    /// Drops UIDs the server returned that the predicate does not actually
    /// match, and sorts the rest ascending.
    #[must_use]
    pub fn retain_matching(&self, mut uids: Vec<u32>) -> Vec<u32> {
        if let Self::UidsAfter(cursor) = self {
            uids.retain(|uid| uid > cursor);
        }
        uids.sort_unstable();
        uids.dedup();
        uids
    }
}

/// Formats a list of UIDs as a compact IMAP sequence set (`1:3,7,9:10`).
#[must_use]
pub fn uid_set(uids: &[u32]) -> String {
    let mut sorted = uids.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut parts = Vec::new();
    let mut iter = sorted.into_iter();
    let Some(first) = iter.next() else {
        return String::new();
    };

    let (mut start, mut end) = (first, first);
    for uid in iter {
        if end.checked_add(1) == Some(uid) {
            end = uid;
        } else {
            parts.push(range_part(start, end));
            start = uid;
            end = uid;
        }
    }
    parts.push(range_part(start, end));
    parts.join(",")
}

fn range_part(start: u32, end: u32) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{start}:{end}")
    }
}
