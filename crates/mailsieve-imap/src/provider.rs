//! Provider-specific folder layout.
//!
//! Providers disagree on where they keep sent mail, drafts and trash, and a
//! few of them file a copy of every message submitted over SMTP into the Sent
//! folder on their own. The table below is keyed by a substring of the IMAP
//! host and is resolved once per account.

/// Known mail providers with their own folder naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Provider {
    /// Unknown or self-hosted server.
    #[default]
    Generic,
    /// Gmail (imap.gmail.com).
    Gmail,
    /// Microsoft Outlook/Office 365.
    Outlook,
    /// Yahoo Mail.
    Yahoo,
    /// Apple iCloud Mail.
    ICloud,
    /// Fastmail.
    Fastmail,
}

/// Folder paths used by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderPaths {
    /// Which provider these paths belong to.
    pub provider: Provider,
    /// Inbox path.
    pub inbox: &'static str,
    /// Sent mail path.
    pub sent: &'static str,
    /// Drafts path.
    pub drafts: &'static str,
    /// Trash path.
    pub trash: &'static str,
    /// Archive path.
    pub archive: &'static str,
    /// The provider stores submitted mail in Sent by itself, so appending a
    /// copy would duplicate it.
    pub auto_saves_sent: bool,
}

const GENERIC: ProviderPaths = ProviderPaths {
    provider: Provider::Generic,
    inbox: "INBOX",
    sent: "Sent",
    drafts: "Drafts",
    trash: "Trash",
    archive: "Archive",
    auto_saves_sent: false,
};

/// Host substring → provider paths. First match wins.
const PROVIDER_TABLE: &[(&str, ProviderPaths)] = &[
    (
        "gmail.com",
        ProviderPaths {
            provider: Provider::Gmail,
            inbox: "INBOX",
            sent: "[Gmail]/Sent Mail",
            drafts: "[Gmail]/Drafts",
            trash: "[Gmail]/Trash",
            archive: "[Gmail]/All Mail",
            auto_saves_sent: true,
        },
    ),
    (
        "googlemail.com",
        ProviderPaths {
            provider: Provider::Gmail,
            inbox: "INBOX",
            sent: "[Gmail]/Sent Mail",
            drafts: "[Gmail]/Drafts",
            trash: "[Gmail]/Trash",
            archive: "[Gmail]/All Mail",
            auto_saves_sent: true,
        },
    ),
    (
        "office365.com",
        ProviderPaths {
            provider: Provider::Outlook,
            inbox: "INBOX",
            sent: "Sent Items",
            drafts: "Drafts",
            trash: "Deleted Items",
            archive: "Archive",
            auto_saves_sent: true,
        },
    ),
    (
        "outlook.com",
        ProviderPaths {
            provider: Provider::Outlook,
            inbox: "INBOX",
            sent: "Sent Items",
            drafts: "Drafts",
            trash: "Deleted Items",
            archive: "Archive",
            auto_saves_sent: true,
        },
    ),
    (
        "yahoo.com",
        ProviderPaths {
            provider: Provider::Yahoo,
            inbox: "INBOX",
            sent: "Sent",
            drafts: "Draft",
            trash: "Trash",
            archive: "Archive",
            auto_saves_sent: true,
        },
    ),
    (
        "mail.me.com",
        ProviderPaths {
            provider: Provider::ICloud,
            inbox: "INBOX",
            sent: "Sent Messages",
            drafts: "Drafts",
            trash: "Deleted Messages",
            archive: "Archive",
            auto_saves_sent: false,
        },
    ),
    (
        "fastmail.com",
        ProviderPaths {
            provider: Provider::Fastmail,
            inbox: "INBOX",
            sent: "Sent",
            drafts: "Drafts",
            trash: "Trash",
            archive: "Archive",
            auto_saves_sent: false,
        },
    ),
];

impl ProviderPaths {
    /// Resolves the folder layout for an IMAP host.
    #[must_use]
    pub fn for_host(host: &str) -> Self {
        let host = host.to_lowercase();
        PROVIDER_TABLE
            .iter()
            .find(|(needle, _)| host.contains(needle))
            .map_or(GENERIC, |(_, paths)| *paths)
    }

    /// Returns the generic layout used for unknown servers.
    #[must_use]
    pub const fn generic() -> Self {
        GENERIC
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gmail_paths() {
        let paths = ProviderPaths::for_host("imap.gmail.com");
        assert_eq!(paths.provider, Provider::Gmail);
        assert_eq!(paths.trash, "[Gmail]/Trash");
        assert!(paths.auto_saves_sent);
    }

    #[test]
    fn test_host_match_is_case_insensitive() {
        let paths = ProviderPaths::for_host("Outlook.Office365.com");
        assert_eq!(paths.provider, Provider::Outlook);
        assert_eq!(paths.sent, "Sent Items");
    }

    #[test]
    fn test_unknown_host_falls_back_to_generic() {
        let paths = ProviderPaths::for_host("mail.example.org");
        assert_eq!(paths, ProviderPaths::generic());
        assert!(!paths.auto_saves_sent);
    }

    #[test]
    fn test_icloud_keeps_sent_copies_to_us() {
        let paths = ProviderPaths::for_host("imap.mail.me.com");
        assert_eq!(paths.provider, Provider::ICloud);
        assert!(!paths.auto_saves_sent);
    }
}
