//! Tests for the public wire helpers used by the sync engine.

use chrono::NaiveDate;

use mailsieve_imap::{ConnectConfig, Error, Provider, ProviderPaths, SearchQuery, uid_set};

#[test]
fn test_incremental_search_after_cursor() {
    let query = SearchQuery::UidsAfter(100);
    assert_eq!(query.to_imap(), "UID 101:*");

    // Server answered with the highest existing message only.
    assert!(query.retain_matching(vec![100]).is_empty());
    assert_eq!(query.retain_matching(vec![150, 101, 120]), vec![101, 120, 150]);
}

#[test]
fn test_first_sync_uses_since() {
    let date = NaiveDate::from_ymd_opt(2026, 9, 17).unwrap_or_default();
    assert_eq!(SearchQuery::Since(date).to_imap(), "SINCE 17-Sep-2026");
    assert_eq!(SearchQuery::All.to_imap(), "ALL");
}

#[test]
fn test_uid_set_for_batch() {
    let batch: Vec<u32> = (101..=150).collect();
    assert_eq!(uid_set(&batch), "101:150");
}

#[test]
fn test_provider_table_resolution() {
    assert_eq!(ProviderPaths::for_host("imap.gmail.com").provider, Provider::Gmail);
    assert_eq!(ProviderPaths::for_host("imap.mail.yahoo.com").provider, Provider::Yahoo);
    assert_eq!(ProviderPaths::for_host("imap.fastmail.com").provider, Provider::Fastmail);
    assert_eq!(ProviderPaths::for_host("localhost").provider, Provider::Generic);
}

#[test]
fn test_connect_config_redacts_password() {
    let config = ConnectConfig::new("imap.example.com", "me", "hunter2");
    let debug = format!("{config:?}");
    assert!(!debug.contains("hunter2"));
    assert_eq!(config.port, 993);
}

#[test]
fn test_connection_failures_are_classified() {
    assert!(Error::Auth("bad password".into()).is_connection_failure());
    assert!(Error::Closed.is_connection_failure());
    assert!(!Error::MailboxNotFound("Receipts".into()).is_connection_failure());
    assert!(!Error::Protocol("unexpected".into()).is_connection_failure());
}
