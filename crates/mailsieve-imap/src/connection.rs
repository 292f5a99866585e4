//! TLS connections and the `async-imap` backed session.

use std::sync::Arc;

use async_imap::types::{Fetch, Flag};
use async_trait::async_trait;
use futures::TryStreamExt;
use imap_proto::types::{Address, BodyStructure};
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tracing::{debug, info};

use crate::message::{FetchedMessage, MailboxInfo, MessageFlags, WireAddress};
use crate::search::{SearchQuery, uid_set};
use crate::session::{ConnectConfig, MailSession, SessionConnector};
use crate::{Error, Result};

/// Items requested for every message during an incremental sync.
const ENVELOPE_QUERY: &str = "(UID FLAGS ENVELOPE RFC822.SIZE BODYSTRUCTURE)";

/// TLS stream type used by [`TlsSession`].
pub type ImapStream = TlsStream<TcpStream>;

/// Creates a TLS connector with default root certificates.
#[must_use]
pub fn create_tls_connector() -> tokio_rustls::TlsConnector {
    let root_store = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    tokio_rustls::TlsConnector::from(Arc::new(config))
}

/// Connects to a server with TLS from the start.
///
/// # Errors
///
/// Returns an error if the TCP connect or TLS handshake fails.
pub async fn connect_tls(host: &str, port: u16) -> Result<ImapStream> {
    let addr = format!("{host}:{port}");
    let tcp = TcpStream::connect(&addr).await?;

    let connector = create_tls_connector();
    let server_name = ServerName::try_from(host.to_string())?;
    let tls = connector.connect(server_name, tcp).await?;

    Ok(tls)
}

/// Opens [`TlsSession`]s with LOGIN over implicit TLS.
#[derive(Debug, Clone, Copy, Default)]
pub struct TlsSessionConnector;

#[async_trait]
impl SessionConnector for TlsSessionConnector {
    async fn connect(&self, config: &ConnectConfig) -> Result<Box<dyn MailSession>> {
        info!("Connecting to {}:{}", config.host, config.port);
        let session = tokio::time::timeout(config.connect_timeout, TlsSession::login(config))
            .await
            .map_err(|_| Error::Timeout(config.connect_timeout))??;
        Ok(Box::new(session))
    }
}

/// An authenticated session over TLS.
pub struct TlsSession {
    session: async_imap::Session<ImapStream>,
}

impl TlsSession {
    /// Connects, performs the TLS handshake and logs in.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or LOGIN fails.
    pub async fn login(config: &ConnectConfig) -> Result<Self> {
        let stream = connect_tls(&config.host, config.port).await?;
        debug!("TLS connection established");

        let client = async_imap::Client::new(stream);
        let session = client
            .login(&config.username, &config.password)
            .await
            .map_err(|(e, _)| Error::Auth(e.to_string()))?;

        info!("LOGIN successful for {}", config.username);
        Ok(Self { session })
    }
}

#[async_trait]
impl MailSession for TlsSession {
    async fn select(&mut self, mailbox: &str) -> Result<MailboxInfo> {
        let selected = self.session.select(mailbox).await.map_err(|e| match e {
            async_imap::error::Error::No(msg) => Error::MailboxNotFound(format!("{mailbox}: {msg}")),
            other => other.into(),
        })?;

        let uid_validity = selected
            .uid_validity
            .ok_or_else(|| Error::Protocol(format!("{mailbox}: server sent no UIDVALIDITY")))?;

        Ok(MailboxInfo {
            uid_validity,
            uid_next: selected.uid_next,
            exists: selected.exists,
        })
    }

    async fn uid_search(&mut self, query: &SearchQuery) -> Result<Vec<u32>> {
        let uids = self.session.uid_search(query.to_imap()).await?;
        Ok(query.retain_matching(uids.into_iter().collect()))
    }

    async fn fetch_envelopes(&mut self, uids: &[u32]) -> Result<Vec<FetchedMessage>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }

        let fetches: Vec<Fetch> = self
            .session
            .uid_fetch(uid_set(uids), ENVELOPE_QUERY)
            .await?
            .try_collect()
            .await?;

        let mut messages: Vec<FetchedMessage> = fetches.iter().filter_map(to_fetched).collect();
        messages.sort_by_key(|m| m.uid);
        debug!("Fetched {} envelopes", messages.len());
        Ok(messages)
    }

    async fn fetch_raw(&mut self, uid: u32) -> Result<Option<Vec<u8>>> {
        let fetches: Vec<Fetch> = self
            .session
            .uid_fetch(uid.to_string(), "BODY.PEEK[]")
            .await?
            .try_collect()
            .await?;

        Ok(fetches
            .iter()
            .find_map(|f| f.body().map(<[u8]>::to_vec)))
    }

    async fn uid_move(&mut self, uid: u32, destination: &str) -> Result<()> {
        self.session.uid_mv(uid.to_string(), destination).await?;
        Ok(())
    }

    async fn append(&mut self, mailbox: &str, flags: &str, content: &[u8]) -> Result<()> {
        self.session
            .append(mailbox, Some(flags), None, content)
            .await?;
        Ok(())
    }

    async fn list_mailboxes(&mut self) -> Result<Vec<String>> {
        let names: Vec<_> = self
            .session
            .list(Some(""), Some("*"))
            .await?
            .try_collect()
            .await?;
        Ok(names.iter().map(|n| n.name().to_string()).collect())
    }

    async fn create_mailbox(&mut self, mailbox: &str) -> Result<()> {
        self.session.create(mailbox).await?;
        Ok(())
    }

    async fn delete_mailbox(&mut self, mailbox: &str) -> Result<()> {
        self.session.delete(mailbox).await?;
        Ok(())
    }

    async fn logout(&mut self) -> Result<()> {
        self.session.logout().await?;
        Ok(())
    }
}

/// Maps one FETCH response to our wire type. Responses without a UID are
/// unsolicited flag updates and are skipped.
fn to_fetched(fetch: &Fetch) -> Option<FetchedMessage> {
    let uid = fetch.uid?;

    let mut flags = MessageFlags::default();
    for flag in fetch.flags() {
        match flag {
            Flag::Seen => flags.seen = true,
            Flag::Flagged => flags.flagged = true,
            _ => {}
        }
    }

    let has_attachments = matches!(
        fetch.bodystructure(),
        Some(BodyStructure::Multipart { common, .. })
            if common.ty.subtype.eq_ignore_ascii_case("mixed")
    );

    let mut message = FetchedMessage {
        uid,
        flags,
        size: fetch.size.unwrap_or(0),
        has_attachments,
        ..FetchedMessage::default()
    };

    if let Some(env) = fetch.envelope() {
        message.message_id = env.message_id.as_deref().map(lossy);
        message.subject = env.subject.as_deref().map(|s| decode_header_words(&lossy(s)));
        message.date = env.date.as_deref().map(lossy);
        message.from = env
            .from
            .as_ref()
            .and_then(|addrs| addrs.first())
            .map(to_address);
        message.to = env
            .to
            .as_ref()
            .map(|addrs| addrs.iter().map(to_address).collect())
            .unwrap_or_default();
    }

    Some(message)
}

fn to_address(addr: &Address<'_>) -> WireAddress {
    let mailbox = addr.mailbox.as_deref().map(lossy).unwrap_or_default();
    let host = addr.host.as_deref().map(lossy);
    let address = match host {
        Some(host) if !host.is_empty() => format!("{mailbox}@{host}"),
        _ => mailbox,
    };

    WireAddress {
        name: addr
            .name
            .as_deref()
            .map(|n| decode_header_words(&lossy(n)))
            .filter(|n| !n.is_empty()),
        address: address.to_lowercase(),
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Decodes RFC 2047 encoded words (`=?UTF-8?B?...?=`) in an envelope field.
fn decode_header_words(raw: &str) -> String {
    if !raw.contains("=?") {
        return raw.to_string();
    }

    let header = format!("Subject: {raw}\r\n\r\n");
    mail_parser::MessageParser::default()
        .parse_headers(header.as_bytes())
        .and_then(|m| m.subject().map(ToString::to_string))
        .unwrap_or_else(|| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_header_passes_through() {
        assert_eq!(decode_header_words("Your order shipped"), "Your order shipped");
    }

    #[test]
    fn test_encoded_word_is_decoded() {
        assert_eq!(decode_header_words("=?UTF-8?B?SGVsbG8=?="), "Hello");
    }
}
