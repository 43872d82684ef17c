//! Authenticated IMAP session
//!
//! A thin read-only wrapper around `async-imap` with a fixed, narrow
//! contract: list folders, read-only select, date-windowed UID
//! search, `Message-ID` header fetch, and raw RFC 822 body fetch.
//! Every server round-trip is bounded by [`SOCKET_TIMEOUT`] so a
//! wedged connection can never stall its owning worker for long.
//!
//! A session is exclusively owned by one worker (or the scanner) and
//! is never shared; there is no internal locking.

use crate::config::Credentials;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use async_imap::types::{Fetch, Name, NameAttribute};
use async_imap::{Client, Session};
use chrono::NaiveDate;
use futures::TryStreamExt;
use regex::Regex;
use rustls::pki_types::ServerName;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::folder::{FolderInfo, is_archivable};

/// Global bound on connection attempts and command round-trips.
pub const SOCKET_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport the session runs over; TLS and plain TCP share one
/// session type behind this object-safe alias.
pub trait ConnStream: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug> ConnStream for T {}

type BoxedStream = Box<dyn ConnStream>;

/// One authenticated, optionally folder-selected IMAP connection.
#[derive(Debug)]
pub struct ArchiveSession {
    inner: Session<BoxedStream>,
}

impl ArchiveSession {
    /// Connect, read the greeting, and LOGIN.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] when any phase exceeds the socket
    /// timeout, [`Error::Auth`] when the server rejects LOGIN, and
    /// transport errors otherwise. No usable session state is left
    /// behind on failure.
    pub async fn connect(endpoint: &Endpoint, credentials: &Credentials) -> Result<Self> {
        let stream = open_stream(endpoint).await?;
        let mut client = Client::new(stream);

        let greeting = timeout(SOCKET_TIMEOUT, client.read_response())
            .await
            .map_err(|_| Error::Timeout("IMAP greeting".to_string()))
            .and_then(|r| r.map_err(|e| Error::Imap(format!("greeting failed: {e}"))))?;
        if greeting.is_none() {
            return Err(Error::Imap(
                "server closed the connection before greeting".to_string(),
            ));
        }

        let session = timeout(
            SOCKET_TIMEOUT,
            client.login(credentials.address(), credentials.secret()),
        )
        .await
        .map_err(|_| Error::Timeout("LOGIN".to_string()))
        .and_then(|r| {
            r.map_err(|(e, _)| Error::Auth {
                message: e.to_string(),
                attempts: Vec::new(),
            })
        })?;

        debug!(host = %endpoint.host, port = endpoint.port, "IMAP session authenticated");
        Ok(Self { inner: session })
    }

    /// List folders the archive should cover, in server order.
    ///
    /// The exclusion filter from [`crate::folder`] is already
    /// applied: spam/junk/bulk, all-mail views, and unselectable
    /// nodes never reach the caller.
    pub async fn list_folders(&mut self) -> Result<Vec<FolderInfo>> {
        let stream = timeout(SOCKET_TIMEOUT, self.inner.list(Some(""), Some("*")))
            .await
            .map_err(|_| Error::Timeout("LIST".to_string()))
            .and_then(|r| r.map_err(|e| Error::Imap(format!("LIST failed: {e}"))))?;

        let names: Vec<Name> = timeout(SOCKET_TIMEOUT, stream.try_collect())
            .await
            .map_err(|_| Error::Timeout("LIST stream".to_string()))
            .and_then(|r| r.map_err(|e| Error::Imap(format!("LIST stream failed: {e}"))))?;

        Ok(names
            .iter()
            .map(folder_info)
            .filter(is_archivable)
            .collect())
    }

    /// Read-only EXAMINE. Quoting of names with spaces or
    /// backslashes is handled by the IMAP library.
    pub async fn select(&mut self, folder: &str) -> Result<()> {
        timeout(SOCKET_TIMEOUT, self.inner.examine(folder))
            .await
            .map_err(|_| Error::Timeout(format!("EXAMINE {folder}")))
            .and_then(|r| r.map_err(|e| Error::Imap(format!("failed to select {folder}: {e}"))))?;
        Ok(())
    }

    /// `UID SEARCH` over the selected folder with an optional date
    /// window: `SINCE` is inclusive, `BEFORE` exclusive.
    pub async fn search_uids(
        &mut self,
        since: Option<NaiveDate>,
        before: Option<NaiveDate>,
    ) -> Result<Vec<u32>> {
        let criteria = search_criteria(since, before);
        let uids = timeout(SOCKET_TIMEOUT, self.inner.uid_search(&criteria))
            .await
            .map_err(|_| Error::Timeout("UID SEARCH".to_string()))
            .and_then(|r| r.map_err(|e| Error::Imap(format!("UID SEARCH failed: {e}"))))?;

        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    /// Fetch the `Message-ID` header of one message, peeking so the
    /// `\Seen` flag is not mutated. Angle brackets are preserved.
    pub async fn fetch_message_id(&mut self, uid: u32) -> Result<Option<String>> {
        let Some(fetch) = self
            .fetch_one(uid, "(BODY.PEEK[HEADER.FIELDS (MESSAGE-ID)])")
            .await?
        else {
            return Ok(None);
        };
        Ok(fetch
            .header()
            .or_else(|| fetch.body())
            .and_then(extract_message_id))
    }

    /// Fetch the raw RFC 822 octets of one message.
    pub async fn fetch_body(&mut self, uid: u32) -> Result<Option<Vec<u8>>> {
        let Some(fetch) = self.fetch_one(uid, "(RFC822)").await? else {
            return Ok(None);
        };
        Ok(fetch.body().map(<[u8]>::to_vec))
    }

    /// Liveness probe.
    pub async fn noop(&mut self) -> Result<()> {
        timeout(SOCKET_TIMEOUT, self.inner.noop())
            .await
            .map_err(|_| Error::Timeout("NOOP".to_string()))
            .and_then(|r| r.map_err(|e| Error::Imap(format!("NOOP failed: {e}"))))
    }

    /// Best-effort CLOSE + LOGOUT; all errors swallowed.
    pub async fn close(mut self) {
        let _ = timeout(SOCKET_TIMEOUT, self.inner.close()).await;
        let _ = timeout(SOCKET_TIMEOUT, self.inner.logout()).await;
    }

    async fn fetch_one(&mut self, uid: u32, query: &str) -> Result<Option<Fetch>> {
        let stream = timeout(SOCKET_TIMEOUT, self.inner.uid_fetch(uid.to_string(), query))
            .await
            .map_err(|_| Error::Timeout("UID FETCH".to_string()))
            .and_then(|r| r.map_err(|e| Error::Imap(format!("UID FETCH failed: {e}"))))?;

        let fetches: Vec<Fetch> = timeout(SOCKET_TIMEOUT, stream.try_collect())
            .await
            .map_err(|_| Error::Timeout("UID FETCH stream".to_string()))
            .and_then(|r| r.map_err(|e| Error::Imap(format!("UID FETCH stream failed: {e}"))))?;

        Ok(fetches.into_iter().next())
    }
}

/// Open the TCP (and, unless disabled, TLS) transport.
async fn open_stream(endpoint: &Endpoint) -> Result<BoxedStream> {
    let tcp = timeout(
        SOCKET_TIMEOUT,
        TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
    )
    .await
    .map_err(|_| Error::Timeout(format!("connect to {}:{}", endpoint.host, endpoint.port)))?
    .map_err(Error::Io)?;

    if !endpoint.ssl {
        return Ok(Box::new(tcp));
    }

    // Multiple callers may race to install the provider; losing the
    // race is fine.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));

    let server_name = ServerName::try_from(endpoint.host.clone())
        .map_err(|e| Error::Tls(format!("invalid server name: {e}")))?;

    let tls = timeout(SOCKET_TIMEOUT, connector.connect(server_name, tcp))
        .await
        .map_err(|_| Error::Timeout("TLS handshake".to_string()))?
        .map_err(|e| Error::Tls(e.to_string()))?;

    Ok(Box::new(tls))
}

fn folder_info(name: &Name) -> FolderInfo {
    FolderInfo {
        name: name.name().to_string(),
        delimiter: name.delimiter().map(ToString::to_string),
        attributes: name.attributes().iter().map(attribute_label).collect(),
    }
}

fn attribute_label(attr: &NameAttribute<'_>) -> String {
    match attr {
        NameAttribute::NoInferiors => "\\Noinferiors".to_string(),
        NameAttribute::NoSelect => "\\Noselect".to_string(),
        NameAttribute::Marked => "\\Marked".to_string(),
        NameAttribute::Unmarked => "\\Unmarked".to_string(),
        NameAttribute::Extension(s) => s.as_ref().to_string(),
        _ => "\\Unknown".to_string(),
    }
}

/// IMAP search criteria for the date window, `ALL` when unbounded.
fn search_criteria(since: Option<NaiveDate>, before: Option<NaiveDate>) -> String {
    let mut parts = Vec::new();
    if let Some(date) = since {
        parts.push(format!("SINCE \"{}\"", imap_date(date)));
    }
    if let Some(date) = before {
        parts.push(format!("BEFORE \"{}\"", imap_date(date)));
    }
    if parts.is_empty() {
        "ALL".to_string()
    } else {
        parts.join(" ")
    }
}

/// `DD-Mon-YYYY` with English month abbreviations, as the IMAP
/// grammar requires regardless of locale.
fn imap_date(date: NaiveDate) -> String {
    date.format("%d-%b-%Y").to_string()
}

fn message_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)Message-ID:\s*(<[^>]+>|[^\r\n]+)").expect("valid message-id pattern")
    })
}

/// Pull the `Message-ID` value out of raw header bytes, trimmed,
/// angle brackets preserved.
fn extract_message_id(header: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(header);
    message_id_re()
        .captures(&text)
        .map(|caps| caps[1].trim().to_string())
        .filter(|id| !id.is_empty())
}
