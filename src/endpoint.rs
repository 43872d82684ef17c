//! IMAP endpoint discovery
//!
//! Given nothing but an email address, produce an ordered list of
//! candidate hosts and pin the first one that actually authenticates:
//!
//! 1. a built-in table of well-known providers,
//! 2. `imap.<domain>`,
//! 3. `mail.<domain>`,
//! 4. the Thunderbird autoconfig service.
//!
//! Every failed candidate is recorded as a `(host, error)` pair for
//! the run summary, so "why did discovery pick this server" is always
//! answerable after the fact.

use crate::config::Credentials;
use crate::error::{Error, Result};
use crate::session::{ArchiveSession, SOCKET_TIMEOUT};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// A concrete IMAP server candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub ssl: bool,
}

/// One failed connection attempt, kept for the run summary.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionAttempt {
    pub host: String,
    pub error: String,
}

/// Result of a successful discovery: the pinned endpoint, the
/// already-authenticated bootstrap session, and the failures that
/// preceded it.
#[derive(Debug)]
pub struct Discovery {
    pub endpoint: Endpoint,
    pub session: ArchiveSession,
    pub attempts: Vec<ConnectionAttempt>,
}

/// Well-known domains whose IMAP host is not derivable from the
/// domain itself.
const KNOWN_PROVIDERS: &[(&str, &str)] = &[
    ("gmail.com", "imap.gmail.com"),
    ("googlemail.com", "imap.gmail.com"),
    ("outlook.com", "outlook.office365.com"),
    ("hotmail.com", "outlook.office365.com"),
    ("live.com", "outlook.office365.com"),
    ("yahoo.com", "imap.mail.yahoo.com"),
    ("icloud.com", "imap.mail.me.com"),
    ("me.com", "imap.mail.me.com"),
    ("mac.com", "imap.mail.me.com"),
    ("uol.com.br", "imap.uol.com.br"),
    ("bol.com.br", "imap.bol.com.br"),
    ("terra.com.br", "imap.terra.com.br"),
];

const AUTOCONFIG_BASE: &str = "https://autoconfig.thunderbird.net/v1.1";

/// Ordered candidate generator for one account domain.
#[derive(Debug, Clone)]
pub struct Discoverer {
    candidates: Vec<String>,
    autoconfig_base: Option<String>,
}

impl Discoverer {
    /// Standard candidate order for an address: provider table,
    /// `imap.` and `mail.` prefixes, then autoconfig as a last
    /// resort.
    #[must_use]
    pub fn for_address(credentials: &Credentials) -> Self {
        let domain = credentials.domain();
        let mut candidates = Vec::new();

        if let Some((_, host)) = KNOWN_PROVIDERS.iter().find(|(d, _)| *d == domain) {
            candidates.push((*host).to_string());
        }
        candidates.push(format!("imap.{domain}"));
        candidates.push(format!("mail.{domain}"));

        Self {
            candidates,
            autoconfig_base: Some(AUTOCONFIG_BASE.to_string()),
        }
    }

    /// Explicit candidate list (server override, tests). Autoconfig
    /// is disabled unless re-enabled with [`Self::autoconfig_base`].
    #[must_use]
    pub fn with_candidates<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            candidates: hosts.into_iter().map(Into::into).collect(),
            autoconfig_base: None,
        }
    }

    /// Override (or enable) the autoconfig service base URL.
    #[must_use]
    pub fn autoconfig_base(mut self, base: impl Into<String>) -> Self {
        self.autoconfig_base = Some(base.into());
        self
    }

    #[must_use]
    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// Try every candidate in order; pin the first that
    /// authenticates.
    ///
    /// # Errors
    ///
    /// [`Error::Auth`] when every candidate failed but at least one
    /// reached LOGIN (the server exists, the secret is wrong),
    /// [`Error::Discovery`] otherwise. Both carry the attempt list.
    pub async fn discover(
        &self,
        credentials: &Credentials,
        port: u16,
        ssl: bool,
    ) -> Result<Discovery> {
        let mut attempts = Vec::new();
        let mut auth_rejection: Option<String> = None;

        let mut hosts = self.candidates.clone();
        if let Some(base) = &self.autoconfig_base {
            if let Some(host) = lookup_autoconfig(base, credentials.domain()).await {
                if !hosts.contains(&host) {
                    hosts.push(host);
                }
            }
        }

        for host in hosts {
            let endpoint = Endpoint {
                host: host.clone(),
                port,
                ssl,
            };
            info!(%host, port, ssl, "trying IMAP endpoint");
            match ArchiveSession::connect(&endpoint, credentials).await {
                Ok(session) => {
                    info!(%host, "endpoint pinned");
                    return Ok(Discovery {
                        endpoint,
                        session,
                        attempts,
                    });
                }
                Err(e) => {
                    if let Error::Auth { message, .. } = &e {
                        auth_rejection = Some(message.clone());
                    }
                    warn!(%host, error = %e, "candidate failed");
                    attempts.push(ConnectionAttempt {
                        host,
                        error: e.to_string(),
                    });
                }
            }
        }

        match auth_rejection {
            Some(message) => Err(Error::Auth { message, attempts }),
            None => Err(Error::Discovery { attempts }),
        }
    }
}

/// Ask the Thunderbird autoconfig service for the domain's IMAP
/// host. All failures (timeout, non-200, parse) are silently skipped;
/// autoconfig is strictly best-effort.
async fn lookup_autoconfig(base: &str, domain: &str) -> Option<String> {
    let url = format!("{base}/{domain}");
    debug!(%url, "querying autoconfig");

    let client = reqwest::Client::builder()
        .timeout(SOCKET_TIMEOUT)
        .build()
        .ok()?;
    let response = client.get(&url).send().await.ok()?;
    if !response.status().is_success() {
        debug!(status = %response.status(), "autoconfig lookup skipped");
        return None;
    }
    let body = response.text().await.ok()?;
    let host = parse_autoconfig(&body);
    if host.is_none() {
        debug!(%domain, "autoconfig response had no IMAP server");
    }
    host
}

/// Extract the first `incomingServer type="imap"` hostname from a
/// Thunderbird `clientConfig` document.
fn parse_autoconfig(xml: &str) -> Option<String> {
    #[derive(Debug, Deserialize)]
    struct ClientConfig {
        #[serde(rename = "emailProvider")]
        email_provider: EmailProvider,
    }

    #[derive(Debug, Deserialize)]
    struct EmailProvider {
        #[serde(rename = "incomingServer", default)]
        incoming_servers: Vec<IncomingServer>,
    }

    #[derive(Debug, Deserialize)]
    struct IncomingServer {
        #[serde(rename = "@type")]
        server_type: String,
        hostname: Option<String>,
    }

    let config: ClientConfig = quick_xml::de::from_str(xml).ok()?;
    config
        .email_provider
        .incoming_servers
        .into_iter()
        .find(|s| s.server_type.eq_ignore_ascii_case("imap"))
        .and_then(|s| s.hostname)
        .filter(|h| !h.is_empty())
}
