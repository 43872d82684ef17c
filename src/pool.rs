//! Per-worker session holder
//!
//! Each download worker (and the scanner) owns exactly one
//! [`WorkerConnection`]. The connection lazily opens a session
//! against the pinned endpoint, probes it with NOOP before reuse,
//! reconnects once when the probe fails, and can be force-closed
//! after an error so the next task starts from a clean connection.
//! Keeping sessions alive across tasks is what stays inside
//! per-account simultaneous-connection quotas; a connect/login per
//! message would not.

use crate::config::Credentials;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::session::ArchiveSession;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct WorkerConnection {
    endpoint: Endpoint,
    credentials: Credentials,
    session: Option<ArchiveSession>,
    selected: Option<String>,
}

impl WorkerConnection {
    #[must_use]
    pub const fn new(endpoint: Endpoint, credentials: Credentials) -> Self {
        Self {
            endpoint,
            credentials,
            session: None,
            selected: None,
        }
    }

    /// Wrap an already-authenticated session, e.g. the bootstrap
    /// session handed to the scanner.
    #[must_use]
    pub const fn resume(
        endpoint: Endpoint,
        credentials: Credentials,
        session: ArchiveSession,
    ) -> Self {
        Self {
            endpoint,
            credentials,
            session: Some(session),
            selected: None,
        }
    }

    /// Make sure a live session is available: connect on first use,
    /// otherwise probe with NOOP and reconnect once on failure.
    pub async fn ensure_ready(&mut self) -> Result<()> {
        if let Some(session) = self.session.as_mut() {
            match session.noop().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(error = %e, "liveness probe failed, reconnecting");
                    self.invalidate();
                }
            }
        }

        let session = ArchiveSession::connect(&self.endpoint, &self.credentials).await?;
        self.session = Some(session);
        self.selected = None;
        Ok(())
    }

    /// Select a folder read-only, skipping the round-trip when it is
    /// already the current one.
    pub async fn ensure_selected(&mut self, folder: &str) -> Result<()> {
        if self.selected.as_deref() == Some(folder) {
            return Ok(());
        }
        self.session_mut()?.select(folder).await?;
        self.selected = Some(folder.to_string());
        Ok(())
    }

    /// The live session. [`Self::ensure_ready`] must have succeeded
    /// first.
    pub fn session_mut(&mut self) -> Result<&mut ArchiveSession> {
        self.session
            .as_mut()
            .ok_or_else(|| Error::Imap("no live session".to_string()))
    }

    /// Mark the session dirty after an error. The underlying
    /// connection is dropped without a LOGOUT round-trip (it may be
    /// wedged); the next task reconnects.
    pub fn invalidate(&mut self) {
        if self.session.take().is_some() {
            debug!("session invalidated");
        }
        self.selected = None;
    }

    /// Graceful teardown with LOGOUT.
    pub async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
        }
        self.selected = None;
    }
}
