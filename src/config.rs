//! Run configuration and account credentials

use crate::error::{Error, Result};
use chrono::NaiveDate;
use std::path::PathBuf;

/// The account being archived.
///
/// Constructed once per run and shared immutably by the scanner and
/// every download worker.
#[derive(Debug, Clone)]
pub struct Credentials {
    address: String,
    secret: String,
    domain: String,
}

impl Credentials {
    /// Build credentials from an email address and secret.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the address has no domain part.
    pub fn new(address: impl Into<String>, secret: impl Into<String>) -> Result<Self> {
        let address = address.into();
        let domain = address
            .split_once('@')
            .map(|(_, d)| d.to_lowercase())
            .filter(|d| !d.is_empty())
            .ok_or_else(|| Error::Config(format!("invalid email address: {address}")))?;
        Ok(Self {
            address,
            secret: secret.into(),
            domain,
        })
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// The domain part of the address, lowercased.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The local part of the address (everything before the `@`).
    #[must_use]
    pub fn local_part(&self) -> &str {
        self.address.split('@').next().unwrap_or(&self.address)
    }
}

/// Date window applied to every folder search.
///
/// IMAP semantics: `SINCE` is inclusive, `BEFORE` exclusive, so the
/// window covers `[since, before)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateWindow {
    pub since: Option<NaiveDate>,
    pub before: Option<NaiveDate>,
}

/// Engine configuration, independent of the CLI that produced it.
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    /// Root directory; the run directory is created beneath it.
    pub output_dir: PathBuf,
    /// Download worker count.
    pub workers: usize,
    /// Automatic retry rounds over the failed task list.
    pub max_retries: u32,
    pub window: DateWindow,
    /// Explicit server, bypassing discovery.
    pub server: Option<String>,
    pub port: u16,
    pub ssl: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("downloaded_emails"),
            workers: 10,
            max_retries: 1,
            window: DateWindow::default(),
            server: None,
            port: 993,
            ssl: true,
        }
    }
}
