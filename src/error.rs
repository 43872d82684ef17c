//! Error types for mail-archiver

use crate::endpoint::ConnectionAttempt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// No candidate endpoint accepted the credentials. Fatal to the
    /// run; the attempt list records every `(host, error)` failure.
    #[error("no working IMAP endpoint found ({} candidates failed)", attempts.len())]
    Discovery { attempts: Vec<ConnectionAttempt> },

    /// An endpoint was reachable but LOGIN was rejected. Fatal like
    /// discovery failure; the driver may prompt for a new secret and
    /// retry the bootstrap.
    #[error("authentication rejected: {message}")]
    Auth {
        message: String,
        attempts: Vec<ConnectionAttempt>,
    },

    #[error("IMAP error: {0}")]
    Imap(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
