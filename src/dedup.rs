//! Cross-folder message deduplication
//!
//! Messages that appear in more than one folder (Sent + a label,
//! Trash copies) share their `Message-ID` header. The index is a
//! run-scoped set of every ID observed so far; the first worker to
//! insert an ID wins and downloads the body, everyone else skips.
//!
//! Keys are the raw header value with angle brackets preserved and no
//! case normalization: RFC 5322 treats the local part of the ID as
//! case-sensitive.

use std::collections::HashSet;
use std::sync::Mutex;

/// Concurrent set of observed `Message-ID` values.
#[derive(Debug, Default)]
pub struct DedupIndex {
    seen: Mutex<HashSet<String>>,
}

impl DedupIndex {
    /// Test-and-insert. Returns `true` if the ID was newly inserted
    /// (the caller owns the download), `false` if it was already
    /// present (duplicate).
    pub fn insert(&self, message_id: &str) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(message_id.to_string())
    }

    /// Roll back a registration after a failed download so a retry of
    /// the same task is not misclassified as a duplicate.
    pub fn remove(&self, message_id: &str) {
        self.seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(message_id);
    }

    /// Number of distinct IDs observed.
    pub fn len(&self) -> usize {
        self.seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
