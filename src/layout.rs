//! On-disk layout of a run
//!
//! One directory per run, one subdirectory per folder, one `.eml`
//! file per message:
//!
//! ```text
//! <output>/<user>_<domain>_<start>_<end>/
//!   <folder-segment>/
//!     email_<folder-segment>_<uid>.eml
//! ```
//!
//! The layout is a pure function of the sanitized folder name and the
//! UID, so re-running against the same UIDs overwrites the same paths.

use crate::config::{Credentials, DateWindow};
use crate::error::Result;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Replace every character outside `[A-Za-z0-9._-]` with `_`.
#[must_use]
pub fn sanitize_segment(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Strip a leading `INBOX.` or `INBOX/` from a non-INBOX folder name.
///
/// Servers that root the whole hierarchy under INBOX produce names
/// like `INBOX.Sent`; the prefix carries no information on disk.
#[must_use]
pub fn strip_inbox_prefix(name: &str) -> &str {
    if name.eq_ignore_ascii_case("INBOX") {
        return name;
    }
    let stripped = name
        .get(..5)
        .filter(|prefix| prefix.eq_ignore_ascii_case("INBOX"))
        .and_then(|_| name.get(5..))
        .and_then(|rest| rest.strip_prefix('.').or_else(|| rest.strip_prefix('/')));
    stripped.filter(|rest| !rest.is_empty()).unwrap_or(name)
}

/// Deterministic mapping from server folder names to disk segments.
///
/// Prefix stripping and sanitation can collapse two distinct folders
/// onto the same segment (`INBOX/Sent` vs `Sent`, `A/B` vs `A_B`).
/// The map is built once from the enumerated folder set, in server
/// order; a later folder that would collide first falls back to its
/// full sanitized name, then to a numbered suffix.
#[derive(Debug, Default)]
pub struct FolderLayout {
    segments: HashMap<String, String>,
}

impl FolderLayout {
    #[must_use]
    pub fn new<I, S>(folders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut segments = HashMap::new();
        let mut used: HashSet<String> = HashSet::new();

        for folder in folders {
            let folder = folder.as_ref();
            if segments.contains_key(folder) {
                continue;
            }

            let mut segment = sanitize_segment(strip_inbox_prefix(folder));
            if used.contains(&segment) {
                segment = sanitize_segment(folder);
            }
            if used.contains(&segment) {
                let base = segment.clone();
                let mut n = 2u32;
                while used.contains(&segment) {
                    segment = format!("{base}_{n}");
                    n += 1;
                }
            }

            used.insert(segment.clone());
            segments.insert(folder.to_string(), segment);
        }

        Self { segments }
    }

    /// The disk segment for a folder. Falls back to plain sanitation
    /// for folders that were not part of the enumerated set.
    #[must_use]
    pub fn segment(&self, folder: &str) -> String {
        self.segments.get(folder).cloned().unwrap_or_else(|| {
            sanitize_segment(strip_inbox_prefix(folder))
        })
    }
}

/// Directory name for one run: `<user>_<domain>_<start>_<end>`,
/// where a missing lower bound renders as `Start` and a missing
/// upper bound as today's date.
#[must_use]
pub fn run_dir_name(credentials: &Credentials, window: &DateWindow, today: NaiveDate) -> String {
    let user = sanitize_segment(credentials.local_part());
    let domain = sanitize_segment(credentials.domain());
    let start = window
        .since
        .map_or_else(|| "Start".to_string(), |d| d.format("%Y%m%d").to_string());
    let end = window
        .before
        .unwrap_or(today)
        .format("%Y%m%d")
        .to_string();
    format!("{user}_{domain}_{start}_{end}")
}

/// Path of the `.eml` file for a `(segment, uid)` pair.
#[must_use]
pub fn eml_path(run_dir: &Path, segment: &str, uid: u32) -> PathBuf {
    run_dir
        .join(segment)
        .join(format!("email_{segment}_{uid}.eml"))
}

/// Write raw message octets, atomically.
///
/// The bytes land in a temporary sibling first and are renamed into
/// place, so readers never observe a half-written message.
pub async fn write_eml(run_dir: &Path, segment: &str, uid: u32, body: &[u8]) -> Result<PathBuf> {
    let dir = run_dir.join(segment);
    tokio::fs::create_dir_all(&dir).await?;

    let path = eml_path(run_dir, segment, uid);
    let tmp = dir.join(format!("email_{segment}_{uid}.eml.tmp"));
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, &path).await?;
    Ok(path)
}
