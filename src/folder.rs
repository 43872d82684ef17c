//! Folder enumeration model and the archive exclusion filter
//!
//! Folders arrive from the server as display names plus LIST
//! attributes. The filter drops folders whose contents would either
//! duplicate other folders (all-mail style virtual views) or are not
//! worth archiving (spam). Trash is kept.

/// One entry from the server's LIST response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderInfo {
    /// Display name exactly as the server returned it.
    pub name: String,
    /// Hierarchy delimiter, when advertised.
    pub delimiter: Option<String>,
    /// Raw LIST attributes, e.g. `\HasNoChildren`, `\All`.
    pub attributes: Vec<String>,
}

impl FolderInfo {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delimiter: None,
            attributes: Vec::new(),
        }
    }

    fn has_attribute(&self, attr: &str) -> bool {
        self.attributes.iter().any(|a| a.eq_ignore_ascii_case(attr))
    }
}

/// Whether a folder should be scanned and downloaded.
///
/// Special-use attributes win when the server advertises them:
/// `\All` and `\Junk` folders are excluded, as are unselectable
/// nodes. Name matching covers servers without special-use support:
/// spam/junk/bulk names are excluded unless they also look like
/// trash, and the known all-mail aliases are excluded to avoid
/// re-downloading every message a second time.
#[must_use]
pub fn is_archivable(info: &FolderInfo) -> bool {
    if info.has_attribute("\\Noselect")
        || info.has_attribute("\\NonExistent")
        || info.has_attribute("\\All")
        || info.has_attribute("\\Junk")
    {
        return false;
    }

    let lower = info.name.to_lowercase();
    if (lower.contains("spam") || lower.contains("junk") || lower.contains("bulk"))
        && !lower.contains("trash")
    {
        return false;
    }

    // Virtual all-mail views ([Gmail]/All Mail and its pt-BR alias).
    if lower.contains("all mail") || lower.contains("todos os e-mails") {
        return false;
    }

    true
}
