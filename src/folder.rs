//! Discovered IMAP folders
//!
//! A [`FolderDescriptor`] is the engine's view of one LIST response
//! line. Descriptors are produced fresh on every discovery call and
//! never cached across sessions -- servers may rename or add folders
//! at any time.

use serde::{Deserialize, Serialize};

/// One folder as reported by the server's LIST command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderDescriptor {
    /// Full folder name, including any hierarchy prefix
    /// (e.g. `"INBOX.receipts"` or `"[Gmail]/Sent Mail"`).
    pub name: String,
    /// Hierarchy delimiter reported by the server (`"/"` or `"."`).
    pub delimiter: String,
    /// Raw LIST attributes (e.g. `\HasNoChildren`, RFC 6154
    /// special-use flags like `\Junk`).
    pub raw_flags: Vec<String>,
}

impl FolderDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>, delimiter: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delimiter: delimiter.into(),
            raw_flags: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_flags(mut self, flags: Vec<String>) -> Self {
        self.raw_flags = flags;
        self
    }
}
