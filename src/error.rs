//! Error types for mailsync

use thiserror::Error;

/// Engine-wide error taxonomy.
///
/// The variants map to distinct failure scopes: `Connection` is fatal
/// to the attempted connection (the next acquire reconnects),
/// `FolderOpen` is scoped to one folder, `Parse` to one message, and
/// `Storage` to one persistence call. The sync orchestrator decides
/// which of these escalate to a failed session.
#[derive(Error, Debug)]
pub enum Error {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("failed to open folder {folder}: {reason}")]
    FolderOpen { folder: String, reason: String },

    #[error("message parsing error: {0}")]
    Parse(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
