//! Multi-folder IMAP mailbox synchronization engine
//!
//! Connects to an IMAP server, discovers and classifies folders,
//! and pulls messages into a pluggable [`MessageStore`] exactly once,
//! with live per-session progress and partial-failure tolerance.
//!
//! The pieces, bottom up:
//!
//! - [`classifier`] -- pure folder-name classification and sync-set
//!   selection
//! - [`normalizer`] -- raw protocol data to the canonical [`Message`]
//! - [`connection`] -- TLS/STARTTLS/plain connects and the per-account
//!   [`ConnectionManager`] pool
//! - [`progress`] -- the [`ProgressTracker`] session state machine
//! - [`storage`] -- the consumed [`MessageStore`] / [`FieldCipher`]
//!   collaborator traits
//! - [`sync`] -- the [`SyncEngine`] orchestrating all of the above

pub mod classifier;
mod config;
pub mod connection;
mod error;
mod flag;
mod folder;
mod message;
pub mod normalizer;
pub mod progress;
pub mod storage;
pub mod sync;

pub use config::{Account, ImapConfig, Security};
pub use connection::ConnectionManager;
pub use error::{Error, Result};
pub use flag::{Flag, MessageFlags};
pub use folder::FolderDescriptor;
pub use message::{Address, AttachmentMeta, Message};
pub use progress::{ProgressTracker, SessionStatus, SyncSession};
pub use storage::{FieldCipher, MemoryStore, MessageStore, PlaintextCipher};
pub use sync::{
    ConnectionCheck, MultiFolderResult, StartedSync, SyncEngine, SyncOptions, SyncStrategy,
};
