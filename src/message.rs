//! Canonical message record
//!
//! The normalized shape every fetched message is reduced to before it
//! reaches storage. Messages are keyed by [`Message::message_id`];
//! re-syncing an unchanged mailbox upserts the same keys and must not
//! create duplicates.

use crate::flag::MessageFlags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single mail address, optionally with a display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub name: Option<String>,
    pub address: String,
}

impl Address {
    #[must_use]
    pub fn new(name: Option<String>, address: impl Into<String>) -> Self {
        Self {
            name,
            address: address.into(),
        }
    }

    /// Sentinel for malformed or missing address data. Normalization
    /// degrades to this instead of failing the message.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            name: None,
            address: "unknown@unknown.invalid".to_string(),
        }
    }
}

/// Metadata about one attachment. Attachment bodies are not stored by
/// the engine, only described.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMeta {
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub content_id: Option<String>,
    pub disposition: String,
}

/// The canonical, storage-ready message record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Dedup key: the Message-ID header without angle brackets, or a
    /// synthesized id when the server provided none.
    pub message_id: String,
    pub subject: Option<String>,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    pub from: Address,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub bcc: Vec<Address>,
    /// Date header; absent when the message carried none.
    pub sent_at: Option<DateTime<Utc>>,
    /// Server-side arrival time, falling back to the sent date.
    pub received_at: DateTime<Utc>,
    /// The IMAP folder this message was observed in. Mutable: a later
    /// sync may find the same message in a different folder.
    pub folder_label: String,
    pub flags: MessageFlags,
    /// Best-effort conversation key; see the normalizer for the
    /// derivation order.
    pub thread_key: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub attachments: Vec<AttachmentMeta>,
    pub size_bytes: u64,
}
