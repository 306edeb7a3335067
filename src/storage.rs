//! Storage and encryption collaborators
//!
//! The engine delegates all persistence. [`MessageStore`] is the
//! consumed surface: find-by-key, upsert, grouped counts, and
//! delete-all. Upsert must be atomic per key; the engine relies on
//! that when concurrent folder tasks write distinct messages.
//!
//! [`MemoryStore`] is the in-process reference implementation used by
//! tests and the CLI. [`EncryptedStore`] decorates any store with
//! field-level encryption of message content, so ciphertext never
//! leaks into the engine and plaintext never reaches the backend.

use crate::error::{Error, Result};
use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Whether an upsert inserted a new row or updated an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Grouping dimension for [`MessageStore::count_grouped_by`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    FolderLabel,
    ReadState,
}

/// One row of a grouped count: the key values (in dimension order)
/// and the number of messages in the group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRow {
    pub keys: Vec<String>,
    pub count: u64,
}

/// The persistence surface consumed by the sync engine.
///
/// An upsert of an existing key must update only the mutable fields
/// (flags and folder label) -- message content is immutable once
/// stored, so a re-sync never rewrites bodies.
pub trait MessageStore: Send + Sync {
    /// Look up a message by its dedup key.
    fn find_by_key(&self, account_id: &str, message_id: &str) -> Result<Option<Message>>;

    /// Insert the message, or refresh the mutable fields of an
    /// existing row with the same key. Atomic per key.
    fn upsert(&self, account_id: &str, message: &Message) -> Result<UpsertOutcome>;

    /// Count stored messages grouped by the given dimensions.
    fn count_grouped_by(&self, account_id: &str, dimensions: &[Dimension]) -> Result<Vec<GroupRow>>;

    /// Remove every stored message for the account. Returns the
    /// number of rows removed.
    fn delete_all(&self, account_id: &str) -> Result<u64>;
}

impl<T: MessageStore + ?Sized> MessageStore for &T {
    fn find_by_key(&self, account_id: &str, message_id: &str) -> Result<Option<Message>> {
        (**self).find_by_key(account_id, message_id)
    }

    fn upsert(&self, account_id: &str, message: &Message) -> Result<UpsertOutcome> {
        (**self).upsert(account_id, message)
    }

    fn count_grouped_by(&self, account_id: &str, dimensions: &[Dimension]) -> Result<Vec<GroupRow>> {
        (**self).count_grouped_by(account_id, dimensions)
    }

    fn delete_all(&self, account_id: &str) -> Result<u64> {
        (**self).delete_all(account_id)
    }
}

impl<T: MessageStore + ?Sized> MessageStore for std::sync::Arc<T> {
    fn find_by_key(&self, account_id: &str, message_id: &str) -> Result<Option<Message>> {
        (**self).find_by_key(account_id, message_id)
    }

    fn upsert(&self, account_id: &str, message: &Message) -> Result<UpsertOutcome> {
        (**self).upsert(account_id, message)
    }

    fn count_grouped_by(&self, account_id: &str, dimensions: &[Dimension]) -> Result<Vec<GroupRow>> {
        (**self).count_grouped_by(account_id, dimensions)
    }

    fn delete_all(&self, account_id: &str) -> Result<u64> {
        (**self).delete_all(account_id)
    }
}

/// Mutex-guarded in-memory store: account id -> message id -> message.
#[derive(Default)]
pub struct MemoryStore {
    accounts: Mutex<HashMap<String, HashMap<String, Message>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total stored messages for an account (test convenience).
    #[must_use]
    pub fn len(&self, account_id: &str) -> usize {
        self.accounts
            .lock()
            .unwrap()
            .get(account_id)
            .map_or(0, HashMap::len)
    }

    #[must_use]
    pub fn is_empty(&self, account_id: &str) -> bool {
        self.len(account_id) == 0
    }
}

impl MessageStore for MemoryStore {
    fn find_by_key(&self, account_id: &str, message_id: &str) -> Result<Option<Message>> {
        let accounts = self.accounts.lock().unwrap();
        Ok(accounts
            .get(account_id)
            .and_then(|msgs| msgs.get(message_id))
            .cloned())
    }

    fn upsert(&self, account_id: &str, message: &Message) -> Result<UpsertOutcome> {
        let mut accounts = self.accounts.lock().unwrap();
        let msgs = accounts.entry(account_id.to_string()).or_default();

        match msgs.get_mut(&message.message_id) {
            Some(existing) => {
                existing.flags = message.flags;
                existing.folder_label = message.folder_label.clone();
                Ok(UpsertOutcome::Updated)
            }
            None => {
                msgs.insert(message.message_id.clone(), message.clone());
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    fn count_grouped_by(&self, account_id: &str, dimensions: &[Dimension]) -> Result<Vec<GroupRow>> {
        let accounts = self.accounts.lock().unwrap();
        let Some(msgs) = accounts.get(account_id) else {
            return Ok(Vec::new());
        };

        let mut groups: HashMap<Vec<String>, u64> = HashMap::new();
        for msg in msgs.values() {
            let keys: Vec<String> = dimensions
                .iter()
                .map(|dim| match dim {
                    Dimension::FolderLabel => msg.folder_label.clone(),
                    Dimension::ReadState => {
                        if msg.flags.read { "read" } else { "unread" }.to_string()
                    }
                })
                .collect();
            *groups.entry(keys).or_insert(0) += 1;
        }

        let mut rows: Vec<GroupRow> = groups
            .into_iter()
            .map(|(keys, count)| GroupRow { keys, count })
            .collect();
        rows.sort_by(|a, b| a.keys.cmp(&b.keys));
        Ok(rows)
    }

    fn delete_all(&self, account_id: &str) -> Result<u64> {
        let mut accounts = self.accounts.lock().unwrap();
        Ok(accounts
            .remove(account_id)
            .map_or(0, |msgs| msgs.len() as u64))
    }
}

/// The encryption collaborator: field-level encrypt/decrypt applied
/// at the persistence boundary. The engine itself only ever handles
/// plaintext.
pub trait FieldCipher: Send + Sync {
    fn encrypt_field(&self, value: &str) -> String;
    fn decrypt_field(&self, value: &str) -> String;
}

/// Identity cipher, for deployments that encrypt at a lower layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaintextCipher;

impl FieldCipher for PlaintextCipher {
    fn encrypt_field(&self, value: &str) -> String {
        value.to_string()
    }

    fn decrypt_field(&self, value: &str) -> String {
        value.to_string()
    }
}

/// Decorator applying a [`FieldCipher`] to message content (subject
/// and bodies) around an inner store.
pub struct EncryptedStore<S, C> {
    inner: S,
    cipher: C,
}

impl<S: MessageStore, C: FieldCipher> EncryptedStore<S, C> {
    pub fn new(inner: S, cipher: C) -> Self {
        Self { inner, cipher }
    }

    fn seal(&self, message: &Message) -> Message {
        let mut sealed = message.clone();
        sealed.subject = sealed.subject.map(|s| self.cipher.encrypt_field(&s));
        sealed.text_body = sealed.text_body.map(|s| self.cipher.encrypt_field(&s));
        sealed.html_body = sealed.html_body.map(|s| self.cipher.encrypt_field(&s));
        sealed
    }

    fn open(&self, message: Message) -> Message {
        let mut opened = message;
        opened.subject = opened.subject.map(|s| self.cipher.decrypt_field(&s));
        opened.text_body = opened.text_body.map(|s| self.cipher.decrypt_field(&s));
        opened.html_body = opened.html_body.map(|s| self.cipher.decrypt_field(&s));
        opened
    }
}

impl<S: MessageStore, C: FieldCipher> MessageStore for EncryptedStore<S, C> {
    fn find_by_key(&self, account_id: &str, message_id: &str) -> Result<Option<Message>> {
        Ok(self
            .inner
            .find_by_key(account_id, message_id)?
            .map(|m| self.open(m)))
    }

    fn upsert(&self, account_id: &str, message: &Message) -> Result<UpsertOutcome> {
        self.inner.upsert(account_id, &self.seal(message))
    }

    fn count_grouped_by(&self, account_id: &str, dimensions: &[Dimension]) -> Result<Vec<GroupRow>> {
        self.inner.count_grouped_by(account_id, dimensions)
    }

    fn delete_all(&self, account_id: &str) -> Result<u64> {
        self.inner.delete_all(account_id)
    }
}

impl Error {
    /// Convenience for store implementations wrapping backend errors.
    #[must_use]
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }
}
