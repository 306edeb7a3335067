//! Multi-folder sync orchestration
//!
//! The [`SyncEngine`] coordinates everything: folder discovery,
//! classification-driven folder selection, a sequential count pass
//! for progress planning, sequential or bounded-parallel per-folder
//! fetch loops, deduplicated persistence, and progress emission.
//!
//! A sync never propagates errors past its session boundary. Failures
//! are data: the session's status and error list, and the terminal
//! [`MultiFolderResult`]'s failure lists. Callers should inspect those
//! lists even on overall success -- partial failure is the steady
//! state for large, flaky mailboxes.

use crate::classifier;
use crate::config::{Account, ImapConfig};
use crate::connection::{self, ConnectionManager, ImapSession};
use crate::error::{Error, Result};
use crate::folder::FolderDescriptor;
use crate::normalizer::{self, RawMessage};
use crate::progress::{ProgressTracker, ProgressUpdate, SessionStatus, SyncSession};
use crate::storage::{MessageStore, UpsertOutcome};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Folder-level execution policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStrategy {
    /// One folder at a time on the pooled connection. Required for
    /// strict ordering and gentlest on very large mailboxes.
    #[default]
    Sequential,
    /// Up to `max_concurrency` folders in flight, each on its own
    /// connection (one IMAP connection cannot hold two folders open).
    Parallel,
}

/// Options for one sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOptions {
    /// `None` = classifier-recommended set; `Some(vec![])` = all
    /// discovered folders; otherwise the explicit list.
    pub folders: Option<Vec<String>>,
    /// Include detected spam folders in the recommended set.
    pub include_spam: bool,
    /// Fetch only the most recent `limit` messages per folder;
    /// `None` fetches everything.
    pub limit: Option<u32>,
    pub strategy: SyncStrategy,
    /// Keep going after a folder-level failure. When false, the
    /// first folder failure aborts the session into `Error`.
    pub continue_on_error: bool,
    /// Parallel-strategy worker cap, clamped to 1..=10.
    pub max_concurrency: usize,
    /// Fetch full bodies; when false only envelope data is pulled
    /// and records are header-only.
    pub fetch_body: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            folders: None,
            include_spam: false,
            limit: None,
            strategy: SyncStrategy::Sequential,
            continue_on_error: true,
            max_concurrency: 3,
            fetch_body: true,
        }
    }
}

/// Per-folder outcome counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FolderCounts {
    /// Newly persisted messages (duplicates skipped silently).
    pub synced: u64,
    /// Messages the folder reported on open.
    pub total: u64,
    /// Message-level errors recorded while streaming this folder.
    pub errors: Vec<String>,
}

/// A folder that failed entirely (open or fetch-stream failure).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderFailure {
    pub folder: String,
    pub error: String,
}

/// Terminal summary of one sync session. Immutable once produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultiFolderResult {
    pub folders_total: u32,
    pub folders_succeeded: Vec<String>,
    pub folders_failed: Vec<FolderFailure>,
    pub messages_total: u64,
    pub messages_synced: u64,
    pub per_folder: HashMap<String, FolderCounts>,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

/// Outcome of a `start_sync` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartedSync {
    pub session_id: String,
    /// True when a sync was already running for the account and its
    /// session is being reported instead of a new one.
    pub already_running: bool,
}

/// Outcome of a connection test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionCheck {
    pub success: bool,
    pub message: String,
}

#[derive(Debug)]
enum MessageOutcome {
    Persisted,
    Skipped,
}

/// The sync orchestrator. Cheap to clone; clones share the same
/// connection pool, tracker, and store.
#[derive(Clone)]
pub struct SyncEngine {
    connections: Arc<ConnectionManager>,
    tracker: Arc<ProgressTracker>,
    store: Arc<dyn MessageStore>,
}

impl SyncEngine {
    #[must_use]
    pub fn new(
        connections: Arc<ConnectionManager>,
        tracker: Arc<ProgressTracker>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            connections,
            tracker,
            store,
        }
    }

    /// The progress tracker backing this engine, for callers that
    /// subscribe to session state directly.
    #[must_use]
    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    /// Start a sync in the background and return its session id.
    ///
    /// At most one session per account is active at a time: when one
    /// exists, its id is returned with `already_running` set and no
    /// new session is forked.
    #[must_use]
    pub fn start_sync(&self, account: Account, options: SyncOptions) -> StartedSync {
        if let Some(existing) = self.tracker.active_session_for(&account.id) {
            info!(
                "sync already in progress for account {}, reporting session {}",
                account.id, existing
            );
            return StartedSync {
                session_id: existing,
                already_running: true,
            };
        }

        let session_id = Uuid::new_v4().to_string();
        self.tracker.start(&session_id, &account.id);

        let engine = self.clone();
        let id = session_id.clone();
        tokio::spawn(async move {
            // Failures are recorded on the session, never thrown to
            // whoever started the sync.
            let result = engine.run_sync(&account, &options, &id).await;
            debug!(
                "session {} finished: {}/{} messages from {} folders",
                id,
                result.messages_synced,
                result.messages_total,
                result.folders_succeeded.len()
            );
        });

        StartedSync {
            session_id,
            already_running: false,
        }
    }

    /// Snapshot of a session's progress.
    #[must_use]
    pub fn progress(&self, session_id: &str) -> Option<SyncSession> {
        self.tracker.get(session_id)
    }

    /// Request cooperative cancellation. Folder and message loops
    /// observe the flag at their next iteration; in-flight network
    /// calls complete normally.
    pub fn cancel(&self, session_id: &str) {
        self.tracker.request_cancel(session_id);
        info!("cancellation requested for session {}", session_id);
    }

    /// Open, authenticate, and close a throwaway connection.
    pub async fn test_connection(&self, config: &ImapConfig) -> ConnectionCheck {
        match connection::test_connection(config).await {
            Ok(()) => ConnectionCheck {
                success: true,
                message: "IMAP connection successful".to_string(),
            },
            Err(e) => ConnectionCheck {
                success: false,
                message: e.to_string(),
            },
        }
    }

    /// Discover folders on a live connection and return them with
    /// classification advice.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] when no connection can be
    /// established or the LIST command fails.
    pub async fn discover_folders(&self, account: &Account) -> Result<Vec<FolderDescriptor>> {
        let mut session = self
            .connections
            .acquire(&account.id, &account.config)
            .await?;
        let folders = list_folders(&mut session).await;
        match folders {
            Ok(folders) => {
                self.connections.release(&account.id, session).await;
                Ok(folders)
            }
            Err(e) => Err(e),
        }
    }

    /// Delete every stored message for the account (full re-import
    /// preparation).
    ///
    /// # Errors
    ///
    /// Propagates the store's failure.
    pub fn clear_account(&self, account_id: &str) -> Result<u64> {
        let removed = self.store.delete_all(account_id)?;
        info!("cleared {} stored messages for account {}", removed, account_id);
        Ok(removed)
    }

    /// Run a full multi-folder sync to completion, driving the given
    /// session. Used by the background task `start_sync` spawns, and
    /// callable directly when the caller wants to await the result.
    pub async fn run_sync(
        &self,
        account: &Account,
        options: &SyncOptions,
        session_id: &str,
    ) -> MultiFolderResult {
        let started = Instant::now();
        let mut result = MultiFolderResult::default();

        // 1. Connection + discovery. A failure here is fatal to the
        // whole session.
        let mut session = match self
            .connections
            .acquire(&account.id, &account.config)
            .await
        {
            Ok(s) => s,
            Err(e) => {
                error!("session {}: connection failed: {}", session_id, e);
                return self.finish_error(session_id, &mut result, started, e.to_string());
            }
        };

        let all_folders = match list_folders(&mut session).await {
            Ok(folders) => folders,
            Err(e) => {
                // The connection is suspect; drop it rather than
                // returning it to the pool.
                return self.finish_error(session_id, &mut result, started, e.to_string());
            }
        };

        // 2. Resolve the sync set: explicit list > empty-list
        // sentinel ("all") > classifier-recommended default.
        let folders_to_sync = resolve_sync_set(&all_folders, options);
        result.folders_total = folders_to_sync.len() as u32;

        info!(
            "session {}: syncing {} of {} folders: {}",
            session_id,
            folders_to_sync.len(),
            all_folders.len(),
            folders_to_sync.join(", ")
        );

        self.tracker.update(
            session_id,
            ProgressUpdate {
                status: Some(SessionStatus::Syncing),
                folders_planned: Some(result.folders_total),
                message: Some(format!(
                    "found {} folders to sync",
                    folders_to_sync.len()
                )),
                ..ProgressUpdate::default()
            },
        );

        // 3. Count pass: sequential on the one shared connection, so
        // progress percentages have a denominator.
        let mut messages_total: u64 = 0;
        for folder in &folders_to_sync {
            if self.tracker.is_cancelled(session_id) {
                break;
            }
            match count_messages(&mut session, folder).await {
                Ok(count) => messages_total += count,
                Err(e) => {
                    // Counted as zero; the fetch phase will surface a
                    // real failure for this folder.
                    warn!("session {}: count failed for {}: {}", session_id, folder, e);
                }
            }
        }
        result.messages_total = messages_total;
        self.tracker.update(
            session_id,
            ProgressUpdate {
                messages_planned: Some(messages_total),
                message: Some(format!("planned {messages_total} messages")),
                ..ProgressUpdate::default()
            },
        );

        // 4. Execute per-folder fetch according to strategy.
        let aborted = match options.strategy {
            SyncStrategy::Sequential => {
                let aborted = self
                    .sync_folders_sequential(
                        &mut session,
                        account,
                        &folders_to_sync,
                        options,
                        session_id,
                        &mut result,
                    )
                    .await;
                self.connections.release(&account.id, session).await;
                aborted
            }
            SyncStrategy::Parallel => {
                // Folder tasks each open their own connection; the
                // discovery connection goes back to the pool first.
                self.connections.release(&account.id, session).await;
                self.sync_folders_parallel(
                    account,
                    &folders_to_sync,
                    options,
                    session_id,
                    &mut result,
                )
                .await
            }
        };

        result.duration_ms = elapsed_ms(started);

        if let Some(abort_error) = aborted {
            self.tracker.fail(session_id, abort_error.clone());
            result.errors.push(abort_error);
            return result;
        }

        let message = if self.tracker.is_cancelled(session_id) {
            format!(
                "sync cancelled after {} messages from {} folders",
                result.messages_synced,
                result.folders_succeeded.len()
            )
        } else {
            format!(
                "synced {} messages from {} folders",
                result.messages_synced,
                result.folders_succeeded.len()
            )
        };
        info!("session {}: {} in {}ms", session_id, message, result.duration_ms);
        self.tracker.complete(session_id, message);
        result
    }

    /// Sequential strategy: every folder on the one shared session.
    /// Returns the abort error when `continue_on_error` is off and a
    /// folder failed.
    async fn sync_folders_sequential(
        &self,
        session: &mut ImapSession,
        account: &Account,
        folders: &[String],
        options: &SyncOptions,
        session_id: &str,
        result: &mut MultiFolderResult,
    ) -> Option<String> {
        for folder in folders {
            if self.tracker.is_cancelled(session_id) {
                break;
            }
            let outcome = self
                .sync_one_folder(session, &account.id, folder, options, session_id)
                .await;
            if let Some(abort) = self.record_folder_outcome(folder, outcome, options, session_id, result) {
                return Some(abort);
            }
        }
        None
    }

    /// Parallel strategy: a bounded worker pool, one fresh connection
    /// per in-flight folder.
    async fn sync_folders_parallel(
        &self,
        account: &Account,
        folders: &[String],
        options: &SyncOptions,
        session_id: &str,
        result: &mut MultiFolderResult,
    ) -> Option<String> {
        let cap = options.max_concurrency.clamp(1, 10);
        let semaphore = Arc::new(Semaphore::new(cap));
        let mut tasks: JoinSet<(String, Option<Result<FolderCounts>>)> = JoinSet::new();

        for folder in folders {
            let engine = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let account = account.clone();
            let options = options.clone();
            let session_id = session_id.to_string();
            let folder = folder.clone();

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    // Semaphore closed only on abort; treat as skipped.
                    return (folder, None);
                };
                if engine.tracker.is_cancelled(&session_id) {
                    return (folder, None);
                }
                let outcome = engine
                    .sync_folder_on_fresh_connection(&account, &folder, &options, &session_id)
                    .await;
                (folder, Some(outcome))
            });
        }

        let mut abort: Option<String> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, None)) => {} // skipped due to cancellation
                Ok((folder, Some(outcome))) => {
                    let folder_abort = self.record_folder_outcome(
                        &folder, outcome, options, session_id, result,
                    );
                    if abort.is_none() {
                        abort = folder_abort;
                    }
                }
                Err(join_error) => {
                    let message = format!("folder task panicked: {join_error}");
                    error!("session {}: {}", session_id, message);
                    result.errors.push(message.clone());
                    self.tracker.push_error(session_id, message);
                }
            }
        }

        abort
    }

    /// One folder on its own dedicated connection (parallel mode).
    async fn sync_folder_on_fresh_connection(
        &self,
        account: &Account,
        folder: &str,
        options: &SyncOptions,
        session_id: &str,
    ) -> Result<FolderCounts> {
        let mut session = connection::connect(&account.config).await?;
        let outcome = self
            .sync_one_folder(&mut session, &account.id, folder, options, session_id)
            .await;
        session.logout().await.ok();
        outcome
    }

    /// Fold one folder's outcome into the running result and the
    /// session counters. Returns the abort error when the session
    /// must stop.
    fn record_folder_outcome(
        &self,
        folder: &str,
        outcome: Result<FolderCounts>,
        options: &SyncOptions,
        session_id: &str,
        result: &mut MultiFolderResult,
    ) -> Option<String> {
        // Either way the folder was processed, so progress advances
        // and percentages stay monotonic.
        self.tracker.add_progress(session_id, 1, 0);

        match outcome {
            Ok(counts) => {
                debug!(
                    "session {}: folder {} done: {}/{} synced",
                    session_id, folder, counts.synced, counts.total
                );
                result.folders_succeeded.push(folder.to_string());
                result.messages_synced += counts.synced;
                result.per_folder.insert(folder.to_string(), counts);
                None
            }
            Err(e) => {
                let message = format!("failed to sync folder {folder}: {e}");
                warn!("session {}: {}", session_id, message);
                result.folders_failed.push(FolderFailure {
                    folder: folder.to_string(),
                    error: e.to_string(),
                });
                result.per_folder.insert(
                    folder.to_string(),
                    FolderCounts {
                        synced: 0,
                        total: 0,
                        errors: vec![e.to_string()],
                    },
                );
                if options.continue_on_error {
                    self.tracker.push_error(session_id, message.clone());
                    result.errors.push(message);
                    None
                } else {
                    // Stop in-flight parallel tasks at their next
                    // boundary; the caller fails the session with
                    // this error.
                    self.tracker.request_cancel(session_id);
                    Some(message)
                }
            }
        }
    }

    /// Stream one folder's messages through normalize -> dedup ->
    /// persist. Message-level failures are recorded and skipped;
    /// only open/stream failures fail the folder.
    async fn sync_one_folder(
        &self,
        session: &mut ImapSession,
        account_id: &str,
        folder: &str,
        options: &SyncOptions,
        session_id: &str,
    ) -> Result<FolderCounts> {
        self.tracker.update(
            session_id,
            ProgressUpdate {
                current_folder: Some(folder.to_string()),
                message: Some(format!("syncing folder {folder}")),
                ..ProgressUpdate::default()
            },
        );

        let mailbox = session
            .select(folder)
            .await
            .map_err(|e| Error::FolderOpen {
                folder: folder.to_string(),
                reason: e.to_string(),
            })?;

        let total = u64::from(mailbox.exists);
        let mut counts = FolderCounts {
            synced: 0,
            total,
            errors: Vec::new(),
        };

        // An empty folder is an instant success, not an error.
        if total == 0 {
            return Ok(counts);
        }

        let range = fetch_range(mailbox.exists, options.limit);
        let query = fetch_query(options.fetch_body);
        debug!("folder {}: fetching {} with {}", folder, range, query);

        {
            let mut stream =
                session
                    .fetch(&range, query)
                    .await
                    .map_err(|e| Error::FolderOpen {
                        folder: folder.to_string(),
                        reason: format!("fetch failed: {e}"),
                    })?;

            while let Some(item) = stream.next().await {
                // Cancellation takes effect at message granularity.
                if self.tracker.is_cancelled(session_id) {
                    break;
                }
                match item {
                    Ok(fetch) => {
                        let raw = RawMessage::from_fetch(&fetch);
                        match self.process_message(&raw, account_id, folder) {
                            Ok(MessageOutcome::Persisted) => counts.synced += 1,
                            Ok(MessageOutcome::Skipped) => {}
                            Err(e) => {
                                let message =
                                    format!("message seq {} in {}: {}", raw.seq, folder, e);
                                debug!("session {}: {}", session_id, message);
                                counts.errors.push(message.clone());
                                self.tracker.push_error(session_id, message);
                            }
                        }
                        self.tracker.add_progress(session_id, 0, 1);
                    }
                    Err(e) => {
                        let message = format!("fetch item error in {folder}: {e}");
                        counts.errors.push(message.clone());
                        self.tracker.push_error(session_id, message);
                    }
                }
            }
        }

        Ok(counts)
    }

    /// Normalize and persist one message. Duplicates (by message id)
    /// are skipped silently apart from a mutable-field refresh.
    fn process_message(
        &self,
        raw: &RawMessage,
        account_id: &str,
        folder: &str,
    ) -> Result<MessageOutcome> {
        let message = normalizer::normalize(raw, folder)?;

        if self
            .store
            .find_by_key(account_id, &message.message_id)?
            .is_some()
        {
            // Already synced in a previous run: refresh flags and
            // folder label only.
            self.store.upsert(account_id, &message)?;
            return Ok(MessageOutcome::Skipped);
        }

        // The upsert outcome, not the lookup above, decides the
        // count: concurrent folder tasks may race on the same key and
        // the store's per-key atomicity is the tiebreaker.
        match self.store.upsert(account_id, &message)? {
            UpsertOutcome::Inserted => Ok(MessageOutcome::Persisted),
            UpsertOutcome::Updated => Ok(MessageOutcome::Skipped),
        }
    }

    fn finish_error(
        &self,
        session_id: &str,
        result: &mut MultiFolderResult,
        started: Instant,
        message: String,
    ) -> MultiFolderResult {
        self.tracker.fail(session_id, message.clone());
        result.errors.push(message);
        result.duration_ms = elapsed_ms(started);
        result.clone()
    }
}

/// Resolve which folders to sync: explicit list wins, the empty-list
/// sentinel means every discovered folder, and the default is the
/// classifier's recommended set.
fn resolve_sync_set(all_folders: &[FolderDescriptor], options: &SyncOptions) -> Vec<String> {
    match options.folders.as_ref() {
        Some(explicit) if !explicit.is_empty() => explicit.clone(),
        Some(_) => all_folders.iter().map(|f| f.name.clone()).collect(),
        None => classifier::suggest_sync_set(all_folders, options.include_spam).recommended,
    }
}

/// The sequence-number fetch window: the most recent `limit` messages
/// when limited, the whole folder otherwise.
fn fetch_range(total: u32, limit: Option<u32>) -> String {
    match limit {
        Some(limit) if limit > 0 => {
            let start = total.saturating_sub(limit - 1).max(1);
            format!("{start}:{total}")
        }
        _ => format!("1:{total}"),
    }
}

/// FETCH data items: envelope and metadata always; the full body only
/// when requested (PEEK keeps the server from setting `\Seen`).
const fn fetch_query(fetch_body: bool) -> &'static str {
    if fetch_body {
        "(FLAGS INTERNALDATE RFC822.SIZE ENVELOPE BODY.PEEK[])"
    } else {
        "(FLAGS INTERNALDATE RFC822.SIZE ENVELOPE)"
    }
}

/// LIST all folders on the session into owned descriptors.
async fn list_folders(session: &mut ImapSession) -> Result<Vec<FolderDescriptor>> {
    let mut stream = session
        .list(Some(""), Some("*"))
        .await
        .map_err(|e| Error::Connection(format!("list folders failed: {e}")))?;

    let mut folders = Vec::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(name) => {
                let raw_flags = name
                    .attributes()
                    .iter()
                    .map(|a| format!("{a:?}"))
                    .collect();
                folders.push(
                    FolderDescriptor::new(name.name(), name.delimiter().unwrap_or("/"))
                        .with_flags(raw_flags),
                );
            }
            Err(e) => warn!("skipping unparsable LIST entry: {}", e),
        }
    }
    Ok(folders)
}

/// Open a folder read-only and report its message count. No fetch.
async fn count_messages(session: &mut ImapSession, folder: &str) -> Result<u64> {
    let mailbox = session
        .examine(folder)
        .await
        .map_err(|e| Error::FolderOpen {
            folder: folder.to_string(),
            reason: e.to_string(),
        })?;
    Ok(u64::from(mailbox.exists))
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
