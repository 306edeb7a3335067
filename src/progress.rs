//! Sync session progress tracking
//!
//! In-memory state machine, one entry per running or recently-ended
//! sync session. Sessions move `Starting -> Syncing -> {Completed |
//! Error}`; terminal states are final. Concurrent folder tasks
//! advance the shared counters through [`ProgressTracker::add_progress`],
//! which increments under the tracker's one lock -- callers never
//! read-modify-write session state themselves.
//!
//! Terminal sessions are kept for a grace window so callers can read
//! the outcome (longer for failures, so operators have time to see
//! them), then evicted. Callers must not rely on sessions persisting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Lifecycle state of a sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Starting,
    Syncing,
    Completed,
    Error,
}

impl SessionStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// Snapshot of one sync session's progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSession {
    pub session_id: String,
    pub account_id: String,
    pub status: SessionStatus,
    pub folders_planned: u32,
    pub folders_done: u32,
    pub messages_planned: u64,
    pub messages_done: u64,
    pub current_folder: Option<String>,
    pub message: String,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Cooperative cancellation flag, checked by the sync loops at
    /// folder and message boundaries.
    pub cancel_requested: bool,
}

/// Partial update with merge semantics: only provided fields change.
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub status: Option<SessionStatus>,
    pub folders_planned: Option<u32>,
    pub messages_planned: Option<u64>,
    pub current_folder: Option<String>,
    pub message: Option<String>,
}

struct Entry {
    session: SyncSession,
    evict_at: Option<Instant>,
}

/// Tracker for all sessions, guarded by a single mutex.
pub struct ProgressTracker {
    sessions: Mutex<HashMap<String, Entry>>,
    completed_grace: Duration,
    error_grace: Duration,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    /// Tracker with the default grace windows (30s after success,
    /// 60s after failure).
    #[must_use]
    pub fn new() -> Self {
        Self::with_grace(Duration::from_secs(30), Duration::from_secs(60))
    }

    /// Tracker with explicit eviction windows (tests use short ones).
    #[must_use]
    pub fn with_grace(completed_grace: Duration, error_grace: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            completed_grace,
            error_grace,
        }
    }

    fn sweep(sessions: &mut HashMap<String, Entry>) {
        let now = Instant::now();
        sessions.retain(|_, entry| entry.evict_at.is_none_or(|at| at > now));
    }

    /// Register a new session in `Starting` state.
    pub fn start(&self, session_id: &str, account_id: &str) {
        let mut sessions = self.sessions.lock().unwrap();
        Self::sweep(&mut sessions);
        sessions.insert(
            session_id.to_string(),
            Entry {
                session: SyncSession {
                    session_id: session_id.to_string(),
                    account_id: account_id.to_string(),
                    status: SessionStatus::Starting,
                    folders_planned: 0,
                    folders_done: 0,
                    messages_planned: 0,
                    messages_done: 0,
                    current_folder: None,
                    message: "starting mailbox synchronization".to_string(),
                    errors: Vec::new(),
                    started_at: Utc::now(),
                    ended_at: None,
                    cancel_requested: false,
                },
                evict_at: None,
            },
        );
    }

    /// Merge the provided fields into the session. Unknown session
    /// ids and terminal sessions are left untouched.
    pub fn update(&self, session_id: &str, update: ProgressUpdate) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(entry) = sessions.get_mut(session_id) {
            if entry.session.status.is_terminal() {
                return;
            }
            if let Some(status) = update.status {
                entry.session.status = status;
            }
            if let Some(v) = update.folders_planned {
                entry.session.folders_planned = v;
            }
            if let Some(v) = update.messages_planned {
                entry.session.messages_planned = v;
            }
            if let Some(v) = update.current_folder {
                entry.session.current_folder = Some(v);
            }
            if let Some(v) = update.message {
                entry.session.message = v;
            }
        }
    }

    /// Atomically advance the monotonic counters.
    pub fn add_progress(&self, session_id: &str, folders_done: u32, messages_done: u64) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(entry) = sessions.get_mut(session_id) {
            entry.session.folders_done += folders_done;
            entry.session.messages_done += messages_done;
        }
    }

    /// Append one error to the session's error list.
    pub fn push_error(&self, session_id: &str, error: impl Into<String>) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(entry) = sessions.get_mut(session_id) {
            entry.session.errors.push(error.into());
        }
    }

    /// Transition to `Completed` and schedule eviction.
    pub fn complete(&self, session_id: &str, message: impl Into<String>) {
        self.finish(session_id, SessionStatus::Completed, message.into());
    }

    /// Transition to `Error`, record the failure, and schedule
    /// eviction (with the longer grace window).
    pub fn fail(&self, session_id: &str, error: impl Into<String>) {
        let error = error.into();
        self.push_error(session_id, error.clone());
        self.finish(session_id, SessionStatus::Error, format!("sync failed: {error}"));
    }

    fn finish(&self, session_id: &str, status: SessionStatus, message: String) {
        let grace = match status {
            SessionStatus::Error => self.error_grace,
            _ => self.completed_grace,
        };
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(entry) = sessions.get_mut(session_id) {
            if entry.session.status.is_terminal() {
                return;
            }
            entry.session.status = status;
            entry.session.message = message;
            entry.session.ended_at = Some(Utc::now());
            entry.evict_at = Some(Instant::now() + grace);
        }
    }

    /// Snapshot of a session, if it exists and has not been evicted.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<SyncSession> {
        let mut sessions = self.sessions.lock().unwrap();
        Self::sweep(&mut sessions);
        sessions.get(session_id).map(|e| e.session.clone())
    }

    /// Whether any non-terminal session exists for the account.
    #[must_use]
    pub fn is_active(&self, account_id: &str) -> bool {
        self.active_session_for(account_id).is_some()
    }

    /// The id of the account's active session, if any.
    #[must_use]
    pub fn active_session_for(&self, account_id: &str) -> Option<String> {
        let mut sessions = self.sessions.lock().unwrap();
        Self::sweep(&mut sessions);
        sessions
            .values()
            .find(|e| e.session.account_id == account_id && !e.session.status.is_terminal())
            .map(|e| e.session.session_id.clone())
    }

    /// Set the cooperative cancel flag. Loops observe it at folder
    /// and message boundaries; in-flight network calls finish.
    pub fn request_cancel(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(entry) = sessions.get_mut(session_id) {
            entry.session.cancel_requested = true;
        }
    }

    #[must_use]
    pub fn is_cancelled(&self, session_id: &str) -> bool {
        let sessions = self.sessions.lock().unwrap();
        sessions
            .get(session_id)
            .is_some_and(|e| e.session.cancel_requested)
    }

    /// Evict expired terminal sessions now.
    pub fn sweep_expired(&self) {
        let mut sessions = self.sessions.lock().unwrap();
        Self::sweep(&mut sessions);
    }
}
