//! Folder classification
//!
//! Pure, deterministic mapping from folder names to categories. The
//! rule list is an explicit ordered table; evaluation order is
//! significant and fixed: spam patterns are checked before everything
//! else because spam folder names ("Junk Mail", "Bulk Mail") often
//! contain words that would otherwise read as generic mail folders.
//! After spam come trash, sent, drafts, archive, inbox, then a
//! lower-confidence heuristic pass, then the `Other` fallback.

use crate::folder::FolderDescriptor;
use serde::{Deserialize, Serialize};

/// Discovery-time folder category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Inbox,
    Sent,
    Drafts,
    Spam,
    Trash,
    Archive,
    Other,
}

/// Result of classifying one folder name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderClassification {
    pub name: String,
    pub category: Category,
    pub confidence: f32,
}

/// How a rule matches a folder name. All matchers are
/// ASCII-case-insensitive.
#[derive(Debug, Clone, Copy)]
enum Matcher {
    /// The whole name equals this string.
    Exact(&'static str),
    /// The whole name equals one of these strings.
    AnyExact(&'static [&'static str]),
    /// The name contains this substring anywhere.
    Contains(&'static str),
}

impl Matcher {
    fn matches(self, name: &str) -> bool {
        let lower = name.to_ascii_lowercase();
        match self {
            Self::Exact(s) => lower == s,
            Self::AnyExact(options) => options.iter().any(|s| lower == *s),
            Self::Contains(s) => lower.contains(s),
        }
    }
}

struct Rule {
    matcher: Matcher,
    category: Category,
    confidence: f32,
}

const fn rule(matcher: Matcher, category: Category, confidence: f32) -> Rule {
    Rule {
        matcher,
        category,
        confidence,
    }
}

/// Primary classification rules, in evaluation order. Every entry
/// carries confidence >= 0.7 so the first match wins outright.
///
/// Patterns cover Gmail (`[Gmail]/...`), Outlook/Exchange
/// ("Junk E-mail", "Deleted Items", "Sent Items"), Yahoo ("Bulk
/// Mail"), RFC 6154 special-use names, and generic providers.
const RULES: &[Rule] = &[
    // -- spam / junk (checked first) --
    rule(Matcher::Exact("[gmail]/spam"), Category::Spam, 1.0),
    rule(Matcher::Exact("[google mail]/spam"), Category::Spam, 1.0),
    rule(Matcher::Exact("bulk mail"), Category::Spam, 1.0),
    rule(
        Matcher::AnyExact(&["junk e-mail", "junk email", "junk mail"]),
        Category::Spam,
        1.0,
    ),
    rule(Matcher::Exact("spam"), Category::Spam, 0.95),
    rule(Matcher::Exact("junk"), Category::Spam, 0.9),
    rule(Matcher::Contains("inbox.spam"), Category::Spam, 0.8),
    rule(Matcher::Contains("inbox.junk"), Category::Spam, 0.8),
    rule(Matcher::Contains("spam"), Category::Spam, 0.7),
    rule(Matcher::Contains("junk"), Category::Spam, 0.7),
    // -- trash --
    rule(Matcher::Exact("[gmail]/trash"), Category::Trash, 1.0),
    rule(Matcher::Exact("[google mail]/trash"), Category::Trash, 1.0),
    rule(Matcher::Exact("deleted items"), Category::Trash, 0.9),
    rule(Matcher::Exact("trash"), Category::Trash, 0.9),
    rule(Matcher::Exact("deleted"), Category::Trash, 0.8),
    rule(
        Matcher::AnyExact(&["bin", "recycle bin"]),
        Category::Trash,
        0.8,
    ),
    // -- sent --
    rule(Matcher::Exact("[gmail]/sent mail"), Category::Sent, 1.0),
    rule(Matcher::Exact("[google mail]/sent mail"), Category::Sent, 1.0),
    rule(
        Matcher::AnyExact(&["sent", "sent mail", "sent items", "sent messages"]),
        Category::Sent,
        0.9,
    ),
    // -- drafts --
    rule(Matcher::Exact("[gmail]/drafts"), Category::Drafts, 1.0),
    rule(Matcher::Exact("drafts"), Category::Drafts, 0.9),
    rule(Matcher::Exact("draft"), Category::Drafts, 0.8),
    // -- archive --
    rule(Matcher::Exact("[gmail]/all mail"), Category::Archive, 1.0),
    rule(Matcher::Exact("archive"), Category::Archive, 0.9),
    rule(Matcher::Exact("archives"), Category::Archive, 0.8),
    rule(Matcher::Exact("all mail"), Category::Archive, 0.8),
    // -- inbox --
    rule(Matcher::Exact("inbox"), Category::Inbox, 1.0),
];

/// Heuristic cues tried when no primary rule reaches the 0.7 bar.
const HEURISTICS: &[Rule] = &[
    rule(Matcher::Contains("bulk"), Category::Spam, 0.5),
    rule(Matcher::Contains("promo"), Category::Spam, 0.5),
    rule(Matcher::Contains("unsolicited"), Category::Spam, 0.5),
    rule(Matcher::Contains("archive"), Category::Archive, 0.5),
    rule(Matcher::Contains("deleted"), Category::Trash, 0.5),
    rule(Matcher::Contains("outgoing"), Category::Sent, 0.5),
];

/// Classify a single folder name. Deterministic, no I/O.
#[must_use]
pub fn classify(name: &str) -> FolderClassification {
    let trimmed = name.trim();

    for r in RULES {
        if r.matcher.matches(trimmed) {
            return FolderClassification {
                name: name.to_string(),
                category: r.category,
                confidence: r.confidence,
            };
        }
    }

    for r in HEURISTICS {
        if r.matcher.matches(trimmed) {
            return FolderClassification {
                name: name.to_string(),
                category: r.category,
                confidence: r.confidence,
            };
        }
    }

    FolderClassification {
        name: name.to_string(),
        category: Category::Other,
        confidence: 0.2,
    }
}

/// Partition of discovered folders into sync recommendations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncSet {
    /// Folders a default sync should cover: inbox, sent, drafts, and
    /// (when requested) spam.
    pub recommended: Vec<String>,
    /// Detected spam folders, regardless of whether they were
    /// recommended.
    pub spam_only: Vec<String>,
    /// Everything else, reported but excluded from the default sync.
    /// Trash is ephemeral and archive duplicates inbox content, so
    /// both land here.
    pub other: Vec<String>,
}

/// Partition discovered folders into a recommended sync set.
#[must_use]
pub fn suggest_sync_set(folders: &[FolderDescriptor], include_spam: bool) -> SyncSet {
    let mut set = SyncSet::default();

    for folder in folders {
        let classification = classify(&folder.name);
        match classification.category {
            Category::Spam => {
                set.spam_only.push(folder.name.clone());
                if include_spam {
                    set.recommended.push(folder.name.clone());
                }
            }
            Category::Inbox | Category::Sent | Category::Drafts => {
                set.recommended.push(folder.name.clone());
            }
            Category::Trash | Category::Archive | Category::Other => {
                set.other.push(folder.name.clone());
            }
        }
    }

    set
}

/// Per-folder sync advice, with a human-readable reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderAdvice {
    pub folder: String,
    pub category: Category,
    pub confidence: f32,
    pub should_sync: bool,
    pub reason: String,
}

/// Advice for every discovered folder, for callers presenting a
/// sync-selection UI.
#[must_use]
pub fn folder_recommendations(folders: &[FolderDescriptor]) -> Vec<FolderAdvice> {
    folders
        .iter()
        .map(|folder| {
            let c = classify(&folder.name);
            let (should_sync, reason) = match c.category {
                Category::Inbox => (true, "primary inbox folder"),
                Category::Sent => (true, "sent mail folder"),
                Category::Drafts => (true, "draft messages folder"),
                Category::Spam => (true, "spam/junk folder - contains filtered mail"),
                Category::Trash => (false, "deleted items - usually not needed"),
                Category::Archive => (false, "archive folder - may duplicate inbox"),
                Category::Other => (
                    c.confidence < 0.5,
                    "unknown folder type - manual review recommended",
                ),
            };
            FolderAdvice {
                folder: folder.name.clone(),
                category: c.category,
                confidence: c.confidence,
                should_sync,
                reason: reason.to_string(),
            }
        })
        .collect()
}

/// Storage-time bucket. Coarser than [`Category`] because the storage
/// model keeps exactly four folders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StandardFolder {
    Inbox,
    Sent,
    Deleted,
    Spam,
}

/// Result of mapping a folder name to a storage bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderMapping {
    pub original_folder: String,
    pub standard_folder: StandardFolder,
    pub confidence: f32,
    pub reason: String,
}

struct MapRule {
    matcher: Matcher,
    confidence: f32,
    reason: &'static str,
}

const fn map_rule(matcher: Matcher, confidence: f32, reason: &'static str) -> MapRule {
    MapRule {
        matcher,
        confidence,
        reason,
    }
}

const SPAM_MAP: &[MapRule] = &[
    map_rule(Matcher::Exact("[gmail]/spam"), 1.0, "Gmail spam folder"),
    map_rule(
        Matcher::Exact("[google mail]/spam"),
        1.0,
        "Google Mail spam folder",
    ),
    map_rule(Matcher::Exact("bulk mail"), 1.0, "Yahoo bulk mail folder"),
    map_rule(Matcher::Exact("bulk"), 0.9, "bulk mail folder"),
    map_rule(
        Matcher::AnyExact(&["junk e-mail", "junk email", "junk mail"]),
        1.0,
        "Outlook junk folder",
    ),
    map_rule(Matcher::Exact("junk"), 0.95, "junk folder"),
    map_rule(Matcher::Exact("spam"), 0.98, "generic spam folder"),
    map_rule(Matcher::Exact("quarantine"), 0.9, "quarantine folder"),
    map_rule(Matcher::Contains("inbox.spam"), 0.9, "spam subfolder"),
    map_rule(Matcher::Contains("inbox.junk"), 0.9, "junk subfolder"),
    map_rule(Matcher::Contains("spam"), 0.8, "contains \"spam\""),
    map_rule(Matcher::Contains("junk"), 0.8, "contains \"junk\""),
    map_rule(
        Matcher::Contains("unsolicited"),
        0.7,
        "unsolicited mail folder",
    ),
];

const DELETED_MAP: &[MapRule] = &[
    map_rule(Matcher::Exact("[gmail]/trash"), 1.0, "Gmail trash folder"),
    map_rule(
        Matcher::Exact("[google mail]/trash"),
        1.0,
        "Google Mail trash folder",
    ),
    map_rule(
        Matcher::Exact("deleted items"),
        1.0,
        "Outlook deleted items",
    ),
    map_rule(Matcher::Exact("deleted"), 0.9, "deleted folder"),
    map_rule(Matcher::Exact("trash"), 0.98, "generic trash folder"),
    map_rule(
        Matcher::AnyExact(&["bin", "recycle bin"]),
        0.9,
        "recycle bin folder",
    ),
    map_rule(Matcher::Contains("trash"), 0.8, "contains \"trash\""),
    map_rule(Matcher::Contains("deleted"), 0.8, "contains \"deleted\""),
];

const SENT_MAP: &[MapRule] = &[
    map_rule(
        Matcher::Exact("[gmail]/sent mail"),
        1.0,
        "Gmail sent mail folder",
    ),
    map_rule(
        Matcher::Exact("[google mail]/sent mail"),
        1.0,
        "Google Mail sent folder",
    ),
    map_rule(Matcher::Exact("sent items"), 1.0, "Outlook sent items"),
    map_rule(
        Matcher::AnyExact(&["sent", "sent mail", "sent messages"]),
        0.95,
        "sent folder",
    ),
    map_rule(Matcher::Exact("outbox"), 0.9, "outbox folder"),
    map_rule(Matcher::Contains("sent"), 0.8, "contains \"sent\""),
    map_rule(Matcher::Contains("outgoing"), 0.7, "contains \"outgoing\""),
];

const INBOX_MAP: &[MapRule] = &[
    map_rule(Matcher::Exact("inbox"), 1.0, "standard INBOX"),
    map_rule(Matcher::Exact("incoming"), 0.9, "incoming folder"),
    map_rule(Matcher::Exact("mail"), 0.7, "generic mail folder"),
];

/// Substrings suggesting an unknown folder holds inbox-type mail.
const INBOX_CUES: &[&str] = &[
    "important",
    "priority",
    "flagged",
    "starred",
    "personal",
    "work",
    "business",
    "newsletter",
    "notification",
    "social",
    "update",
    "receipt",
    "invoice",
];

/// Substrings suggesting an unknown folder holds filtered mail.
const SPAM_CUES: &[&str] = &["unwanted", "blocked", "filter", "quarantine", "suspicious"];

fn check_bucket(
    folder: &str,
    rules: &[MapRule],
    bucket: StandardFolder,
) -> Option<FolderMapping> {
    rules
        .iter()
        .find(|r| r.matcher.matches(folder))
        .filter(|r| r.confidence >= 0.7)
        .map(|r| FolderMapping {
            original_folder: folder.to_string(),
            standard_folder: bucket,
            confidence: r.confidence,
            reason: r.reason.to_string(),
        })
}

/// Map any IMAP folder name onto one of the four storage buckets.
///
/// Checks run spam -> deleted -> sent -> inbox at the 0.7 confidence
/// bar, then heuristics. The fallback is deliberately conservative:
/// an unrecognized folder maps to `Inbox` at confidence 0.2, never to
/// `Spam` -- hiding real mail is worse than an unclassified folder
/// showing up in the inbox.
///
/// `from_addr` / `to_addrs` are accepted for sender-based heuristics
/// but currently unconsulted.
#[must_use]
pub fn map_to_standard_folder(
    name: &str,
    from_addr: Option<&str>,
    to_addrs: Option<&[String]>,
) -> FolderMapping {
    let _ = (from_addr, to_addrs);
    let folder = name.trim();

    if let Some(m) = check_bucket(folder, SPAM_MAP, StandardFolder::Spam) {
        return m;
    }
    if let Some(m) = check_bucket(folder, DELETED_MAP, StandardFolder::Deleted) {
        return m;
    }
    if let Some(m) = check_bucket(folder, SENT_MAP, StandardFolder::Sent) {
        return m;
    }
    if let Some(m) = check_bucket(folder, INBOX_MAP, StandardFolder::Inbox) {
        return m;
    }

    apply_map_heuristics(folder)
}

fn apply_map_heuristics(folder: &str) -> FolderMapping {
    let lower = folder.to_ascii_lowercase();

    if INBOX_CUES.iter().any(|cue| lower.contains(cue)) {
        return FolderMapping {
            original_folder: folder.to_string(),
            standard_folder: StandardFolder::Inbox,
            confidence: 0.6,
            reason: format!("heuristic: \"{folder}\" likely holds inbox-type mail"),
        };
    }

    if SPAM_CUES.iter().any(|cue| lower.contains(cue)) {
        return FolderMapping {
            original_folder: folder.to_string(),
            standard_folder: StandardFolder::Spam,
            confidence: 0.6,
            reason: format!("heuristic: \"{folder}\" likely holds filtered mail"),
        };
    }

    if lower.contains("draft") || lower.contains("template") {
        return FolderMapping {
            original_folder: folder.to_string(),
            standard_folder: StandardFolder::Inbox,
            confidence: 0.5,
            reason: format!("heuristic: \"{folder}\" holds drafts, mapped to inbox"),
        };
    }

    if lower.contains("promo") || lower.contains("marketing") {
        return FolderMapping {
            original_folder: folder.to_string(),
            standard_folder: StandardFolder::Spam,
            confidence: 0.4,
            reason: format!("\"{folder}\" looks promotional, mapped to spam"),
        };
    }

    FolderMapping {
        original_folder: folder.to_string(),
        standard_folder: StandardFolder::Inbox,
        confidence: 0.2,
        reason: format!("unknown folder \"{folder}\" mapped to inbox with low confidence"),
    }
}
