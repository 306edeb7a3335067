//! Test data model for the fake IMAP server
//!
//! Builder-style API for constructing mailbox state:
//!
//! ```ignore
//! let mailbox = MailboxBuilder::new()
//!     .folder("INBOX")
//!         .email(1, false, raw_rfc2822_bytes)
//!         .broken_email(2)
//!     .unopenable_folder("Broken")
//!     .build();
//! ```
//!
//! Two fault-injection knobs drive the engine's failure paths:
//! a `broken_email` produces an attribute-less FETCH response (no
//! envelope, no body -- unparsable), and an `unopenable_folder`
//! answers NO to SELECT and EXAMINE.

/// A complete mailbox: named folders holding test emails.
#[derive(Debug, Clone)]
pub struct Mailbox {
    pub folders: Vec<Folder>,
}

impl Mailbox {
    /// Look up a folder by name (case-sensitive, matching real IMAP).
    pub fn get_folder(&self, name: &str) -> Option<&Folder> {
        self.folders.iter().find(|f| f.name == name)
    }
}

/// A single IMAP folder.
#[derive(Debug, Clone)]
pub struct Folder {
    pub name: String,
    /// When false, SELECT/EXAMINE answer NO.
    pub openable: bool,
    pub emails: Vec<TestEmail>,
}

/// A test email stored in a folder.
///
/// - `uid`: unique-per-folder number (sequence numbers are derived
///   from position).
/// - `seen`: whether the `\Seen` flag is set.
/// - `broken`: when true the server emits a FETCH response with no
///   usable attributes for this message.
/// - `raw`: the complete RFC 2822 message (headers + body); the
///   server derives the ENVELOPE response from these headers.
#[derive(Debug, Clone)]
pub struct TestEmail {
    pub uid: u32,
    pub seen: bool,
    pub broken: bool,
    pub raw: Vec<u8>,
}

/// Builder for constructing a `Mailbox` step by step.
pub struct MailboxBuilder {
    folders: Vec<Folder>,
}

impl MailboxBuilder {
    pub fn new() -> Self {
        Self {
            folders: Vec::new(),
        }
    }

    /// Add a new folder. Subsequent `.email()` calls add to it.
    pub fn folder(mut self, name: &str) -> Self {
        self.folders.push(Folder {
            name: name.to_string(),
            openable: true,
            emails: Vec::new(),
        });
        self
    }

    /// Add a folder that refuses to open.
    pub fn unopenable_folder(mut self, name: &str) -> Self {
        self.folders.push(Folder {
            name: name.to_string(),
            openable: false,
            emails: Vec::new(),
        });
        self
    }

    /// Add an email to the most recently added folder.
    ///
    /// # Panics
    ///
    /// Panics if called before any `.folder()` call.
    pub fn email(mut self, uid: u32, seen: bool, raw: &[u8]) -> Self {
        self.folders
            .last_mut()
            .expect("call .folder() before .email()")
            .emails
            .push(TestEmail {
                uid,
                seen,
                broken: false,
                raw: raw.to_vec(),
            });
        self
    }

    /// Add an email whose FETCH response carries no usable data.
    ///
    /// # Panics
    ///
    /// Panics if called before any `.folder()` call.
    pub fn broken_email(mut self, uid: u32) -> Self {
        self.folders
            .last_mut()
            .expect("call .folder() before .broken_email()")
            .emails
            .push(TestEmail {
                uid,
                seen: false,
                broken: true,
                raw: Vec::new(),
            });
        self
    }

    /// Consume the builder and return the finished `Mailbox`.
    pub fn build(self) -> Mailbox {
        Mailbox {
            folders: self.folders,
        }
    }
}
