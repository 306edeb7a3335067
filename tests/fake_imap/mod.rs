//! Fake IMAP server for integration testing
//!
//! An in-process server speaking enough IMAP to test the sync engine
//! end-to-end, in plain-TCP or STARTTLS mode:
//!
//! TCP -> greeting [-> STARTTLS -> TLS handshake] -> LOGIN -> commands -> LOGOUT
//!
//! ## Module layout
//!
//! - `server` -- TCP listener, optional TLS setup, command dispatch
//! - `handlers/` -- one file per IMAP command
//! - `mailbox` -- test data model (folders, emails, fault injection)
//! - `io` -- shared write helpers

mod handlers;
mod io;
pub mod mailbox;
mod server;

pub use mailbox::MailboxBuilder;
pub use server::FakeImapServer;
