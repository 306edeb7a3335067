//! FETCH command handler (sequence-number based).
//!
//! The engine fetches windows like `1:1000` or `951:1000` with
//! `(FLAGS INTERNALDATE RFC822.SIZE ENVELOPE BODY.PEEK[])`. Each hit
//! produces one untagged response; bodies are transferred as counted
//! literals (`{length}\r\n` followed by exactly that many raw bytes):
//!
//! ```text
//! * 3 FETCH (FLAGS (\Seen) INTERNALDATE "..." RFC822.SIZE 120
//!   ENVELOPE (...) BODY[] {120}
//! <120 raw bytes>
//! )
//! ```
//!
//! The ENVELOPE is synthesized from the test email's raw headers. A
//! `broken` test email instead produces a response with no usable
//! attributes, which the engine must record as a message-level
//! failure without aborting the folder.

use crate::fake_imap::io::{write_bytes, write_line};
use crate::fake_imap::mailbox::{Folder, TestEmail};
use crate::fake_imap::server::ServerStats;
use imap_codec::imap_types::fetch::{MacroOrMessageDataItemNames, MessageDataItemName};
use imap_codec::imap_types::sequence::{SeqOrUid, Sequence, SequenceSet};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Resolve a sequence set into 1-based sequence numbers, clamped to
/// the folder size. `*` means the highest sequence number.
fn resolve_sequences(seq_set: &SequenceSet, max: u32) -> Vec<u32> {
    let value = |v: &SeqOrUid| match v {
        SeqOrUid::Value(n) => n.get(),
        SeqOrUid::Asterisk => max,
    };

    let mut out = Vec::new();
    for seq in seq_set.0.as_ref() {
        match seq {
            Sequence::Single(v) => out.push(value(v)),
            Sequence::Range(a, b) => {
                let (a, b) = (value(a), value(b));
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                out.extend(lo..=hi);
            }
        }
    }
    out.retain(|n| (1..=max).contains(n));
    out
}

/// Whether the client asked for a body section.
fn wants_body(items: &MacroOrMessageDataItemNames<'_>) -> bool {
    match items {
        MacroOrMessageDataItemNames::Macro(_) => false,
        MacroOrMessageDataItemNames::MessageDataItemNames(names) => names.iter().any(|n| {
            matches!(
                n,
                MessageDataItemName::Body
                    | MessageDataItemName::BodyExt { .. }
                    | MessageDataItemName::Rfc822
            )
        }),
    }
}

/// Quote a string for IMAP, escaping backslashes and quotes.
fn imap_string(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

fn nil_or_string(value: Option<&str>) -> String {
    value.map_or_else(|| "NIL".to_string(), imap_string)
}

/// One envelope address as `(name adl mailbox host)`.
fn envelope_address(name: Option<&str>, address: &str) -> String {
    let (mailbox, host) = address.split_once('@').unwrap_or((address, ""));
    format!(
        "({} NIL {} {})",
        nil_or_string(name),
        imap_string(mailbox),
        imap_string(host)
    )
}

fn envelope_address_list(addrs: &[(Option<String>, String)]) -> String {
    if addrs.is_empty() {
        return "NIL".to_string();
    }
    let parts: Vec<String> = addrs
        .iter()
        .map(|(name, address)| envelope_address(name.as_deref(), address))
        .collect();
    format!("({})", parts.join(""))
}

fn header_addresses(value: &mail_parser::HeaderValue<'_>) -> Vec<(Option<String>, String)> {
    match value {
        mail_parser::HeaderValue::Address(addr) => addr
            .address
            .as_ref()
            .map(|a| {
                vec![(
                    addr.name.as_ref().map(ToString::to_string),
                    a.to_string(),
                )]
            })
            .unwrap_or_default(),
        mail_parser::HeaderValue::AddressList(addrs) => addrs
            .iter()
            .filter_map(|addr| {
                addr.address
                    .as_ref()
                    .map(|a| (addr.name.as_ref().map(ToString::to_string), a.to_string()))
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn header_text(parsed: &mail_parser::Message<'_>, name: &str) -> Option<String> {
    parsed.headers().iter().find_map(|header| {
        if !header.name().eq_ignore_ascii_case(name) {
            return None;
        }
        match header.value() {
            mail_parser::HeaderValue::Text(t) => Some(t.to_string()),
            mail_parser::HeaderValue::TextList(list) => Some(list.join(" ")),
            _ => None,
        }
    })
}

/// Build the RFC 3501 ENVELOPE response from the raw message headers:
/// `(date subject from sender reply-to to cc bcc in-reply-to
/// message-id)`.
fn build_envelope(raw: &[u8]) -> String {
    let Some(parsed) = mail_parser::Message::parse(raw) else {
        return "(NIL NIL NIL NIL NIL NIL NIL NIL NIL NIL)".to_string();
    };

    let date = header_text(&parsed, "Date");
    let subject = parsed.subject().map(ToString::to_string);
    let from = header_addresses(parsed.from());
    let to = header_addresses(parsed.to());
    let cc = header_addresses(parsed.cc());
    let bcc = header_addresses(parsed.bcc());
    let in_reply_to = header_text(&parsed, "In-Reply-To");
    let message_id = header_text(&parsed, "Message-ID").map(|id| {
        if id.starts_with('<') {
            id
        } else {
            format!("<{id}>")
        }
    });

    format!(
        "({} {} {} {} {} {} {} {} {} {})",
        nil_or_string(date.as_deref()),
        nil_or_string(subject.as_deref()),
        envelope_address_list(&from),
        envelope_address_list(&from), // sender
        envelope_address_list(&from), // reply-to
        envelope_address_list(&to),
        envelope_address_list(&cc),
        envelope_address_list(&bcc),
        nil_or_string(in_reply_to.as_deref()),
        nil_or_string(message_id.as_deref()),
    )
}

async fn write_one<S: AsyncRead + AsyncWrite + Unpin>(
    seq: u32,
    email: &TestEmail,
    include_body: bool,
    stream: &mut BufReader<S>,
) -> std::io::Result<()> {
    if email.broken {
        // No envelope, no body: nothing the client can build a
        // record from.
        return write_line(stream, &format!("* {seq} FETCH (FLAGS ())\r\n")).await;
    }

    let flags = if email.seen { "(\\Seen)" } else { "()" };
    let size = email.raw.len();
    let envelope = build_envelope(&email.raw);
    let prefix = format!(
        "* {seq} FETCH (FLAGS {flags} \
         INTERNALDATE \"01-Jan-2024 00:00:00 +0000\" \
         RFC822.SIZE {size} ENVELOPE {envelope}"
    );

    if include_body {
        write_line(stream, &format!("{prefix} BODY[] {{{size}}}\r\n")).await?;
        write_bytes(stream, &email.raw).await?;
        write_line(stream, ")\r\n").await
    } else {
        write_line(stream, &format!("{prefix})\r\n")).await
    }
}

/// Handle a sequence-number FETCH against the selected folder.
pub async fn handle_fetch<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    sequence_set: &SequenceSet,
    items: &MacroOrMessageDataItemNames<'_>,
    folder: Option<&Folder>,
    stats: &ServerStats,
    stream: &mut BufReader<S>,
) {
    let Some(folder) = folder else {
        let resp = format!("{tag} BAD No folder selected\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };

    // Track how many FETCH streams run at once so tests can assert
    // the engine's concurrency bound. The short sleep makes overlap
    // observable.
    let in_flight = stats.fetches_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    stats
        .max_concurrent_fetches
        .fetch_max(in_flight, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(25)).await;

    let total = folder.emails.len() as u32;
    let include_body = wants_body(items);

    for seq in resolve_sequences(sequence_set, total) {
        let email = &folder.emails[(seq - 1) as usize];
        if write_one(seq, email, include_body, stream).await.is_err() {
            stats.fetches_in_flight.fetch_sub(1, Ordering::SeqCst);
            return;
        }
    }

    stats.fetches_in_flight.fetch_sub(1, Ordering::SeqCst);
    let resp = format!("{tag} OK FETCH completed\r\n");
    let _ = write_line(stream, &resp).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU32;

    fn seq_range(lo: u32, hi: u32) -> SequenceSet {
        SequenceSet(
            vec![Sequence::Range(
                SeqOrUid::Value(NonZeroU32::new(lo).unwrap()),
                SeqOrUid::Value(NonZeroU32::new(hi).unwrap()),
            )]
            .try_into()
            .unwrap(),
        )
    }

    #[test]
    fn resolves_ranges_and_clamps() {
        assert_eq!(resolve_sequences(&seq_range(1, 3), 5), vec![1, 2, 3]);
        assert_eq!(resolve_sequences(&seq_range(4, 9), 5), vec![4, 5]);
        assert!(resolve_sequences(&seq_range(7, 9), 5).is_empty());
    }

    #[test]
    fn envelope_quotes_and_nils() {
        let raw = b"From: Alice <alice@example.com>\r\n\
                    To: bob@example.com\r\n\
                    Subject: Hi \"there\"\r\n\
                    Message-ID: <m1@x>\r\n\
                    \r\n\
                    body";
        let env = build_envelope(raw);
        assert!(env.contains("\"Hi \\\"there\\\"\""));
        assert!(env.contains("\"alice\" \"example.com\""));
        assert!(env.contains("\"<m1@x>\""));
        // No Cc header -> NIL in the cc slot.
        assert!(env.contains("NIL"));
    }

    #[test]
    fn envelope_address_splits_mailbox_and_host() {
        let addr = envelope_address(Some("Bob"), "bob@example.com");
        assert_eq!(addr, "(\"Bob\" NIL \"bob\" \"example.com\")");
    }
}
