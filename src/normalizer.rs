//! Message normalization
//!
//! Reduces raw protocol data (a fetched body plus IMAP attributes) to
//! the canonical [`Message`] record. The wire library's loosely-shaped
//! envelope types are converted into the owned [`RawMessage`] boundary
//! type here and never passed further.
//!
//! Normalization is tolerant by design: if full-body parsing fails, a
//! degraded record is built from protocol-level attributes alone. A
//! single unparsable message must never abort a folder sync, so
//! [`normalize`] only errors when neither a parsable body nor an
//! envelope exists.

use crate::error::{Error, Result};
use crate::flag::{Flag, MessageFlags};
use crate::message::{Address, AttachmentMeta, Message};
use async_imap::imap_proto::types::{Address as WireAddress, Envelope as WireEnvelope};
use async_imap::types::{Fetch, Flag as WireFlag};
use chrono::{DateTime, Utc};
use mail_parser::MimeHeaders;
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::debug;

/// One address as it appeared on the wire.
#[derive(Debug, Clone, Default)]
pub struct RawAddress {
    pub name: Option<String>,
    pub mailbox: Option<String>,
    pub host: Option<String>,
}

impl RawAddress {
    /// Convert to a canonical [`Address`], or `None` when the wire
    /// data lacks both mailbox and host.
    fn to_address(&self) -> Option<Address> {
        match (&self.mailbox, &self.host) {
            (Some(mailbox), Some(host)) => Some(Address::new(
                self.name.clone(),
                format!("{mailbox}@{host}"),
            )),
            _ => None,
        }
    }
}

/// The message envelope as reported by FETCH ENVELOPE.
#[derive(Debug, Clone, Default)]
pub struct RawEnvelope {
    pub date: Option<String>,
    pub subject: Option<String>,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub from: Vec<RawAddress>,
    pub to: Vec<RawAddress>,
    pub cc: Vec<RawAddress>,
    pub bcc: Vec<RawAddress>,
}

/// Everything the engine keeps from one FETCH response item.
#[derive(Debug, Clone, Default)]
pub struct RawMessage {
    /// 1-based sequence number within the folder.
    pub seq: u32,
    pub uid: Option<u32>,
    /// Full RFC 2822 bytes when the body was fetched.
    pub raw: Option<Vec<u8>>,
    pub envelope: Option<RawEnvelope>,
    pub flags: Vec<Flag>,
    pub internal_date: Option<DateTime<Utc>>,
    pub size: Option<u32>,
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn wire_addresses(addrs: Option<&Vec<WireAddress<'_>>>) -> Vec<RawAddress> {
    addrs.map_or_else(Vec::new, |list| {
        list.iter()
            .map(|a| RawAddress {
                name: a.name.as_deref().map(lossy),
                mailbox: a.mailbox.as_deref().map(lossy),
                host: a.host.as_deref().map(lossy),
            })
            .collect()
    })
}

fn wire_envelope(env: &WireEnvelope<'_>) -> RawEnvelope {
    RawEnvelope {
        date: env.date.as_deref().map(lossy),
        subject: env.subject.as_deref().map(lossy),
        message_id: env.message_id.as_deref().map(lossy),
        in_reply_to: env.in_reply_to.as_deref().map(lossy),
        from: wire_addresses(env.from.as_ref()),
        to: wire_addresses(env.to.as_ref()),
        cc: wire_addresses(env.cc.as_ref()),
        bcc: wire_addresses(env.bcc.as_ref()),
    }
}

impl RawMessage {
    /// Capture everything we need from an `async-imap` fetch item.
    /// This is the only place the wire library's shapes are touched.
    #[must_use]
    pub fn from_fetch(fetch: &Fetch) -> Self {
        let flags = fetch
            .flags()
            .filter_map(|f| match f {
                WireFlag::Seen => Some(Flag::Seen),
                WireFlag::Answered => Some(Flag::Answered),
                WireFlag::Flagged => Some(Flag::Flagged),
                WireFlag::Deleted => Some(Flag::Deleted),
                WireFlag::Draft => Some(Flag::Draft),
                WireFlag::Recent => Some(Flag::Recent),
                WireFlag::Custom(kw) => Some(Flag::Keyword(kw.into_owned())),
                _ => None,
            })
            .collect();

        Self {
            seq: fetch.message,
            uid: fetch.uid,
            raw: fetch.body().map(<[u8]>::to_vec),
            envelope: fetch.envelope().map(wire_envelope),
            flags,
            internal_date: fetch.internal_date().map(|d| d.with_timezone(&Utc)),
            size: fetch.size,
        }
    }
}

/// Strip the angle brackets IMAP message ids are wrapped in.
fn strip_angle_brackets(id: &str) -> String {
    id.trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_string()
}

/// Make up a message id for a message that carries none.
///
/// Synthesized ids are unique per observation, so the same physical
/// message seen again in a later sync run stores under a new id --
/// duplicate detection only works for server-provided ids.
fn synthesize_message_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!("generated-{}-{}", Utc::now().timestamp_millis(), suffix)
}

/// Strip reply/forward prefixes ("Re:", "Fwd:", "Fw:") from a subject,
/// repeatedly, for subject-based thread fallback.
fn strip_reply_prefixes(subject: &str) -> &str {
    let mut s = subject.trim();
    loop {
        let lower = s.to_ascii_lowercase();
        let stripped = if lower.starts_with("re:") {
            &s[3..]
        } else if lower.starts_with("fwd:") {
            &s[4..]
        } else if lower.starts_with("fw:") {
            &s[3..]
        } else {
            return s;
        };
        s = stripped.trim_start();
    }
}

fn subject_thread_key(subject: &str) -> Option<String> {
    let clean = strip_reply_prefixes(subject);
    if clean.is_empty() {
        return None;
    }
    let mut hasher = DefaultHasher::new();
    clean.hash(&mut hasher);
    Some(format!("thread-{:016x}", hasher.finish()))
}

/// Derive the conversation key: `In-Reply-To` first, else the first
/// `References` entry, else a hash of the cleaned subject.
fn thread_key(
    in_reply_to: Option<&str>,
    references: &[String],
    subject: Option<&str>,
) -> Option<String> {
    if let Some(id) = in_reply_to {
        return Some(id.to_string());
    }
    if let Some(first) = references.first() {
        return Some(first.clone());
    }
    subject.and_then(subject_thread_key)
}

/// Parse a whitespace-separated References header into bare ids.
fn split_references(value: &str) -> Vec<String> {
    value
        .split_whitespace()
        .map(strip_angle_brackets)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Pull a named header's text out of a parsed message.
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

fn parsed_addresses(value: &mail_parser::HeaderValue<'_>) -> Vec<Address> {
    match value {
        mail_parser::HeaderValue::Address(addr) => addr
            .address
            .as_ref()
            .map(|a| {
                vec![Address::new(
                    addr.name.as_ref().map(ToString::to_string),
                    a.to_string(),
                )]
            })
            .unwrap_or_default(),
        mail_parser::HeaderValue::AddressList(addrs) => addrs
            .iter()
            .filter_map(|addr| {
                addr.address.as_ref().map(|a| {
                    Address::new(addr.name.as_ref().map(ToString::to_string), a.to_string())
                })
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn parsed_attachments(parsed: &mail_parser::Message<'_>) -> Vec<AttachmentMeta> {
    parsed
        .attachments()
        .map(|part| {
            let content_type = part.content_type().map_or_else(
                || "application/octet-stream".to_string(),
                |ct| match ct.subtype() {
                    Some(sub) => format!("{}/{}", ct.ctype(), sub),
                    None => ct.ctype().to_string(),
                },
            );
            AttachmentMeta {
                filename: part
                    .attachment_name()
                    .unwrap_or("unnamed")
                    .to_string(),
                content_type,
                size_bytes: part.contents().len() as u64,
                content_id: part.content_id().map(ToString::to_string),
                disposition: "attachment".to_string(),
            }
        })
        .collect()
}

/// Envelope-only address conversion, degrading to the unknown sentinel
/// for a missing or malformed sender.
fn envelope_from(env: &RawEnvelope) -> Address {
    env.from
        .first()
        .and_then(RawAddress::to_address)
        .unwrap_or_else(Address::unknown)
}

fn envelope_list(addrs: &[RawAddress]) -> Vec<Address> {
    addrs.iter().filter_map(RawAddress::to_address).collect()
}

/// Normalize one fetched message into the canonical record.
///
/// Prefers a full `mail-parser` pass over the raw body; falls back to
/// an envelope-only degraded record when the body is absent or
/// unparsable.
///
/// # Errors
///
/// Returns [`Error::Parse`] only when the message has neither a
/// parsable body nor an envelope -- there is nothing to build a
/// record from.
pub fn normalize(raw: &RawMessage, folder_label: &str) -> Result<Message> {
    let received_fallback = raw.internal_date.unwrap_or_else(Utc::now);
    let flags = MessageFlags::from_flags(&raw.flags);
    let size = u64::from(raw.size.unwrap_or(0));

    if let Some(bytes) = raw.raw.as_deref() {
        if let Some(parsed) = mail_parser::Message::parse(bytes) {
            return Ok(from_parsed(
                &parsed,
                raw,
                folder_label,
                flags,
                received_fallback,
                size,
            ));
        }
        debug!(seq = raw.seq, "body unparsable, degrading to envelope data");
    }

    let Some(env) = raw.envelope.as_ref() else {
        return Err(Error::Parse(format!(
            "message seq {} has neither parsable body nor envelope",
            raw.seq
        )));
    };

    Ok(from_envelope(
        env,
        folder_label,
        flags,
        received_fallback,
        size,
    ))
}

fn from_parsed(
    parsed: &mail_parser::Message<'_>,
    raw: &RawMessage,
    folder_label: &str,
    flags: MessageFlags,
    received_fallback: DateTime<Utc>,
    size: u64,
) -> Message {
    // Prefer the parsed Message-ID; fall back to the envelope's.
    let message_id = header_text(parsed, "Message-ID")
        .or_else(|| {
            raw.envelope
                .as_ref()
                .and_then(|env| env.message_id.clone())
        })
        .map_or_else(synthesize_message_id, |id| strip_angle_brackets(&id));

    let in_reply_to = header_text(parsed, "In-Reply-To")
        .map(|id| strip_angle_brackets(&id))
        .filter(|id| !id.is_empty());
    let references = header_text(parsed, "References")
        .map(|refs| split_references(&refs))
        .unwrap_or_default();

    let subject = parsed.subject().map(ToString::to_string);
    let sent_at = parsed
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0));

    let from = parsed_addresses(parsed.from())
        .into_iter()
        .next()
        .unwrap_or_else(Address::unknown);

    let thread_key = thread_key(in_reply_to.as_deref(), &references, subject.as_deref());

    Message {
        message_id,
        subject,
        text_body: parsed.body_text(0).map(|t| t.to_string()),
        html_body: parsed.body_html(0).map(|t| t.to_string()),
        from,
        to: parsed_addresses(parsed.to()),
        cc: parsed_addresses(parsed.cc()),
        bcc: parsed_addresses(parsed.bcc()),
        sent_at,
        received_at: raw.internal_date.or(sent_at).unwrap_or(received_fallback),
        folder_label: folder_label.to_string(),
        flags,
        thread_key,
        in_reply_to,
        references,
        attachments: parsed_attachments(parsed),
        size_bytes: if size > 0 {
            size
        } else {
            raw.raw.as_ref().map_or(0, |b| b.len() as u64)
        },
    }
}

fn from_envelope(
    env: &RawEnvelope,
    folder_label: &str,
    flags: MessageFlags,
    received_fallback: DateTime<Utc>,
    size: u64,
) -> Message {
    let message_id = env
        .message_id
        .as_deref()
        .map(strip_angle_brackets)
        .filter(|id| !id.is_empty())
        .unwrap_or_else(synthesize_message_id);

    let in_reply_to = env
        .in_reply_to
        .as_deref()
        .map(strip_angle_brackets)
        .filter(|id| !id.is_empty());

    let sent_at = env
        .date
        .as_deref()
        .and_then(|d| DateTime::parse_from_rfc2822(d).ok())
        .map(|d| d.with_timezone(&Utc));

    let thread_key = thread_key(in_reply_to.as_deref(), &[], env.subject.as_deref());

    Message {
        message_id,
        subject: env.subject.clone(),
        text_body: None,
        html_body: None,
        from: envelope_from(env),
        to: envelope_list(&env.to),
        cc: envelope_list(&env.cc),
        bcc: envelope_list(&env.bcc),
        sent_at,
        received_at: sent_at.unwrap_or(received_fallback),
        folder_label: folder_label.to_string(),
        flags,
        thread_key,
        in_reply_to,
        references: Vec::new(),
        attachments: Vec::new(),
        size_bytes: size,
    }
}
