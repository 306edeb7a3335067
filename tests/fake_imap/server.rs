//! In-process fake IMAP server for integration testing
//!
//! Speaks enough of RFC 3501 to exercise the engine end to end:
//! greeting, optional STARTTLS upgrade, LOGIN, LIST, SELECT/EXAMINE,
//! sequence-number FETCH with ENVELOPE and body literals, NOOP,
//! LOGOUT.
//!
//! Two transport modes:
//!
//! - [`FakeImapServer::start`] -- plain TCP. Tests connect with
//!   `Security::None`.
//! - [`FakeImapServer::start_starttls`] -- plaintext greeting, then a
//!   STARTTLS upgrade with a self-signed `rcgen` certificate. Tests
//!   connect with `Security::StartTls` and `accept_invalid_certs`.
//!
//! The server also keeps a [`ServerStats`] gauge of concurrently
//! running FETCH streams, which is how tests observe the engine's
//! folder-level concurrency bound.

use super::handlers::{
    handle_capability, handle_fetch, handle_list, handle_login, handle_logout, handle_noop,
    handle_select,
};
use super::io::write_line;
use super::mailbox::Mailbox;
use imap_codec::CommandCodec;
use imap_codec::decode::Decoder;
use imap_codec::imap_types::command::CommandBody;
use imap_codec::imap_types::mailbox::Mailbox as ImapMailbox;
use rcgen::generate_simple_self_signed;
use rustls::pki_types::PrivatePkcs8KeyDer;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

/// Shared counters observed by tests.
#[derive(Debug, Default)]
pub struct ServerStats {
    /// FETCH streams currently being written.
    pub fetches_in_flight: AtomicUsize,
    /// High-water mark of `fetches_in_flight`.
    pub max_concurrent_fetches: AtomicUsize,
}

/// A fake IMAP server on localhost with an OS-assigned port.
pub struct FakeImapServer {
    port: u16,
    stats: Arc<ServerStats>,
    /// Handle to the accept loop; aborted on drop.
    _handle: tokio::task::JoinHandle<()>,
}

impl FakeImapServer {
    /// Start a plain-TCP server with the given mailbox state.
    pub async fn start(mailbox: Mailbox) -> Self {
        Self::start_inner(mailbox, false).await
    }

    /// Start a server requiring a STARTTLS upgrade before LOGIN.
    pub async fn start_starttls(mailbox: Mailbox) -> Self {
        Self::start_inner(mailbox, true).await
    }

    async fn start_inner(mailbox: Mailbox, starttls: bool) -> Self {
        // Multiple tests race to install the provider; ignore the
        // error when it is already set.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();

        let acceptor = starttls.then(|| {
            let cert = generate_simple_self_signed(vec!["127.0.0.1".to_string()])
                .expect("generate self-signed cert");
            let cert_der = cert.cert.der().clone();
            let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());
            let tls_config = rustls::ServerConfig::builder()
                .with_no_client_auth()
                .with_single_cert(vec![cert_der], key_der.into())
                .expect("build server TLS config");
            TlsAcceptor::from(Arc::new(tls_config))
        });

        let stats = Arc::new(ServerStats::default());
        let mailbox = Arc::new(mailbox);

        let loop_stats = stats.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _addr)) = listener.accept().await else {
                    break;
                };
                let acceptor = acceptor.clone();
                let mailbox = mailbox.clone();
                let stats = loop_stats.clone();
                tokio::spawn(async move {
                    match acceptor {
                        Some(acceptor) => {
                            handle_starttls_connection(stream, acceptor, &mailbox, &stats).await;
                        }
                        None => handle_plain_connection(stream, &mailbox, &stats).await,
                    }
                });
            }
        });

        Self {
            port,
            stats,
            _handle: handle,
        }
    }

    /// The port the server is listening on.
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// The highest number of FETCH streams that ran concurrently.
    pub fn max_concurrent_fetches(&self) -> usize {
        self.stats
            .max_concurrent_fetches
            .load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// Plain mode: greeting, then straight into the command loop.
async fn handle_plain_connection(stream: TcpStream, mailbox: &Mailbox, stats: &ServerStats) {
    let mut reader = BufReader::new(stream);
    if write_line(&mut reader, "* OK IMAP4rev1 Fake server ready\r\n")
        .await
        .is_err()
    {
        return;
    }
    handle_imap_session(reader, mailbox, stats).await;
}

/// STARTTLS mode: greeting, wait for STARTTLS, TLS handshake, then
/// the command loop over the encrypted stream.
async fn handle_starttls_connection(
    stream: TcpStream,
    acceptor: TlsAcceptor,
    mailbox: &Mailbox,
    stats: &ServerStats,
) {
    let mut reader = BufReader::new(stream);

    if write_line(&mut reader, "* OK IMAP4rev1 Fake server ready\r\n")
        .await
        .is_err()
    {
        return;
    }

    let mut line = String::new();
    if reader.read_line(&mut line).await.is_err() {
        return;
    }

    let parts: Vec<&str> = line.trim().splitn(2, ' ').collect();
    if parts.len() < 2 {
        return;
    }
    let tag = parts[0];
    if !parts[1].eq_ignore_ascii_case("STARTTLS") {
        let resp = format!("{tag} BAD Expected STARTTLS\r\n");
        let _ = write_line(&mut reader, &resp).await;
        return;
    }

    let resp = format!("{tag} OK Begin TLS negotiation now\r\n");
    if write_line(&mut reader, &resp).await.is_err() {
        return;
    }

    let tcp = reader.into_inner();
    let Ok(tls_stream) = acceptor.accept(tcp).await else {
        return;
    };

    handle_imap_session(BufReader::new(tls_stream), mailbox, stats).await;
}

/// Extract the folder name from a parsed `imap_types::Mailbox`.
fn mailbox_name(mb: &ImapMailbox<'_>) -> String {
    match mb {
        ImapMailbox::Inbox => "INBOX".to_string(),
        ImapMailbox::Other(other) => {
            let bytes: &[u8] = other.as_ref();
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Run the authenticated command loop. Commands are parsed with
/// `imap-codec` and dispatched on the `CommandBody` variant.
async fn handle_imap_session<S: AsyncRead + AsyncWrite + Unpin>(
    mut reader: BufReader<S>,
    mailbox: &Mailbox,
    stats: &ServerStats,
) {
    let mut selected_folder: Option<String> = None;
    let codec = CommandCodec::default();

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let Ok((_, command)) = codec.decode(line.as_bytes()) else {
            let tag = trimmed.split_whitespace().next().unwrap_or("*");
            let resp = format!("{tag} BAD Parse error\r\n");
            if write_line(&mut reader, &resp).await.is_err() {
                break;
            }
            continue;
        };

        let tag = command.tag.inner();

        match command.body {
            CommandBody::Capability => {
                handle_capability(tag, &mut reader).await;
            }
            CommandBody::Noop => {
                handle_noop(tag, &mut reader).await;
            }
            CommandBody::Login { .. } => {
                if !handle_login(tag, &mut reader).await {
                    break;
                }
            }
            CommandBody::List { .. } => {
                handle_list(tag, mailbox, &mut reader).await;
            }
            CommandBody::Select { mailbox: mb, .. } => {
                let name = mailbox_name(&mb);
                selected_folder = handle_select(tag, &name, false, mailbox, &mut reader).await;
            }
            CommandBody::Examine { mailbox: mb, .. } => {
                let name = mailbox_name(&mb);
                selected_folder = handle_select(tag, &name, true, mailbox, &mut reader).await;
            }
            CommandBody::Fetch {
                ref sequence_set,
                ref macro_or_item_names,
                uid: false,
                ..
            } => {
                let folder = selected_folder
                    .as_deref()
                    .and_then(|name| mailbox.get_folder(name));
                handle_fetch(
                    tag,
                    sequence_set,
                    macro_or_item_names,
                    folder,
                    stats,
                    &mut reader,
                )
                .await;
            }
            CommandBody::Logout => {
                handle_logout(tag, &mut reader).await;
                break;
            }
            _ => {
                let resp = format!("{tag} BAD Unknown command\r\n");
                if write_line(&mut reader, &resp).await.is_err() {
                    break;
                }
            }
        }
    }
}
