//! IMAP connections and the per-account pool
//!
//! Provides the low-level `connect()` used everywhere a session is
//! needed, plus the [`ConnectionManager`]: an owned, mutex-guarded
//! registry holding at most one authenticated session per account.
//!
//! IMAP's command pipeline is sequential per connection, so pooled
//! sessions follow a checkout/checkin discipline: `acquire` hands the
//! session out (removing it from the pool), `release` puts it back.
//! Two callers can never hold the same connection at once.

use crate::config::{ImapConfig, Security};
use crate::error::{Error, Result};
use async_imap::Session;
use rustls::pki_types::ServerName;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::{debug, info, warn};

/// The stream behind an IMAP session: plain TCP or TLS-wrapped,
/// depending on the configured security mode.
#[derive(Debug)]
pub enum MailStream {
    Plain(Compat<TcpStream>),
    Tls(Compat<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl futures::io::AsyncRead for MailStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl futures::io::AsyncWrite for MailStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_close(cx),
            Self::Tls(s) => Pin::new(s).poll_close(cx),
        }
    }
}

/// An authenticated IMAP session over either stream type.
pub type ImapSession = Session<MailStream>;

/// Build a TLS connector for the configured trust policy.
fn tls_connector(accept_invalid_certs: bool) -> TlsConnector {
    // Multiple connects may race to install the provider; the error
    // for an already-installed provider is ignored.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = if accept_invalid_certs {
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DangerousVerifier))
            .with_no_client_auth()
    } else {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    };
    TlsConnector::from(Arc::new(config))
}

/// Open and authenticate a fresh IMAP session.
///
/// Connects to `config.host:config.port` via TCP, applies the
/// configured security mode (implicit TLS, STARTTLS upgrade, or
/// plaintext), and logs in. Connect and auth phases each run under
/// their own timeout; exceeding either is a [`Error::Connection`].
pub async fn connect(config: &ImapConfig) -> Result<ImapSession> {
    let addr = format!("{}:{}", config.host, config.port);
    debug!("connecting to IMAP server at {}", addr);

    let tcp_stream = timeout(config.connect_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| Error::Connection(format!("connect to {addr} timed out")))?
        .map_err(|e| Error::Connection(format!("connect to {addr} failed: {e}")))?;

    let stream = match config.security {
        Security::None => MailStream::Plain(tcp_stream.compat()),
        Security::Tls => {
            let tls_stream = tls_handshake(config, tcp_stream).await?;
            MailStream::Tls(tls_stream.compat())
        }
        Security::StartTls => {
            let upgraded = starttls_upgrade(config, tcp_stream).await?;
            MailStream::Tls(upgraded.compat())
        }
    };

    let client = async_imap::Client::new(stream);
    let login = timeout(
        config.auth_timeout,
        client.login(&config.username, &config.password),
    )
    .await
    .map_err(|_| Error::Connection("authentication timed out".to_string()))?;

    let session = login.map_err(|(e, _)| Error::Connection(format!("login failed: {e}")))?;

    info!("connected to {} as {}", config.host, config.username);
    Ok(session)
}

async fn tls_handshake(
    config: &ImapConfig,
    tcp_stream: TcpStream,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>> {
    let connector = tls_connector(config.accept_invalid_certs);
    let server_name = ServerName::try_from(config.host.clone())
        .map_err(|e| Error::Tls(format!("invalid server name: {e}")))?;

    timeout(
        config.connect_timeout,
        connector.connect(server_name, tcp_stream),
    )
    .await
    .map_err(|_| Error::Connection("TLS handshake timed out".to_string()))?
    .map_err(|e| Error::Tls(e.to_string()))
}

/// Read the greeting, issue STARTTLS on the plain stream, then
/// perform the TLS handshake over the same socket.
async fn starttls_upgrade(
    config: &ImapConfig,
    tcp_stream: TcpStream,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>> {
    let mut client = async_imap::Client::new(tcp_stream.compat());

    timeout(
        config.connect_timeout,
        client.run_command_and_check_ok("STARTTLS", None),
    )
    .await
    .map_err(|_| Error::Connection("STARTTLS timed out".to_string()))?
    .map_err(|e| Error::Tls(format!("STARTTLS failed: {e}")))?;

    let inner = client.into_inner().into_inner();
    tls_handshake(config, inner).await
}

struct PooledConnection {
    session: ImapSession,
    last_used: Instant,
}

/// Owned registry of pooled connections, one per account.
///
/// Never a global: construct one and share it by `Arc` so lifetime
/// and test isolation stay explicit.
pub struct ConnectionManager {
    connections: tokio::sync::Mutex<HashMap<String, PooledConnection>>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Check out the account's session, reconnecting when the pooled
    /// one is stale.
    ///
    /// A pooled entry is validated with NOOP before reuse; entries
    /// idle beyond `config.idle_timeout` are discarded outright. The
    /// caller must hand the session back with [`Self::release`] (or
    /// drop it on error -- the next acquire reconnects).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] when a fresh connect/auth fails
    /// or times out.
    pub async fn acquire(&self, account_id: &str, config: &ImapConfig) -> Result<ImapSession> {
        let pooled = {
            let mut pool = self.connections.lock().await;
            pool.remove(account_id)
        };

        if let Some(mut entry) = pooled {
            if entry.last_used.elapsed() < config.idle_timeout {
                match entry.session.noop().await {
                    Ok(()) => {
                        debug!("reusing pooled connection for account {}", account_id);
                        return Ok(entry.session);
                    }
                    Err(e) => {
                        warn!("pooled connection for {} is dead: {}", account_id, e);
                    }
                }
            } else {
                debug!("pooled connection for {} idled out", account_id);
            }
            // Stale entry: drop it and fall through to a fresh connect.
        }

        connect(config).await
    }

    /// Check a session back into the pool, replacing any entry that
    /// appeared meanwhile.
    pub async fn release(&self, account_id: &str, session: ImapSession) {
        let mut pool = self.connections.lock().await;
        pool.insert(
            account_id.to_string(),
            PooledConnection {
                session,
                last_used: Instant::now(),
            },
        );
    }

    /// Drop the pooled entry for an account, logging out politely.
    pub async fn close(&self, account_id: &str) {
        let entry = {
            let mut pool = self.connections.lock().await;
            pool.remove(account_id)
        };
        if let Some(mut entry) = entry {
            entry.session.logout().await.ok();
            info!("closed pooled connection for account {}", account_id);
        }
    }

    /// Log out and drop every pooled connection.
    pub async fn close_all(&self) {
        let entries: Vec<_> = {
            let mut pool = self.connections.lock().await;
            pool.drain().collect()
        };
        for (account_id, mut entry) in entries {
            entry.session.logout().await.ok();
            debug!("closed pooled connection for account {}", account_id);
        }
    }

    /// Number of pooled (checked-in) connections.
    pub async fn pooled_count(&self) -> usize {
        self.connections.lock().await.len()
    }
}

/// Open, authenticate, and immediately close a connection. Never
/// pooled.
///
/// # Errors
///
/// Returns the connect/auth failure unchanged.
pub async fn test_connection(config: &ImapConfig) -> Result<()> {
    let mut session = connect(config).await?;
    session.logout().await.ok();
    Ok(())
}

/// Certificate verifier that accepts all certificates. Used only when
/// `accept_invalid_certs` is set (self-signed bridges, test servers).
#[derive(Debug)]
struct DangerousVerifier;

impl rustls::client::danger::ServerCertVerifier for DangerousVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
