//! IMAP connection configuration

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Transport security for the IMAP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    /// Implicit TLS from the first byte (usually port 993).
    Tls,
    /// Plaintext greeting, then a STARTTLS upgrade (usually port 143).
    StartTls,
    /// No encryption. Only sensible for local bridges and tests.
    None,
}

impl Security {
    fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tls" => Ok(Self::Tls),
            "starttls" => Ok(Self::StartTls),
            "none" => Ok(Self::None),
            other => Err(Error::Config(format!("unknown IMAP_SECURITY '{other}'"))),
        }
    }
}

/// IMAP connection configuration for one mail account.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub security: Security,
    /// Accept self-signed certificates (local bridges, test servers).
    pub accept_invalid_certs: bool,
    pub connect_timeout: Duration,
    pub auth_timeout: Duration,
    /// Pooled connections idle longer than this are reconnected on the
    /// next acquire.
    pub idle_timeout: Duration,
}

impl ImapConfig {
    /// Config with default timeouts (10s connect, 5s auth, 5min idle).
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
        security: Security,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            security,
            accept_invalid_certs: false,
            connect_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),
        }
    }

    /// Load IMAP configuration from environment variables.
    ///
    /// Reads from `.env` if present. Required variables:
    /// - `IMAP_USERNAME`
    /// - `IMAP_PASSWORD`
    ///
    /// Optional (with defaults):
    /// - `IMAP_HOST` (default: `127.0.0.1`)
    /// - `IMAP_PORT` (default: `993`)
    /// - `IMAP_SECURITY` (`tls` | `starttls` | `none`, default: `tls`)
    /// - `IMAP_ACCEPT_INVALID_CERTS` (default: `false`)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let security = match env::var("IMAP_SECURITY") {
            Ok(v) => Security::parse(&v)?,
            Err(_) => Security::Tls,
        };

        let mut config = Self::new(
            env::var("IMAP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            env::var("IMAP_PORT")
                .unwrap_or_else(|_| "993".to_string())
                .parse()
                .map_err(|e| Error::Config(format!("Invalid IMAP_PORT: {e}")))?,
            env::var("IMAP_USERNAME")
                .map_err(|_| Error::Config("IMAP_USERNAME not set".into()))?,
            env::var("IMAP_PASSWORD")
                .map_err(|_| Error::Config("IMAP_PASSWORD not set".into()))?,
            security,
        );
        config.accept_invalid_certs = env::var("IMAP_ACCEPT_INVALID_CERTS")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Ok(config)
    }
}

/// A mail account: an opaque caller-assigned id plus its connection
/// configuration. Immutable for the duration of a sync; the engine
/// never persists it.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: String,
    pub config: ImapConfig,
}

impl Account {
    #[must_use]
    pub fn new(id: impl Into<String>, config: ImapConfig) -> Self {
        Self {
            id: id.into(),
            config,
        }
    }
}
