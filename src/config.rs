//! Server configuration loaded from `SLOTBOOK_*` environment variables,
//! optionally seeded from a `.env` file.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::limits::MAX_CONNECTIONS;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key}: cannot parse {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("SLOTBOOK_TLS_CERT and SLOTBOOK_TLS_KEY must be set together")]
    TlsPair,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Directory holding `slotbook.wal`.
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// Compact once this many events were appended since the last compaction.
    pub compact_threshold: u64,
    /// Pending appointments older than this are cancelled. `None` keeps them.
    pub pending_ttl: Option<Duration>,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub log_json: bool,
}

impl ServerConfig {
    /// Reads the process environment after loading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Unset keys take defaults; set
    /// but malformed numeric keys are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let tls_cert = lookup("SLOTBOOK_TLS_CERT");
        let tls_key = lookup("SLOTBOOK_TLS_KEY");
        if tls_cert.is_some() != tls_key.is_some() {
            return Err(ConfigError::TlsPair);
        }

        let ttl_secs: u64 = parse_env(&lookup, "SLOTBOOK_PENDING_TTL_SECS", 0)?;

        Ok(Self {
            bind: lookup("SLOTBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_env(&lookup, "SLOTBOOK_PORT", 5433)?,
            data_dir: lookup("SLOTBOOK_DATA_DIR").unwrap_or_else(|| "./data".into()).into(),
            password: lookup("SLOTBOOK_PASSWORD").unwrap_or_else(|| "slotbook".into()),
            max_connections: parse_env(&lookup, "SLOTBOOK_MAX_CONNECTIONS", MAX_CONNECTIONS)?,
            compact_threshold: parse_env(&lookup, "SLOTBOOK_COMPACT_THRESHOLD", 1000)?,
            pending_ttl: (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs)),
            metrics_port: parse_optional(&lookup, "SLOTBOOK_METRICS_PORT")?,
            tls_cert,
            tls_key,
            log_json: parse_env_bool(&lookup, "SLOTBOOK_LOG_JSON", false),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slotbook.wal")
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse_env<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError> {
    Ok(parse_optional(lookup, key)?.unwrap_or(default))
}

fn parse_optional<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

/// Accepts `true`/`1` and `false`/`0` in any case; anything else is the default.
fn parse_env_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    match lookup(key).map(|v| v.to_lowercase()).as_deref() {
        Some("true" | "1") => true,
        Some("false" | "0") => false,
        _ => default,
    }
}
