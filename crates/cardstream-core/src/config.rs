//! Configuration system for cardstream.
//!
//! Resolution order: environment variables → config file → defaults.
//! Command-line flags in the binaries override all three.
//!
//! Config file location:
//!   1. $CARDSTREAM_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/cardstream/config.toml
//!   3. ~/.config/cardstream/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CardstreamConfig {
    pub server: ServerSettings,
    pub client: ClientSettings,
    pub images: ImageSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to bind the QUIC endpoint on.
    pub bind_addr: String,
    pub port: u16,
    /// PEM certificate chain. Required to start the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<PathBuf>,
    /// PEM private key. Unset = the key is in the certificate file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<PathBuf>,
    /// Scryfall-style JSON card list.
    pub catalog_path: PathBuf,
    /// Whether random draws may return multi-faced cards (dual images).
    pub include_multiface_in_random: bool,
    /// Concurrent bidirectional streams a client may hold open.
    pub max_concurrent_streams: u32,
    /// Requests longer than this are answered with an error.
    pub max_request_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub host: String,
    pub port: u16,
    /// Per-batch deadline in seconds. 0 = wait forever.
    pub batch_timeout_secs: u64,
    /// How long to wait for a stream credit before giving up on the batch.
    pub stream_open_timeout_ms: u64,
    /// Where received faces are written as PNG. Unset = don't write.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSettings {
    /// User-Agent sent to the image host.
    pub user_agent: String,
    pub fetch_timeout_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: 9999,
            certificate: None,
            private_key: None,
            catalog_path: PathBuf::from("card_list.json"),
            include_multiface_in_random: true,
            max_concurrent_streams: 100,
            max_request_bytes: 1024,
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9999,
            batch_timeout_secs: 60,
            stream_open_timeout_ms: 5_000,
            output_dir: None,
        }
    }
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            user_agent: concat!("cardstream/", env!("CARGO_PKG_VERSION")).to_string(),
            fetch_timeout_secs: 30,
        }
    }
}

impl ClientSettings {
    /// Batch deadline, or None when disabled.
    pub fn batch_timeout(&self) -> Option<Duration> {
        (self.batch_timeout_secs > 0).then(|| Duration::from_secs(self.batch_timeout_secs))
    }

    pub fn stream_open_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_open_timeout_ms)
    }
}

impl ImageSettings {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("cardstream")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl CardstreamConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_file(&Self::file_path())?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Read a config file, falling back to defaults if it doesn't exist.
    pub fn load_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(CardstreamConfig::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CARDSTREAM_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&CardstreamConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply CARDSTREAM_* overrides. `lookup` is `std::env::var` outside tests.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("CARDSTREAM_SERVER__BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Some(p) = lookup("CARDSTREAM_SERVER__PORT").and_then(|v| v.parse().ok()) {
            self.server.port = p;
        }
        if let Some(v) = lookup("CARDSTREAM_SERVER__CATALOG_PATH") {
            self.server.catalog_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("CARDSTREAM_SERVER__CERTIFICATE") {
            self.server.certificate = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("CARDSTREAM_SERVER__PRIVATE_KEY") {
            self.server.private_key = Some(PathBuf::from(v));
        }
        if let Some(b) = lookup("CARDSTREAM_SERVER__INCLUDE_MULTIFACE_IN_RANDOM").and_then(|v| parse_flag(&v)) {
            self.server.include_multiface_in_random = b;
        }
        if let Some(n) = lookup("CARDSTREAM_SERVER__MAX_CONCURRENT_STREAMS").and_then(|v| v.parse().ok()) {
            self.server.max_concurrent_streams = n;
        }
        if let Some(n) = lookup("CARDSTREAM_SERVER__MAX_REQUEST_BYTES").and_then(|v| v.parse().ok()) {
            self.server.max_request_bytes = n;
        }
        if let Some(v) = lookup("CARDSTREAM_CLIENT__HOST") {
            self.client.host = v;
        }
        if let Some(p) = lookup("CARDSTREAM_CLIENT__PORT").and_then(|v| v.parse().ok()) {
            self.client.port = p;
        }
        if let Some(s) = lookup("CARDSTREAM_CLIENT__BATCH_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.client.batch_timeout_secs = s;
        }
        if let Some(ms) = lookup("CARDSTREAM_CLIENT__STREAM_OPEN_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.client.stream_open_timeout_ms = ms;
        }
        if let Some(v) = lookup("CARDSTREAM_CLIENT__OUTPUT_DIR") {
            self.client.output_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("CARDSTREAM_IMAGES__USER_AGENT") {
            self.images.user_agent = v;
        }
        if let Some(s) = lookup("CARDSTREAM_IMAGES__FETCH_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.images.fetch_timeout_secs = s;
        }
    }
}

/// Boolean env value. Unrecognised values are ignored like unparseable numbers.
fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
