//! Device identity configuration.
//!
//! Loads the device's identity (id, MAC, cloud serial number, stream URL,
//! default RTP port) from a JSON file. An unreadable or unparsable file is
//! fatal at startup — the daemon refuses to run with an unknown identity.
//!
//! ## Path resolution
//! 1. `--config <path>` CLI flag, or
//! 2. `KINNODE_CONFIG_PATH` env var, or
//! 3. `/etc/kinnode/config.json`
//!
//! A missing `device_id` field is not fatal: the id is derived from the
//! first MAC address under `/sys/class/net/`, falling back to a random
//! `device-<hex>` id.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde::Deserialize;

// ── Constants ───────────────────────────────────────────────

/// Environment variable overriding the config file path.
pub const ENV_CONFIG_PATH: &str = "KINNODE_CONFIG_PATH";

/// Default config file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/kinnode/config.json";

const DEFAULT_STREAM_URL: &str = "rtsp://127.0.0.1:8554/stream";
const DEFAULT_RTP_PORT: u16 = 5004;
const FALLBACK_MAC: &str = "00:00:00:00:00:00";

// ── Error type ──────────────────────────────────────────────

/// Errors from identity configuration loading. All fatal at startup.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file could not be read.
    Io { path: PathBuf, source: io::Error },
    /// Config file is not valid JSON of the expected shape.
    Parse { path: PathBuf, detail: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "cannot read config file {}: {source}", path.display())
            }
            Self::Parse { path, detail } => {
                write!(f, "cannot parse config file {}: {detail}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ── Device config ───────────────────────────────────────────

/// Device identity, read-only after load. Queried at registration and
/// stream-availability response time.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub device_id: String,
    pub mac_address: String,
    pub cloud_serial_number: String,
    pub stream_url: String,
    pub default_rtp_port: u16,
}

#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    device_id: Option<String>,
    #[serde(default)]
    mac_address: Option<String>,
    #[serde(default)]
    cloud_serial_number: Option<String>,
    #[serde(default)]
    stream_url: Option<String>,
    #[serde(default)]
    default_rtp_port: Option<u16>,
}

impl DeviceConfig {
    /// Resolve the config path: env var override, else the default.
    pub fn resolve_path() -> PathBuf {
        match std::env::var(ENV_CONFIG_PATH) {
            Ok(custom) if !custom.is_empty() => PathBuf::from(custom),
            _ => PathBuf::from(DEFAULT_CONFIG_PATH),
        }
    }

    /// Load identity from a JSON config file. Fatal on read/parse failure.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let raw: RawConfig = serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawConfig) -> Self {
        let mac_address = raw
            .mac_address
            .filter(|s| !s.is_empty())
            .or_else(read_first_mac)
            .unwrap_or_else(|| FALLBACK_MAC.to_string());
        // Empty device_id counts as absent.
        let device_id = match raw.device_id.filter(|s| !s.is_empty()) {
            Some(id) => id,
            None => generate_device_id(),
        };
        Self {
            device_id,
            mac_address,
            cloud_serial_number: raw.cloud_serial_number.unwrap_or_default(),
            stream_url: raw
                .stream_url
                .unwrap_or_else(|| DEFAULT_STREAM_URL.to_string()),
            default_rtp_port: raw.default_rtp_port.unwrap_or(DEFAULT_RTP_PORT),
        }
    }
}

// ── Device id generation ────────────────────────────────────

/// Derive a device id when the config omits one: first MAC address on the
/// system, else a random `device-<hex>` id.
fn generate_device_id() -> String {
    if let Some(mac) = read_first_mac() {
        return mac;
    }
    let n: u32 = rand::thread_rng().gen();
    format!("device-{n:08x}")
}

/// First MAC address under `/sys/class/net/`, skipping the loopback.
fn read_first_mac() -> Option<String> {
    let entries = fs::read_dir("/sys/class/net").ok()?;
    for entry in entries.flatten() {
        if entry.file_name() == "lo" {
            continue;
        }
        if let Ok(mac) = fs::read_to_string(entry.path().join("address")) {
            let mac = mac.trim();
            if !mac.is_empty() && mac != FALLBACK_MAC {
                return Some(mac.to_string());
            }
        }
    }
    None
}

// ── Tests ───────────────────────────────────────────────────
