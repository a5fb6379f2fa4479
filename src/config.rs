//! Runtime configuration for sessions, the sync↔async bridge, and logging.
//!
//! Concrete transport wiring (URLs, subprocess commands, ...) belongs to
//! the transport the caller plugs in, not to this crate — see spec.md §1.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Protocol versions this build of the core negotiates, newest first.
/// The handshake picks the highest version both peers support
/// (spec.md §4.5).
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2024-11-05"];

/// Session- and bridge-tuning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Default per-call deadline for outbound requests (spec.md §4.6).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Size of the bounded worker pool the sync↔async bridge (C4) uses
    /// for blocking handlers when `immediate_execution` is not set. This
    /// caps concurrent in-flight calls to each handler registered through
    /// `bridge::from_sync` independently, not the crate's total blocking
    /// concurrency across every registered handler.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Initial `tracing` level filter, overridable per-session via
    /// `logging/setLevel` (spec.md §4.5).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Protocol version this side offers during the handshake.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            worker_pool_size: default_worker_pool_size(),
            log_level: default_log_level(),
            protocol_version: default_protocol_version(),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    20
}

fn default_worker_pool_size() -> usize {
    16
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_protocol_version() -> String {
    SUPPORTED_PROTOCOL_VERSIONS[0].to_string()
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_secs == 0 {
            return Err(Error::config("request_timeout_secs must be non-zero"));
        }
        if self.worker_pool_size == 0 {
            return Err(Error::config("worker_pool_size must be non-zero"));
        }
        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&self.protocol_version.as_str()) {
            return Err(Error::config(format!(
                "unsupported protocol_version: {}",
                self.protocol_version
            )));
        }
        Ok(())
    }

    /// Load configuration from a JSON file, mirroring the teacher's
    /// `Mcp::from_file` loader.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read_to_string(&path)
            .map_err(|e| Error::config(format!("failed to read config file: {}", e)))?;
        let config: Config = serde_json::from_str(&data)
            .map_err(|e| Error::config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// The highest protocol version both sides support, or an error if
    /// there is no overlap (spec.md §4.5's handshake negotiation rule).
    pub fn negotiate(&self, peer_versions: &[String]) -> Result<String> {
        SUPPORTED_PROTOCOL_VERSIONS
            .iter()
            .find(|v| peer_versions.iter().any(|p| p == *v))
            .map(|v| v.to_string())
            .ok_or_else(|| {
                Error::protocol(format!(
                    "no overlapping protocol version: offered {:?}, peer supports {:?}",
                    SUPPORTED_PROTOCOL_VERSIONS, peer_versions
                ))
            })
    }
}
