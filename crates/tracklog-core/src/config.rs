//! TOML configuration: endpoint, logging, storage backend and tracks.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::checkpoint::DEFAULT_AUTO_SAVE_EVERY;

/// Poll interval used when a track sets `interval_seconds <= 0`.
pub const DEFAULT_TRACK_INTERVAL_SECS: i64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Log level per component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per component: crate name → level
    #[serde(default)]
    pub components: BTreeMap<String, String>,
    /// Emit JSON structured logs (true) or human-readable text (false)
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: BTreeMap::new(),
            json: false,
        }
    }
}

/// Which writer backs the tracks. Exactly one kind is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// JSONL files and checkpoints under `path`.
    Disk { path: PathBuf },
    /// Same layout on an in-memory filesystem; nothing survives the process.
    Memory,
}

impl StorageConfig {
    /// Root directory of the on-disk layout (`/` for memory).
    pub fn base_path(&self) -> &Path {
        match self {
            Self::Disk { path } => path,
            Self::Memory => Path::new("/"),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Disk {
            path: PathBuf::from("./data"),
        }
    }
}

/// Flush and checkpoint cadence of the append log writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterTuning {
    /// Flush after this many unflushed events.
    #[serde(default = "default_flush_size")]
    pub flush_size: usize,
    /// Flush when the last flush is older than this.
    #[serde(default = "default_flush_interval_seconds")]
    pub flush_interval_seconds: u64,
    /// Save the checkpoint every N recorded events.
    #[serde(default = "default_auto_save_every")]
    pub auto_save_every: i64,
}

fn default_flush_size() -> usize {
    100
}

fn default_flush_interval_seconds() -> u64 {
    5
}

fn default_auto_save_every() -> i64 {
    DEFAULT_AUTO_SAVE_EVERY
}

impl WriterTuning {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_seconds)
    }
}

impl Default for WriterTuning {
    fn default() -> Self {
        Self {
            flush_size: default_flush_size(),
            flush_interval_seconds: default_flush_interval_seconds(),
            auto_save_every: default_auto_save_every(),
        }
    }
}

/// Where counters are exported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// OTLP gRPC endpoint (e.g. "http://localhost:4317"). Counters are
    /// recorded but not exported when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otlp_endpoint: Option<String>,
    #[serde(default = "default_export_interval_seconds")]
    pub export_interval_seconds: u64,
}

fn default_export_interval_seconds() -> u64 {
    60
}

impl MetricsConfig {
    pub fn export_interval(&self) -> Duration {
        Duration::from_secs(self.export_interval_seconds.max(1))
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            export_interval_seconds: default_export_interval_seconds(),
        }
    }
}

/// One independently checkpointed ingestion lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackConfig {
    pub id: String,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub event_filter: Vec<String>,
    #[serde(default)]
    pub interval_seconds: i64,
}

impl TrackConfig {
    /// The poll interval, falling back to 10s when unset or non-positive.
    pub fn interval(&self) -> Duration {
        let secs = if self.interval_seconds <= 0 {
            DEFAULT_TRACK_INTERVAL_SECS
        } else {
            self.interval_seconds
        };
        Duration::from_secs(secs as u64)
    }
}

/// The whole configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// GraphQL endpoint of the remote indexer.
    pub endpoint: String,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Interval of the background epoch detector; 0 disables it.
    #[serde(default = "default_epoch_check_seconds")]
    pub epoch_check_seconds: u64,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub writer: WriterTuning,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub tracks: Vec<TrackConfig>,
}

fn default_request_timeout_seconds() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_epoch_check_seconds() -> u64 {
    30
}

impl AppConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("endpoint is empty".into()));
        }
        if self.tracks.is_empty() {
            return Err(ConfigError::Invalid("no tracks configured".into()));
        }
        let mut seen = HashSet::new();
        for track in &self.tracks {
            if track.id.is_empty() {
                return Err(ConfigError::Invalid("track with empty id".into()));
            }
            if track.id.contains(['/', '\\']) || track.id == "." || track.id == ".." {
                return Err(ConfigError::Invalid(format!(
                    "track id {:?} is not a valid directory name",
                    track.id
                )));
            }
            if !seen.insert(track.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate track id {:?}", track.id)));
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn track(&self, id: &str) -> Option<&TrackConfig> {
        self.tracks.iter().find(|t| t.id == id)
    }
}
