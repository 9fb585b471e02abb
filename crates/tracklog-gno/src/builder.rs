//! Fluent builder API for track workers.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tracklog_gno::WorkerBuilder;
//!
//! let config = WorkerBuilder::new()
//!     .track("boards")
//!     .package("gno.land/r/demo/boards")
//!     .event_type("PostCreated")
//!     .interval(Duration::from_secs(3))
//!     .build_config();
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracklog_core::config::TrackConfig;
use tracklog_core::metrics::{Metrics, NoopMetrics};
use tracklog_core::source::ChainSource;
use tracklog_core::writer::EventWriter;

use crate::worker::{TrackWorker, WorkerConfig};

/// Fluent builder for `WorkerConfig` and `TrackWorker`.
pub struct WorkerBuilder {
    config: WorkerConfig,
    metrics: Arc<dyn Metrics>,
}

impl Default for WorkerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerBuilder {
    pub fn new() -> Self {
        Self {
            config: WorkerConfig::default(),
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Start from a track entry of the config file.
    pub fn from_track(track: &TrackConfig) -> Self {
        Self {
            config: WorkerConfig::from_track(track),
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Set the track ID (names the checkpoint and log directories).
    pub fn track(mut self, id: impl Into<String>) -> Self {
        self.config.track_id = id.into();
        self
    }

    /// Match events emitted by this package. Repeat to match several.
    pub fn package(mut self, pkg_path: impl Into<String>) -> Self {
        self.config.packages.push(pkg_path.into());
        self
    }

    /// Match events of this type. Repeat to match several.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.config.event_types.push(event_type.into());
        self
    }

    /// Set the polling interval. Zero falls back to the default.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = if interval.is_zero() {
            crate::worker::DEFAULT_POLL_INTERVAL
        } else {
            interval
        };
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Build the `WorkerConfig`.
    pub fn build_config(self) -> WorkerConfig {
        self.config
    }

    /// Build a worker reading from `source` and writing to `writer`.
    pub fn build(self, source: Arc<dyn ChainSource>, writer: Arc<dyn EventWriter>) -> TrackWorker {
        TrackWorker::new(self.config, source, writer).with_metrics(self.metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::DEFAULT_POLL_INTERVAL;

    #[test]
    fn builder_defaults() {
        let cfg = WorkerBuilder::new().build_config();
        assert_eq!(cfg.track_id, "default");
        assert!(cfg.packages.is_empty());
        assert_eq!(cfg.interval, DEFAULT_POLL_INTERVAL);
    }

    #[test]
    fn builder_custom() {
        let cfg = WorkerBuilder::new()
            .track("tokens")
            .package("gno.land/r/demo/foo20")
            .package("gno.land/r/demo/bar20")
            .event_type("Transfer")
            .interval(Duration::from_secs(2))
            .build_config();

        assert_eq!(cfg.track_id, "tokens");
        assert_eq!(cfg.packages.len(), 2);
        assert_eq!(cfg.event_types, vec!["Transfer".to_string()]);
        assert_eq!(cfg.interval, Duration::from_secs(2));
    }

    #[test]
    fn zero_interval_uses_default() {
        let cfg = WorkerBuilder::new().interval(Duration::ZERO).build_config();
        assert_eq!(cfg.interval, DEFAULT_POLL_INTERVAL);
    }
}
