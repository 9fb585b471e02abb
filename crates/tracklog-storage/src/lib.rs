//! tracklog-storage: writer backends for tracklog.
//!
//! Backends (selected by [`StorageConfig`]):
//! - `disk`: JSONL files and `state.json` checkpoints on the local filesystem
//! - `memory`: the same layout on an in-memory filesystem (dry runs, tests)

pub mod jsonl;
pub mod track;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use tracklog_core::config::{StorageConfig, WriterTuning};
use tracklog_core::error::StoreError;
use tracklog_core::fs::{MemStorage, OsStorage, Storage};
use tracklog_core::metrics::Metrics;

pub use jsonl::JsonlWriter;
pub use track::TrackWriter;

/// A storage root that hands out one [`TrackWriter`] per track.
#[derive(Clone)]
pub struct Backend {
    storage: Arc<dyn Storage>,
    base: PathBuf,
    tuning: WriterTuning,
}

impl Backend {
    pub fn from_config(config: &StorageConfig, tuning: WriterTuning) -> Self {
        let storage: Arc<dyn Storage> = match config {
            StorageConfig::Disk { .. } => Arc::new(OsStorage),
            StorageConfig::Memory => Arc::new(MemStorage::new()),
        };
        Self {
            storage,
            base: config.base_path().to_path_buf(),
            tuning,
        }
    }

    /// A backend over an explicit storage capability.
    pub fn with_storage(storage: Arc<dyn Storage>, base: impl Into<PathBuf>, tuning: WriterTuning) -> Self {
        Self {
            storage,
            base: base.into(),
            tuning,
        }
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        Arc::clone(&self.storage)
    }

    /// Open the writer for `track_id`, loading its checkpoint.
    pub fn open_track(&self, track_id: &str, metrics: Arc<dyn Metrics>) -> Result<TrackWriter, StoreError> {
        let writer = TrackWriter::open(self.storage(), self.base.clone(), track_id, &self.tuning)?;
        Ok(writer.with_metrics(metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracklog_core::metrics::NoopMetrics;
    use tracklog_core::writer::EventWriter;

    #[tokio::test]
    async fn memory_backend_shares_storage_across_tracks() {
        let backend = Backend::from_config(&StorageConfig::Memory, WriterTuning::default());
        let a = backend.open_track("a", Arc::new(NoopMetrics)).unwrap();
        a.set_epoch(9).await.unwrap();
        a.close().await.unwrap();

        let again = backend.open_track("a", Arc::new(NoopMetrics)).unwrap();
        assert_eq!(again.state().await.epoch, 9);
        let b = backend.open_track("b", Arc::new(NoopMetrics)).unwrap();
        assert_eq!(b.state().await.epoch, 0);
    }

    #[tokio::test]
    async fn disk_backend_writes_under_path() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig::Disk {
            path: dir.path().to_path_buf(),
        };
        let backend = Backend::from_config(&config, WriterTuning::default());
        let w = backend.open_track("t", Arc::new(NoopMetrics)).unwrap();
        w.set_epoch(3).await.unwrap();
        assert!(dir.path().join("t/state/state.json").exists());
    }
}
