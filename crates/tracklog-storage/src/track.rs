//! `TrackWriter`: the checkpoint store and the append log of one track
//! behind a single mutex.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use tracklog_core::checkpoint::{StateManager, TrackState};
use tracklog_core::config::WriterTuning;
use tracklog_core::error::StoreError;
use tracklog_core::fs::Storage;
use tracklog_core::metrics::{Metrics, NoopMetrics};
use tracklog_core::types::Event;
use tracklog_core::writer::{CommitOutcome, EventWriter, TxBatch};

use crate::jsonl::{Clock, JsonlWriter};

struct Inner {
    state: StateManager,
    log: JsonlWriter,
}

impl Inner {
    fn adopt_epoch(&mut self, epoch: i64) -> Result<bool, StoreError> {
        let changed = self.state.set_epoch_if_needed(epoch)?;
        self.log.set_epoch(epoch)?;
        Ok(changed)
    }

    /// Count `event_count` events at `(height, tx_index)`. The log is flushed
    /// before any checkpoint save so the saved position never runs ahead of
    /// the lines in storage.
    fn record(&mut self, event_count: usize, height: i64, tx_index: i64) -> Result<(), StoreError> {
        if event_count == 0 {
            return self.state.update_position(height, tx_index);
        }
        for _ in 0..event_count {
            self.state.increment_events_recorded();
            if self.state.save_due() {
                self.log.flush()?;
            }
            self.state.update_position(height, tx_index)?;
        }
        Ok(())
    }
}

/// Durable writer for one track: JSONL log plus `state.json` checkpoint.
pub struct TrackWriter {
    track_id: String,
    metrics: Arc<dyn Metrics>,
    inner: Mutex<Inner>,
}

impl TrackWriter {
    /// Open a track under `base`, loading its checkpoint if one exists.
    pub fn open(
        storage: Arc<dyn Storage>,
        base: impl Into<PathBuf>,
        track_id: &str,
        tuning: &WriterTuning,
    ) -> Result<Self, StoreError> {
        Self::open_with_clock(storage, base, track_id, tuning, Arc::new(Utc::now))
    }

    /// Like [`open`](Self::open), partitioning log files by `clock`'s hour.
    pub fn open_with_clock(
        storage: Arc<dyn Storage>,
        base: impl Into<PathBuf>,
        track_id: &str,
        tuning: &WriterTuning,
        clock: Clock,
    ) -> Result<Self, StoreError> {
        let base = base.into();
        let mut state = StateManager::new(Arc::clone(&storage), &base, track_id)
            .with_auto_save_every(tuning.auto_save_every);
        state.load()?;

        let mut log = JsonlWriter::new(storage, base, track_id)
            .with_tuning(tuning)
            .with_clock(clock);
        log.set_epoch(state.state().epoch)?;

        Ok(Self {
            track_id: track_id.to_string(),
            metrics: Arc::new(NoopMetrics),
            inner: Mutex::new(Inner { state, log }),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    /// Path of the currently open log file, if any.
    pub async fn current_log_path(&self) -> Option<PathBuf> {
        self.inner.lock().await.log.current_path().map(|p| p.to_path_buf())
    }
}

#[async_trait]
impl EventWriter for TrackWriter {
    async fn write(&self, event: &Event) -> Result<(), StoreError> {
        event.validate()?;
        let mut inner = self.inner.lock().await;
        let state = inner.state.state();
        if state.epoch == 0 {
            inner.adopt_epoch(event.epoch)?;
        } else if event.epoch != state.epoch {
            return Err(StoreError::EpochMismatch {
                expected: state.epoch,
                actual: event.epoch,
            });
        }

        let pos = event.position();
        let at = inner.state.state().position();
        if pos < at {
            tracing::debug!(
                track = %self.track_id,
                height = pos.height,
                tx_index = pos.tx_index,
                "skipping event behind checkpoint"
            );
            return Ok(());
        }
        inner.log.write(event)?;
        inner.record(1, pos.height, pos.tx_index)?;
        drop(inner);

        self.metrics.events_written(&self.track_id, 1);
        Ok(())
    }

    async fn commit(&self, batch: TxBatch) -> Result<CommitOutcome, StoreError> {
        let mut inner = self.inner.lock().await;
        let state = inner.state.state();
        if batch.epoch() != state.epoch {
            return Err(StoreError::EpochMismatch {
                expected: state.epoch,
                actual: batch.epoch(),
            });
        }
        let pos = batch.position();
        if pos <= state.position() {
            tracing::debug!(
                track = %self.track_id,
                height = pos.height,
                tx_index = pos.tx_index,
                "skipping already committed transaction"
            );
            return Ok(CommitOutcome::Duplicate);
        }

        inner.log.append(batch.lines(), batch.len())?;
        inner.record(batch.len(), pos.height, pos.tx_index)?;
        drop(inner);

        if !batch.is_empty() {
            self.metrics.events_written(&self.track_id, batch.len());
        }
        Ok(CommitOutcome::Committed {
            events: batch.len(),
        })
    }

    async fn set_epoch(&self, epoch: i64) -> Result<bool, StoreError> {
        self.inner.lock().await.adopt_epoch(epoch)
    }

    async fn state(&self) -> TrackState {
        self.inner.lock().await.state.state()
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.log.flush()?;
        inner.state.save()
    }

    async fn close(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.log.close()?;
        inner.state.save()?;
        tracing::info!(track = %self.track_id, "writer closed");
        Ok(())
    }
}
