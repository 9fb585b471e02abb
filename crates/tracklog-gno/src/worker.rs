//! The track worker: one polling loop per track.
//!
//! Each poll:
//!   - Fetches the latest height and the genesis block
//!   - Reconciles the epoch with the writer (adopt, or reset on chain restart)
//!   - Returns early when the checkpoint already covers the latest height
//!   - Queries matching transactions after the checkpoint
//!   - Commits each transaction as one batch, in order, aborting on error
//!
//! Poll failures are logged and the loop carries on at the next tick.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use tracklog_core::config::TrackConfig;
use tracklog_core::error::IndexerError;
use tracklog_core::metrics::{Metrics, NoopMetrics};
use tracklog_core::source::ChainSource;
use tracklog_core::types::{Event, EventQuery, Position, Transaction};
use tracklog_core::writer::{CommitOutcome, EventWriter, TxBatch};

/// Poll interval when none is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// What a worker ingests and how often.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub track_id: String,
    /// Package paths to match (empty = all).
    pub packages: Vec<String>,
    /// Event types to match (empty = all).
    pub event_types: Vec<String>,
    pub interval: Duration,
}

impl WorkerConfig {
    pub fn from_track(track: &TrackConfig) -> Self {
        Self {
            track_id: track.id.clone(),
            packages: track.packages.clone(),
            event_types: track.event_filter.clone(),
            interval: track.interval(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            track_id: "default".into(),
            packages: vec![],
            event_types: vec![],
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Lifecycle of a worker.
///
/// `Running` and `Stopped` are the states of [`TrackWorker::run`]; `Idle`
/// only marks a worker that has been built but never run. Once stopped a
/// worker stays `Stopped` until `run` is called again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Built, `run` not yet called.
    Idle,
    /// Inside `run`.
    Running,
    /// `run` has returned.
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Result of one successful poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The checkpoint already covers `latest_height`; nothing was queried.
    CaughtUp { latest_height: i64 },
    Ingested {
        transactions: usize,
        events: usize,
        /// Transactions the writer had already committed.
        duplicates: usize,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub polls: u64,
    pub failed_polls: u64,
    pub events_processed: u64,
    pub last_update: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Stops a running worker from another task.
#[derive(Debug, Clone)]
pub struct StopHandle(CancellationToken);

impl StopHandle {
    pub fn stop(&self) {
        self.0.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.0.is_cancelled()
    }
}

pub struct TrackWorker {
    config: WorkerConfig,
    source: Arc<dyn ChainSource>,
    writer: Arc<dyn EventWriter>,
    metrics: Arc<dyn Metrics>,
    stop: CancellationToken,
    state: WorkerState,
    stats: WorkerStats,
}

impl TrackWorker {
    pub fn new(config: WorkerConfig, source: Arc<dyn ChainSource>, writer: Arc<dyn EventWriter>) -> Self {
        Self {
            config,
            source,
            writer,
            metrics: Arc::new(NoopMetrics),
            stop: CancellationToken::new(),
            state: WorkerState::Idle,
            stats: WorkerStats::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn track_id(&self) -> &str {
        &self.config.track_id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.stop.clone())
    }

    /// Ask a running worker to return after its current poll step.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Poll immediately, then every `interval`, until `cancel` fires or the
    /// worker is stopped. Flushes the writer on the way out.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), IndexerError> {
        self.state = WorkerState::Running;
        let stop = self.stop.clone();
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            track = %self.config.track_id,
            interval_ms = self.config.interval.as_millis() as u64,
            packages = ?self.config.packages,
            event_types = ?self.config.event_types,
            "track worker started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let polled = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                r = self.poll(&cancel) => r,
            };

            match polled {
                Ok(outcome) => {
                    let events = match outcome {
                        PollOutcome::Ingested { events, .. } => events,
                        PollOutcome::CaughtUp { .. } => 0,
                    };
                    self.metrics.poll_completed(&self.config.track_id, events);
                }
                Err(e) if e.is_cancelled() => break,
                Err(e) => {
                    tracing::warn!(track = %self.config.track_id, error = %e, "poll failed");
                    self.stats.failed_polls += 1;
                    self.stats.last_error = Some(e.to_string());
                    self.metrics.poll_failed(&self.config.track_id);
                }
            }
        }

        self.state = WorkerState::Stopped;
        let flushed = self.writer.flush().await.map_err(IndexerError::Flush);
        tracing::info!(
            track = %self.config.track_id,
            events = self.stats.events_processed,
            "track worker stopped"
        );
        flushed
    }

    /// Run one poll cycle.
    pub async fn poll(&mut self, cancel: &CancellationToken) -> Result<PollOutcome, IndexerError> {
        self.stats.polls += 1;
        let info = self
            .source
            .query_block_info(cancel)
            .await
            .map_err(IndexerError::BlockInfo)?;
        let epoch = info.epoch();

        let checkpoint = self.writer.state().await;
        let after = if checkpoint.epoch == epoch {
            checkpoint.position()
        } else {
            if checkpoint.epoch == 0 {
                tracing::info!(track = %self.config.track_id, epoch, "adopting chain epoch");
            } else {
                tracing::warn!(
                    track = %self.config.track_id,
                    old_epoch = checkpoint.epoch,
                    new_epoch = epoch,
                    "chain reset detected, restarting from genesis"
                );
                self.metrics.epoch_changed(checkpoint.epoch, epoch);
            }
            self.writer
                .set_epoch(epoch)
                .await
                .map_err(|source| IndexerError::Epoch { epoch, source })?;
            Position::ZERO
        };

        if after.height >= info.latest_height {
            tracing::trace!(
                track = %self.config.track_id,
                at = %after,
                latest = info.latest_height,
                "caught up"
            );
            return Ok(PollOutcome::CaughtUp {
                latest_height: info.latest_height,
            });
        }

        let query = EventQuery {
            packages: self.config.packages.clone(),
            event_types: self.config.event_types.clone(),
            after,
            latest_height: info.latest_height,
        };
        let txs = self
            .source
            .query_events(&query, cancel)
            .await
            .map_err(|source| IndexerError::Events {
                height: after.height,
                tx_index: after.tx_index,
                source,
            })?;

        let mut events = 0;
        let mut duplicates = 0;
        for tx in &txs {
            match self.commit(epoch, tx).await? {
                CommitOutcome::Committed { events: n } => events += n,
                CommitOutcome::Duplicate => duplicates += 1,
            }
        }

        if events > 0 {
            self.stats.events_processed += events as u64;
            self.stats.last_update = Some(Utc::now());
            self.writer.flush().await.map_err(IndexerError::Flush)?;
        }

        tracing::debug!(
            track = %self.config.track_id,
            after = %after,
            latest = info.latest_height,
            transactions = txs.len(),
            events,
            duplicates,
            "poll complete"
        );
        Ok(PollOutcome::Ingested {
            transactions: txs.len(),
            events,
            duplicates,
        })
    }

    async fn commit(&self, epoch: i64, tx: &Transaction) -> Result<CommitOutcome, IndexerError> {
        let pos = tx.position();
        let write_err = |source| IndexerError::Write {
            height: pos.height,
            tx_index: pos.tx_index,
            source,
        };

        let timestamp = Utc::now().timestamp();
        let mut batch = TxBatch::new(epoch, pos);
        for ev in &tx.events {
            let event = Event {
                epoch,
                timestamp,
                height: tx.block_height,
                tx_index: tx.index,
                event_type: ev.event_type.clone(),
                pkg_path: ev.pkg_path.clone(),
                attrs: ev.attrs.clone(),
            };
            batch.stage(&event).map_err(write_err)?;
        }
        self.writer.commit(batch).await.map_err(write_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_track() {
        let track = TrackConfig {
            id: "boards".into(),
            packages: vec!["gno.land/r/demo/boards".into()],
            event_filter: vec!["PostCreated".into()],
            interval_seconds: 0,
        };
        let cfg = WorkerConfig::from_track(&track);
        assert_eq!(cfg.track_id, "boards");
        assert_eq!(cfg.event_types, vec!["PostCreated".to_string()]);
        assert_eq!(cfg.interval, Duration::from_secs(10));
    }

    #[test]
    fn stop_handle_is_shared() {
        let cfg = WorkerConfig::default();
        assert_eq!(cfg.interval, DEFAULT_POLL_INTERVAL);
        let token = CancellationToken::new();
        let handle = StopHandle(token.clone());
        handle.stop();
        assert!(token.is_cancelled());
        assert!(handle.is_stopped());
    }
}
