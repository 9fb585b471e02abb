//! The writer seam between the worker and a storage backend.

use async_trait::async_trait;

use crate::checkpoint::TrackState;
use crate::error::StoreError;
use crate::types::{Event, Position};

/// All events of one transaction, validated and serialized up front.
///
/// Staging does no I/O; a batch that fails to stage never touches storage.
#[derive(Debug, Clone)]
pub struct TxBatch {
    epoch: i64,
    position: Position,
    lines: Vec<u8>,
    events: usize,
}

impl TxBatch {
    pub fn new(epoch: i64, position: Position) -> Self {
        Self {
            epoch,
            position,
            lines: Vec::new(),
            events: 0,
        }
    }

    /// Validate `event` and append its JSON line to the staged block.
    pub fn stage(&mut self, event: &Event) -> Result<(), StoreError> {
        event.validate()?;
        if event.epoch != self.epoch {
            return Err(StoreError::EpochMismatch {
                expected: self.epoch,
                actual: event.epoch,
            });
        }
        serde_json::to_writer(&mut self.lines, event)?;
        self.lines.push(b'\n');
        self.events += 1;
        Ok(())
    }

    pub fn epoch(&self) -> i64 {
        self.epoch
    }

    pub fn position(&self) -> Position {
        self.position
    }

    /// Number of staged events.
    pub fn len(&self) -> usize {
        self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events == 0
    }

    /// The newline-terminated JSON lines of every staged event.
    pub fn lines(&self) -> &[u8] {
        &self.lines
    }
}

/// Result of committing a [`TxBatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The batch was appended and the checkpoint advanced past it.
    Committed { events: usize },
    /// The checkpoint is already at or past the batch; nothing was written.
    Duplicate,
}

/// A per-track sink for validated events.
///
/// Implementations serialize concurrent callers internally, so a write racing
/// a close is safe.
#[async_trait]
pub trait EventWriter: Send + Sync {
    /// Write a single event and record it against the checkpoint.
    ///
    /// A track without an epoch adopts the event's; otherwise a different
    /// epoch is [`StoreError::EpochMismatch`]. Events behind the checkpoint
    /// are dropped, so the position never moves backward.
    async fn write(&self, event: &Event) -> Result<(), StoreError>;

    /// Append every event of a transaction and advance the checkpoint past it.
    async fn commit(&self, batch: TxBatch) -> Result<CommitOutcome, StoreError>;

    /// Adopt `epoch`, resetting the checkpoint and closing the current file
    /// when it changes. Returns `true` on change.
    async fn set_epoch(&self, epoch: i64) -> Result<bool, StoreError>;

    /// A copy of the current checkpoint.
    async fn state(&self) -> TrackState;

    /// Push buffered lines to storage and persist the checkpoint.
    async fn flush(&self) -> Result<(), StoreError>;

    /// Flush and release resources. Safe to call more than once.
    async fn close(&self) -> Result<(), StoreError>;
}
