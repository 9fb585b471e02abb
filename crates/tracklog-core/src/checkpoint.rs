//! Checkpoint store. Persists a track's position for crash recovery.
//!
//! A checkpoint stores the epoch and the last fully written transaction
//! `(height, tx_index)` of one track. On restart the worker resumes from it
//! rather than re-ingesting the chain from scratch.
//!
//! Saves are amortized: position updates persist every `auto_save_every`
//! recorded events, while epoch transitions persist immediately.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::fs::Storage;
use crate::types::Position;

/// Default number of recorded events between automatic saves.
pub const DEFAULT_AUTO_SAVE_EVERY: i64 = 100;

/// The persisted checkpoint of one track (`state.json`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrackState {
    pub track_id: String,
    pub epoch: i64,
    pub last_processed_height: i64,
    pub last_processed_tx: i64,
    pub events_recorded: i64,
    /// Unix timestamp of the last save.
    pub last_update: i64,
}

impl TrackState {
    pub fn new(track_id: impl Into<String>) -> Self {
        Self {
            track_id: track_id.into(),
            ..Default::default()
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.last_processed_height, self.last_processed_tx)
    }
}

/// Path of a track's checkpoint file under `base`.
pub fn state_path(base: &Path, track_id: &str) -> PathBuf {
    base.join(track_id).join("state").join("state.json")
}

/// Owns the checkpoint of a single track.
pub struct StateManager {
    storage: Arc<dyn Storage>,
    path: PathBuf,
    state: TrackState,
    auto_save_every: i64,
    /// `events_recorded` as of the last save or load.
    saved_events: i64,
}

impl StateManager {
    pub fn new(storage: Arc<dyn Storage>, base: impl AsRef<Path>, track_id: &str) -> Self {
        Self {
            storage,
            path: state_path(base.as_ref(), track_id),
            state: TrackState::new(track_id),
            auto_save_every: DEFAULT_AUTO_SAVE_EVERY,
            saved_events: 0,
        }
    }

    /// Override the amortized save interval (clamped to at least 1).
    pub fn with_auto_save_every(mut self, n: i64) -> Self {
        self.auto_save_every = n.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the state file if present. A missing file keeps the zero state.
    pub fn load(&mut self) -> Result<(), StoreError> {
        let bytes = match self.storage.read_file(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no checkpoint, starting fresh");
                return Ok(());
            }
            Err(e) => return Err(StoreError::io("read", &self.path, e)),
        };
        let mut loaded: TrackState = serde_json::from_slice(&bytes)?;
        if loaded.track_id.is_empty() {
            loaded.track_id = self.state.track_id.clone();
        }
        tracing::info!(
            track = %loaded.track_id,
            epoch = loaded.epoch,
            height = loaded.last_processed_height,
            tx_index = loaded.last_processed_tx,
            events = loaded.events_recorded,
            "loaded checkpoint"
        );
        self.saved_events = loaded.events_recorded;
        self.state = loaded;
        Ok(())
    }

    /// Stamp `last_update` and write the checkpoint. Safe to call repeatedly.
    pub fn save(&mut self) -> Result<(), StoreError> {
        self.state.last_update = chrono::Utc::now().timestamp();
        let json = serde_json::to_vec_pretty(&self.state)?;

        if let Some(dir) = self.path.parent() {
            self.storage
                .create_dir_all(dir)
                .map_err(|e| StoreError::io("create dir", dir, e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        self.storage
            .write_file(&tmp, &json)
            .map_err(|e| StoreError::io("write", &tmp, e))?;
        self.storage
            .rename(&tmp, &self.path)
            .map_err(|e| StoreError::io("rename", &self.path, e))?;
        self.saved_events = self.state.events_recorded;
        Ok(())
    }

    /// Adopt `epoch` if it differs from the stored one.
    ///
    /// A change resets position and counter and is saved immediately.
    pub fn set_epoch_if_needed(&mut self, epoch: i64) -> Result<bool, StoreError> {
        if self.state.epoch == epoch {
            return Ok(false);
        }
        tracing::info!(
            track = %self.state.track_id,
            old_epoch = self.state.epoch,
            new_epoch = epoch,
            "epoch changed, resetting checkpoint"
        );
        self.state.epoch = epoch;
        self.state.last_processed_height = 0;
        self.state.last_processed_tx = 0;
        self.state.events_recorded = 0;
        self.save()?;
        Ok(true)
    }

    /// Move the in-memory position; saves every `auto_save_every` recorded events.
    pub fn update_position(&mut self, height: i64, tx_index: i64) -> Result<(), StoreError> {
        self.state.last_processed_height = height;
        self.state.last_processed_tx = tx_index;
        if self.save_due() {
            self.save()?;
        }
        Ok(())
    }

    /// Whether the next [`update_position`](Self::update_position) saves:
    /// the counter has crossed an `auto_save_every` boundary since the last save.
    pub fn save_due(&self) -> bool {
        self.state.events_recorded / self.auto_save_every > self.saved_events / self.auto_save_every
    }

    pub fn increment_events_recorded(&mut self) {
        self.state.events_recorded += 1;
    }

    /// A copy of the current state.
    pub fn state(&self) -> TrackState {
        self.state.clone()
    }
}
