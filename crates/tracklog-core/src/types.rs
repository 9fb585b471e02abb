//! Shared types for the ingestion pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

// ─── Event ───────────────────────────────────────────────────────────────────

/// A single key/value attribute carried by an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attr {
    pub key: String,
    pub value: String,
}

impl Attr {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// One persisted event: the line format of the append log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Chain identity (genesis block timestamp) the event was observed under.
    pub epoch: i64,
    /// Unix timestamp (seconds) at which the event was ingested.
    pub timestamp: i64,
    /// Height of the block carrying the transaction.
    pub height: i64,
    /// Position of the transaction inside its block.
    pub tx_index: i64,
    pub event_type: String,
    pub pkg_path: String,
    #[serde(default)]
    pub attrs: Vec<Attr>,
}

impl Event {
    /// The validation gate every event passes before touching storage.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.epoch == 0 {
            return Err(StoreError::InvalidEvent { field: "epoch" });
        }
        if self.height == 0 {
            return Err(StoreError::InvalidEvent { field: "height" });
        }
        if self.event_type.is_empty() {
            return Err(StoreError::InvalidEvent { field: "event_type" });
        }
        if self.pkg_path.is_empty() {
            return Err(StoreError::InvalidEvent { field: "pkg_path" });
        }
        Ok(())
    }

    /// The transaction position this event belongs to.
    pub fn position(&self) -> Position {
        Position::new(self.height, self.tx_index)
    }
}

// ─── Position ────────────────────────────────────────────────────────────────

/// A `(height, tx_index)` pair, ordered lexicographically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub height: i64,
    pub tx_index: i64,
}

impl Position {
    pub const ZERO: Position = Position {
        height: 0,
        tx_index: 0,
    };

    pub fn new(height: i64, tx_index: i64) -> Self {
        Self { height, tx_index }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.height, self.tx_index)
    }
}

// ─── Source records ──────────────────────────────────────────────────────────

/// A raw event as delivered by the indexer, before epoch/position stamping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEvent {
    pub event_type: String,
    pub pkg_path: String,
    #[serde(default)]
    pub attrs: Vec<Attr>,
}

/// An ordered group of events sharing `(block_height, index)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub block_height: i64,
    /// Position of the transaction inside its block.
    pub index: i64,
    #[serde(default)]
    pub events: Vec<SourceEvent>,
}

impl Transaction {
    pub fn position(&self) -> Position {
        Position::new(self.block_height, self.index)
    }
}

// ─── BlockInfo ───────────────────────────────────────────────────────────────

/// Identity of the chain's first block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genesis {
    pub height: i64,
    pub hash: String,
    /// Unix timestamp of the genesis block; used as the epoch identity.
    pub timestamp: i64,
}

/// Chain head plus genesis identity, fetched in one round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub latest_height: i64,
    pub genesis: Genesis,
}

impl BlockInfo {
    /// The epoch this chain instance is identified by.
    pub fn epoch(&self) -> i64 {
        self.genesis.timestamp
    }
}

// ─── EventQuery ──────────────────────────────────────────────────────────────

/// Ephemeral per-poll filter: track selection plus the position range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventQuery {
    /// Package paths to match (empty = all packages).
    pub packages: Vec<String>,
    /// Event types to match (empty = all types).
    pub event_types: Vec<String>,
    /// Last processed position; only transactions strictly after it match.
    pub after: Position,
    /// Inclusive upper bound on block height.
    pub latest_height: i64,
}

impl EventQuery {
    /// The range predicate: `(after.height, latest]` or same height with a later index.
    pub fn matches_position(&self, height: i64, index: i64) -> bool {
        (height > self.after.height && height <= self.latest_height)
            || (height == self.after.height && index > self.after.tx_index)
    }

    /// Returns `true` if `pkg_path` passes the package filter.
    pub fn matches_package(&self, pkg_path: &str) -> bool {
        self.packages.is_empty() || self.packages.iter().any(|p| p == pkg_path)
    }

    /// Returns `true` if `event_type` passes the event-type filter.
    pub fn matches_event_type(&self, event_type: &str) -> bool {
        self.event_types.is_empty() || self.event_types.iter().any(|t| t == event_type)
    }

    /// Returns `true` if a source event passes both filters.
    pub fn matches_event(&self, event: &SourceEvent) -> bool {
        self.matches_package(&event.pkg_path) && self.matches_event_type(&event.event_type)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> Event {
        Event {
            epoch: 1000,
            timestamp: 1_700_000_000,
            height: 55,
            tx_index: 0,
            event_type: "Transfer".into(),
            pkg_path: "gno.land/r/demo/foo20".into(),
            attrs: vec![Attr::new("from", "g1abc")],
        }
    }

    #[test]
    fn valid_event_passes_gate() {
        assert!(event().validate().is_ok());
    }

    #[test]
    fn gate_names_missing_field() {
        let cases: [(fn(&mut Event), &str); 4] = [
            (|e: &mut Event| e.epoch = 0, "epoch"),
            (|e: &mut Event| e.height = 0, "height"),
            (|e: &mut Event| e.event_type.clear(), "event_type"),
            (|e: &mut Event| e.pkg_path.clear(), "pkg_path"),
        ];
        for (mutate, expected) in cases {
            let mut e = event();
            mutate(&mut e);
            match e.validate() {
                Err(StoreError::InvalidEvent { field }) => assert_eq!(field, expected),
                other => panic!("expected invalid {expected}, got {other:?}"),
            }
        }
    }

    #[test]
    fn position_orders_lexicographically() {
        assert!(Position::new(100, 5) < Position::new(100, 6));
        assert!(Position::new(100, 99) < Position::new(101, 0));
        assert_eq!(Position::default(), Position::ZERO);
    }

    #[test]
    fn range_predicate_matches_window() {
        let q = EventQuery {
            after: Position::new(100, 5),
            latest_height: 120,
            ..Default::default()
        };
        assert!(q.matches_position(100, 6));
        assert!(q.matches_position(101, 0));
        assert!(q.matches_position(120, 3));
        assert!(!q.matches_position(100, 5));
        assert!(!q.matches_position(100, 0));
        assert!(!q.matches_position(99, 9));
        assert!(!q.matches_position(121, 0));
    }

    #[test]
    fn empty_filters_match_everything() {
        let q = EventQuery::default();
        assert!(q.matches_package("gno.land/r/anything"));
        assert!(q.matches_event_type("Anything"));
    }

    #[test]
    fn event_line_format() {
        let line = serde_json::to_string(&event()).unwrap();
        assert_eq!(
            line,
            r#"{"epoch":1000,"timestamp":1700000000,"height":55,"tx_index":0,"event_type":"Transfer","pkg_path":"gno.land/r/demo/foo20","attrs":[{"key":"from","value":"g1abc"}]}"#
        );
    }
}
