//! tracklog-core: foundation for the track ingestion pipeline.
//!
//! # Architecture
//!
//! ```text
//! TrackWorker (tracklog-gno)
//!     ├── ChainSource      (QueryBlockInfo / QueryEvents against the indexer)
//!     ├── epoch reconciliation (inline; EpochDetector for background checks)
//!     └── EventWriter      (tracklog-storage)
//!             ├── StateManager (checkpoint, crash recovery)
//!             └── JSONL append log over a Storage capability
//! ```

pub mod checkpoint;
pub mod config;
pub mod epoch;
pub mod error;
pub mod fs;
pub mod metrics;
pub mod source;
pub mod types;
pub mod writer;

pub use checkpoint::{StateManager, TrackState};
pub use config::{AppConfig, MetricsConfig, StorageConfig, TrackConfig, WriterTuning};
pub use epoch::{EpochChange, EpochDetector, EpochListener};
pub use error::{IndexerError, QueryError, StoreError};
pub use fs::{MemStorage, OsStorage, Storage};
pub use metrics::{Metrics, NoopMetrics, TracklogMetrics};
pub use source::ChainSource;
pub use types::{Attr, BlockInfo, Event, EventQuery, Genesis, Position, SourceEvent, Transaction};
pub use writer::{CommitOutcome, EventWriter, TxBatch};
