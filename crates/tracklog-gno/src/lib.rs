//! tracklog-gno: ingest Gno events from a GraphQL transaction indexer.
//!
//! - [`client::GnoClient`] queries block info and filtered transactions with retry
//! - [`worker::TrackWorker`] polls one track and commits its events in order
//! - [`builder::WorkerBuilder`] assembles worker configuration fluently

pub mod builder;
pub mod client;
pub mod filter;
pub mod retry;
pub mod transport;
pub mod worker;

pub use builder::WorkerBuilder;
pub use client::{ClientConfig, GnoClient};
pub use retry::{RetryConfig, RetryPolicy};
pub use transport::{GraphqlTransport, HttpTransport};
pub use worker::{PollOutcome, StopHandle, TrackWorker, WorkerConfig, WorkerState, WorkerStats};
