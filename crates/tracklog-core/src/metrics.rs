//! Metrics handle passed explicitly to the client, worker and writer.
//!
//! Callers build one handle at startup and hand clones of the `Arc` to each
//! component. [`NoopMetrics`] is the default; [`TracklogMetrics`] records
//! OpenTelemetry counters that the installed `MeterProvider` exports.
//!
//! ## Counters
//! - `tracklog.polls`          tagged with track
//! - `tracklog.poll_errors`    tagged with track
//! - `tracklog.events_written` tagged with track
//! - `tracklog.query_retries`  tagged with attempt
//! - `tracklog.epoch_changes`

use opentelemetry::{
    metrics::{Counter, Meter},
    KeyValue,
};

/// Observation points of the ingestion pipeline.
pub trait Metrics: Send + Sync {
    fn poll_completed(&self, _track: &str, _events: usize) {}
    fn poll_failed(&self, _track: &str) {}
    fn events_written(&self, _track: &str, _count: usize) {}
    fn query_retried(&self, _attempt: u32) {}
    fn epoch_changed(&self, _old: i64, _new: i64) {}
}

/// Discards every observation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {}

/// OpenTelemetry counters for every observation point.
#[derive(Clone)]
pub struct TracklogMetrics {
    pub polls: Counter<u64>,
    pub poll_errors: Counter<u64>,
    pub events_written: Counter<u64>,
    pub query_retries: Counter<u64>,
    pub epoch_changes: Counter<u64>,
}

impl TracklogMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            polls: meter
                .u64_counter("tracklog.polls")
                .with_description("Completed poll cycles")
                .init(),
            poll_errors: meter
                .u64_counter("tracklog.poll_errors")
                .with_description("Poll cycles that ended in an error")
                .init(),
            events_written: meter
                .u64_counter("tracklog.events_written")
                .with_description("Events appended to a track log")
                .init(),
            query_retries: meter
                .u64_counter("tracklog.query_retries")
                .with_description("GraphQL requests retried after a transient failure")
                .init(),
            epoch_changes: meter
                .u64_counter("tracklog.epoch_changes")
                .with_description("Chain resets observed by a worker")
                .init(),
        }
    }
}

fn track_tag(track: &str) -> [KeyValue; 1] {
    [KeyValue::new("track", track.to_string())]
}

impl Metrics for TracklogMetrics {
    fn poll_completed(&self, track: &str, _events: usize) {
        self.polls.add(1, &track_tag(track));
    }

    fn poll_failed(&self, track: &str) {
        self.poll_errors.add(1, &track_tag(track));
    }

    fn events_written(&self, track: &str, count: usize) {
        self.events_written.add(count as u64, &track_tag(track));
    }

    fn query_retried(&self, attempt: u32) {
        self.query_retries
            .add(1, &[KeyValue::new("attempt", i64::from(attempt))]);
    }

    fn epoch_changed(&self, _old: i64, new: i64) {
        self.epoch_changes.add(1, &[KeyValue::new("epoch", new)]);
    }
}
