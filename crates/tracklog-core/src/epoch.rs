//! Background epoch detection.
//!
//! The worker reconciles epochs inline on every poll. [`EpochDetector`] runs
//! the same genesis check on its own, slower cadence for processes that want
//! chain-reset notifications independent of any single track.
//!
//! Notification is bounded: listeners are called synchronously in
//! registration order on a snapshot taken outside the lock, and channel
//! subscribers get a `try_send` on a fixed-capacity queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::QueryError;
use crate::metrics::{Metrics, NoopMetrics};
use crate::source::ChainSource;

/// Default interval between genesis checks.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Capacity of each subscriber queue.
pub const SUBSCRIBER_CAPACITY: usize = 16;

/// A detected change of chain identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochChange {
    pub old: i64,
    pub new: i64,
}

/// Callback invoked on every detected epoch change.
///
/// Runs on the detector's task; implementations should return quickly.
pub trait EpochListener: Send + Sync {
    fn on_epoch_change(&self, change: EpochChange);
}

impl<F> EpochListener for F
where
    F: Fn(EpochChange) + Send + Sync,
{
    fn on_epoch_change(&self, change: EpochChange) {
        self(change)
    }
}

#[derive(Default)]
struct DetectorState {
    /// 0 until the first successful check.
    current: i64,
    listeners: Vec<Arc<dyn EpochListener>>,
    subscribers: Vec<mpsc::Sender<EpochChange>>,
}

/// Watches the genesis block and reports chain resets.
pub struct EpochDetector {
    source: Arc<dyn ChainSource>,
    interval: Duration,
    metrics: Arc<dyn Metrics>,
    state: RwLock<DetectorState>,
}

impl EpochDetector {
    pub fn new(source: Arc<dyn ChainSource>) -> Self {
        Self {
            source,
            interval: DEFAULT_CHECK_INTERVAL,
            metrics: Arc::new(NoopMetrics),
            state: RwLock::new(DetectorState::default()),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Register a listener. Listeners fire in registration order.
    pub async fn add_listener(&self, listener: Arc<dyn EpochListener>) {
        self.state.write().await.listeners.push(listener);
    }

    /// Receive epoch changes on a bounded queue. Overflow drops the change.
    pub async fn subscribe(&self) -> mpsc::Receiver<EpochChange> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        self.state.write().await.subscribers.push(tx);
        rx
    }

    /// The last observed epoch, or 0 before the first successful check.
    pub async fn current_epoch(&self) -> i64 {
        self.state.read().await.current
    }

    /// Run one check. Returns the change, if any, after notifying observers.
    pub async fn check(&self, cancel: &CancellationToken) -> Result<Option<EpochChange>, QueryError> {
        let info = self.source.query_block_info(cancel).await?;
        let observed = info.epoch();

        let (change, listeners, subscribers) = {
            let mut state = self.state.write().await;
            if state.current == observed {
                return Ok(None);
            }
            let old = state.current;
            state.current = observed;
            if old == 0 {
                tracing::info!(epoch = observed, "initial epoch observed");
                return Ok(None);
            }
            state.subscribers.retain(|tx| !tx.is_closed());
            (
                EpochChange { old, new: observed },
                state.listeners.clone(),
                state.subscribers.clone(),
            )
        };

        tracing::warn!(old_epoch = change.old, new_epoch = change.new, "chain reset detected");
        self.metrics.epoch_changed(change.old, change.new);

        for listener in &listeners {
            listener.on_epoch_change(change);
        }
        for tx in &subscribers {
            if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(change) {
                tracing::warn!(new_epoch = change.new, "epoch subscriber lagging, change dropped");
            }
        }
        Ok(Some(change))
    }

    /// Check on every tick until `cancel` fires. Check failures are logged.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "epoch detector started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.check(&cancel).await {
                        Ok(_) => {}
                        Err(QueryError::Cancelled) => break,
                        Err(e) => tracing::warn!(error = %e, "epoch check failed"),
                    }
                }
            }
        }
        tracing::info!("epoch detector stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlockInfo, EventQuery, Genesis, Transaction};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns the queued genesis timestamps in order, repeating the last one.
    struct GenesisScript {
        epochs: Mutex<Vec<i64>>,
    }

    impl GenesisScript {
        fn new(epochs: &[i64]) -> Arc<Self> {
            let mut v = epochs.to_vec();
            v.reverse();
            Arc::new(Self { epochs: Mutex::new(v) })
        }
    }

    #[async_trait]
    impl ChainSource for GenesisScript {
        async fn query_block_info(&self, _: &CancellationToken) -> Result<BlockInfo, QueryError> {
            let mut v = self.epochs.lock().unwrap();
            let ts = if v.len() > 1 { v.pop().unwrap() } else { v[0] };
            Ok(BlockInfo {
                latest_height: 10,
                genesis: Genesis {
                    height: 1,
                    hash: "h".into(),
                    timestamp: ts,
                },
            })
        }

        async fn query_events(
            &self,
            _: &EventQuery,
            _: &CancellationToken,
        ) -> Result<Vec<Transaction>, QueryError> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn first_check_adopts_without_notifying() {
        let det = EpochDetector::new(GenesisScript::new(&[1000]));
        let cancel = CancellationToken::new();
        assert_eq!(det.current_epoch().await, 0);
        assert_eq!(det.check(&cancel).await.unwrap(), None);
        assert_eq!(det.current_epoch().await, 1000);
        assert_eq!(det.check(&cancel).await.unwrap(), None);
    }

    #[tokio::test]
    async fn listeners_fire_in_order_on_change() {
        let det = EpochDetector::new(GenesisScript::new(&[1000, 2000]));
        let seen = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second"] {
            let seen = Arc::clone(&seen);
            det.add_listener(Arc::new(move |c: EpochChange| {
                seen.lock().unwrap().push((name, c.old, c.new));
            }))
            .await;
        }
        let mut rx = det.subscribe().await;

        let cancel = CancellationToken::new();
        det.check(&cancel).await.unwrap();
        let change = det.check(&cancel).await.unwrap();

        assert_eq!(change, Some(EpochChange { old: 1000, new: 2000 }));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("first", 1000, 2000), ("second", 1000, 2000)]
        );
        assert_eq!(rx.try_recv().unwrap(), EpochChange { old: 1000, new: 2000 });
        assert_eq!(det.current_epoch().await, 2000);
    }

    #[tokio::test]
    async fn full_subscriber_does_not_block() {
        let mut epochs = vec![1];
        epochs.extend(2..=(SUBSCRIBER_CAPACITY as i64 + 3));
        let det = EpochDetector::new(GenesisScript::new(&epochs));
        let _rx = det.subscribe().await;
        let cancel = CancellationToken::new();
        for _ in 0..epochs.len() {
            det.check(&cancel).await.unwrap();
        }
        assert_eq!(det.current_epoch().await, *epochs.last().unwrap());
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let det = Arc::new(
            EpochDetector::new(GenesisScript::new(&[5])).with_interval(Duration::from_millis(5)),
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&det).run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(det.current_epoch().await, 5);
    }
}
