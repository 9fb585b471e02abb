//! The `ChainSource` trait: what the worker and epoch detector need from
//! the remote indexer.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::QueryError;
use crate::types::{BlockInfo, EventQuery, Transaction};

/// Read access to the remote indexer.
///
/// Calls block the calling task but return [`QueryError::Cancelled`] promptly
/// once `cancel` fires, including while sleeping between retries.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Latest block height plus the genesis block, in one round-trip.
    async fn query_block_info(&self, cancel: &CancellationToken) -> Result<BlockInfo, QueryError>;

    /// Transactions matching `query`, ordered by `(height, index)` ascending.
    async fn query_events(
        &self,
        query: &EventQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<Transaction>, QueryError>;
}
