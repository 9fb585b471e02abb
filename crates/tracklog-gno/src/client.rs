//! GraphQL query client for a Gno transaction indexer.
//!
//! Features:
//! - Linear backoff retry for transport errors, 5xx and 429
//! - Cancellation honored between attempts and during backoff sleeps
//! - `errors` arrays in the response envelope fail immediately
//! - Client-side re-check of the range and event filters

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use tracklog_core::error::QueryError;
use tracklog_core::metrics::{Metrics, NoopMetrics};
use tracklog_core::source::ChainSource;
use tracklog_core::types::{Attr, BlockInfo, EventQuery, Genesis, SourceEvent, Transaction};

use crate::filter::build_where;
use crate::retry::{RetryConfig, RetryPolicy};
use crate::transport::{GraphqlRequest, GraphqlResponse, GraphqlTransport, HttpReply, HttpTransport};

/// Configuration for [`GnoClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub retry: RetryConfig,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Query client over any [`GraphqlTransport`].
pub struct GnoClient<T = HttpTransport> {
    transport: T,
    retry: RetryPolicy,
    metrics: Arc<dyn Metrics>,
}

impl GnoClient<HttpTransport> {
    /// Client for an HTTP endpoint.
    pub fn http(url: impl Into<String>, config: ClientConfig) -> Result<Self, QueryError> {
        let transport = HttpTransport::new(url, config.request_timeout)?;
        Ok(Self::new(transport, config.retry))
    }
}

impl<T: GraphqlTransport> GnoClient<T> {
    pub fn new(transport: T, retry: RetryConfig) -> Self {
        Self {
            transport,
            retry: RetryPolicy::new(retry),
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn url(&self) -> &str {
        self.transport.url()
    }

    /// Run `req` under the retry policy and decode its `data`.
    pub async fn execute<D: DeserializeOwned>(
        &self,
        req: &GraphqlRequest,
        cancel: &CancellationToken,
    ) -> Result<D, QueryError> {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(QueryError::Cancelled);
            }
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(QueryError::Cancelled),
                r = self.send_once::<D>(req) => r,
            };
            match result {
                Ok(data) => return Ok(data),
                Err(e) if e.is_retryable() => {
                    attempt += 1;
                    match self.retry.next_delay(attempt) {
                        Some(delay) => {
                            tracing::warn!(
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %e,
                                url = %self.url(),
                                "retrying query"
                            );
                            self.metrics.query_retried(attempt);
                            tokio::select! {
                                _ = cancel.cancelled() => return Err(QueryError::Cancelled),
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                        None => {
                            tracing::error!(
                                attempts = attempt,
                                error = %e,
                                url = %self.url(),
                                "max retries exceeded"
                            );
                            return Err(QueryError::RetriesExhausted {
                                attempts: attempt,
                                last: Box::new(e),
                            });
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once<D: DeserializeOwned>(&self, req: &GraphqlRequest) -> Result<D, QueryError> {
        let reply = self.transport.post(req).await?;
        decode_reply(reply)
    }
}

/// Classify one HTTP reply. A non-empty `errors` array wins over the status.
fn decode_reply<D: DeserializeOwned>(reply: HttpReply) -> Result<D, QueryError> {
    let envelope = serde_json::from_str::<GraphqlResponse<D>>(&reply.body);

    if let Ok(env) = &envelope {
        if !env.errors.is_empty() {
            return Err(QueryError::Graphql(
                env.errors.iter().map(|e| e.message.clone()).collect(),
            ));
        }
    }
    if !reply.is_success() {
        return Err(QueryError::Status {
            status: reply.status,
            body: reply.body,
        });
    }
    envelope
        .map_err(|e| QueryError::Decode(e.to_string()))?
        .data
        .ok_or_else(|| QueryError::Decode("response has no data".into()))
}

// ─── Queries ─────────────────────────────────────────────────────────────────

const BLOCK_INFO_QUERY: &str = "query BlockInfo {
  latestBlockHeight
  getBlocks(where: { height: { eq: 1 } }) {
    height
    hash
    time
  }
}";

fn events_query(query: &EventQuery) -> String {
    format!(
        "query Events {{
  getTransactions(
    where: {where_clause}
    order: {{ heightAndIndex: ASC }}
  ) {{
    index
    block_height
    response {{
      events {{
        ... on GnoEvent {{
          type
          pkg_path
          attrs {{
            key
            value
          }}
        }}
      }}
    }}
  }}
}}",
        where_clause = build_where(query)
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockInfoData {
    latest_block_height: i64,
    get_blocks: Vec<RawBlock>,
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    height: i64,
    hash: String,
    time: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventsData {
    get_transactions: Vec<RawTransaction>,
}

#[derive(Debug, Deserialize)]
struct RawTransaction {
    index: i64,
    block_height: i64,
    #[serde(default)]
    response: Option<RawResponse>,
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(default)]
    events: Vec<RawEvent>,
}

/// Non-`GnoEvent` members of the union decode with every field absent.
#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: Option<String>,
    pkg_path: Option<String>,
    #[serde(default)]
    attrs: Option<Vec<Attr>>,
}

impl RawEvent {
    fn into_source(self) -> Option<SourceEvent> {
        Some(SourceEvent {
            event_type: self.event_type?,
            pkg_path: self.pkg_path?,
            attrs: self.attrs.unwrap_or_default(),
        })
    }
}

fn genesis_from(block: RawBlock) -> Result<Genesis, QueryError> {
    let time = DateTime::parse_from_rfc3339(&block.time)
        .map_err(|e| QueryError::Decode(format!("genesis time {:?}: {e}", block.time)))?;
    Ok(Genesis {
        height: block.height,
        hash: block.hash,
        timestamp: time.timestamp(),
    })
}

/// Keep in-range transactions and their matching events, in position order.
fn collect_transactions(query: &EventQuery, raw: Vec<RawTransaction>) -> Vec<Transaction> {
    let mut out: Vec<Transaction> = raw
        .into_iter()
        .filter(|tx| {
            let keep = query.matches_position(tx.block_height, tx.index);
            if !keep {
                tracing::debug!(
                    height = tx.block_height,
                    tx_index = tx.index,
                    "dropping out-of-range transaction"
                );
            }
            keep
        })
        .map(|tx| Transaction {
            block_height: tx.block_height,
            index: tx.index,
            events: tx
                .response
                .map(|r| r.events)
                .unwrap_or_default()
                .into_iter()
                .filter_map(RawEvent::into_source)
                .filter(|e| query.matches_event(e))
                .collect(),
        })
        .collect();
    out.sort_by_key(|tx| tx.position());
    out
}

#[async_trait]
impl<T: GraphqlTransport> ChainSource for GnoClient<T> {
    async fn query_block_info(&self, cancel: &CancellationToken) -> Result<BlockInfo, QueryError> {
        let data: BlockInfoData = self
            .execute(&GraphqlRequest::new(BLOCK_INFO_QUERY), cancel)
            .await?;
        let block = data
            .get_blocks
            .into_iter()
            .next()
            .ok_or_else(|| QueryError::Decode("genesis block not found".into()))?;
        Ok(BlockInfo {
            latest_height: data.latest_block_height,
            genesis: genesis_from(block)?,
        })
    }

    async fn query_events(
        &self,
        query: &EventQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<Transaction>, QueryError> {
        let req = GraphqlRequest::new(events_query(query));
        let data: EventsData = self.execute(&req, cancel).await?;
        let fetched = data.get_transactions.len();
        let txs = collect_transactions(query, data.get_transactions);
        tracing::debug!(
            after = %query.after,
            latest = query.latest_height,
            fetched,
            kept = txs.len(),
            "queried transactions"
        );
        Ok(txs)
    }
}
