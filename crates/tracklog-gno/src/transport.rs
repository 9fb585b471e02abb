//! The `GraphqlTransport` trait and its `reqwest`-backed implementation.
//!
//! A transport performs exactly one HTTP exchange. Retry, status
//! classification and envelope decoding live in [`crate::client`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tracklog_core::error::QueryError;

/// A GraphQL request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphqlRequest {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,
}

impl GraphqlRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: None,
        }
    }
}

/// Raw HTTP reply: status code and the full body text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The standard GraphQL response envelope.
#[derive(Debug, Deserialize)]
pub struct GraphqlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphqlErrorItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphqlErrorItem {
    pub message: String,
}

/// One POST to a GraphQL endpoint.
///
/// Implementations map connection-level failures to
/// [`QueryError::Transport`] and return every HTTP response, whatever its
/// status, as an [`HttpReply`].
#[async_trait]
pub trait GraphqlTransport: Send + Sync + 'static {
    async fn post(&self, req: &GraphqlRequest) -> Result<HttpReply, QueryError>;

    /// The endpoint this transport talks to.
    fn url(&self) -> &str;
}

/// HTTP transport backed by a shared `reqwest::Client`.
pub struct HttpTransport {
    url: String,
    http: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport whose every request is bounded by `timeout`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, QueryError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QueryError::Transport(format!("building HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            http,
        })
    }
}

#[async_trait]
impl GraphqlTransport for HttpTransport {
    async fn post(&self, req: &GraphqlRequest) -> Result<HttpReply, QueryError> {
        let resp = self
            .http
            .post(&self.url)
            .json(req)
            .send()
            .await
            .map_err(|e| QueryError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| QueryError::Transport(format!("reading body: {e}")))?;
        Ok(HttpReply { status, body })
    }

    fn url(&self) -> &str {
        &self.url
    }
}
