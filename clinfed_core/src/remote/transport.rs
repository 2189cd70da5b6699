//! Outbound tool invocation against a knowledge server.
//!
//! Knowledge servers speak MCP: a `tools/call` JSON-RPC 2.0 request carrying a
//! [`CallToolRequestParam`] and answering with a [`CallToolResult`]. The
//! [`KnowledgeTransport`] trait is the seam; [`McpHttpTransport`] is the
//! production implementation over HTTP.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT};
use rmcp::model::{CallToolRequestParam, CallToolResult};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::config::KnowledgeServer;
use crate::error::FederationError;

/// Whether a failed attempt is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    Permanent,
}

/// Failure of a single remote attempt.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("tool reported an error: {0}")]
    ToolError(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Connection problems, timeouts, 5xx, 429 and JSON-RPC server errors are
    /// transient. Everything else is permanent.
    pub fn classify(&self) -> FailureClass {
        match self {
            TransportError::Connect(_) | TransportError::Timeout => FailureClass::Transient,
            TransportError::Status { status, .. } => {
                if *status >= 500 || *status == 429 || *status == 408 {
                    FailureClass::Transient
                } else {
                    FailureClass::Permanent
                }
            }
            // -32603 internal error, -32099..=-32000 implementation-defined server errors
            TransportError::Rpc { code, .. } => {
                if *code == -32603 || (-32099..=-32000).contains(code) {
                    FailureClass::Transient
                } else {
                    FailureClass::Permanent
                }
            }
            TransportError::ToolError(_) | TransportError::Malformed(_) => FailureClass::Permanent,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout)
    }

    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_decode() {
            TransportError::Malformed(e.to_string())
        } else if let Some(status) = e.status() {
            TransportError::Status {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            TransportError::Connect(e.to_string())
        }
    }
}

/// Invoke/await contract for one remote tool call. Cancellation is by drop.
#[async_trait]
pub trait KnowledgeTransport: Send + Sync {
    async fn invoke(
        &self,
        server: &KnowledgeServer,
        request: CallToolRequestParam,
    ) -> Result<CallToolResult, TransportError>;
}

/// MCP `tools/call` over HTTP POST.
pub struct McpHttpTransport {
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl McpHttpTransport {
    pub fn new() -> Result<Self, FederationError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .user_agent(concat!("clinfed/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client))
    }

    /// Use a preconfigured client (proxies, TLS roots, ...).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl KnowledgeTransport for McpHttpTransport {
    async fn invoke(
        &self,
        server: &KnowledgeServer,
        request: CallToolRequestParam,
    ) -> Result<CallToolResult, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": request,
        });

        let t0 = tokio::time::Instant::now();
        let response = self
            .client
            .post(server.endpoint.clone())
            .header(
                ACCEPT,
                HeaderValue::from_static("application/json, text/event-stream"),
            )
            .json(&body)
            .send()
            .await
            .map_err(TransportError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: truncate(&body, 200),
            });
        }

        let text = response
            .text()
            .await
            .map_err(TransportError::from_reqwest)?;
        debug!(
            target: "clinfed::transport",
            server = %server.id,
            rpc_id = id,
            bytes = text.len(),
            elapsed_ms = %t0.elapsed().as_millis(),
            "tools/call response received"
        );

        parse_rpc_response(&text)
    }
}

/// Decode a JSON-RPC response body, accepting plain JSON or a single
/// server-sent `data:` event.
pub(crate) fn parse_rpc_response(text: &str) -> Result<CallToolResult, TransportError> {
    let payload = sse_data(text).unwrap_or(text);
    let envelope: Value = serde_json::from_str(payload)
        .map_err(|e| TransportError::Malformed(format!("invalid JSON-RPC body: {}", e)))?;

    if let Some(error) = envelope.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32603);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Err(TransportError::Rpc { code, message });
    }

    let result = envelope
        .get("result")
        .cloned()
        .ok_or_else(|| TransportError::Malformed("response has no result".to_string()))?;
    let result: CallToolResult = serde_json::from_value(result)
        .map_err(|e| TransportError::Malformed(format!("unexpected tool result: {}", e)))?;

    if result.is_error == Some(true) {
        let message = result
            .content
            .iter()
            .find_map(|c| c.as_text().map(|t| t.text.clone()))
            .unwrap_or_else(|| "no detail".to_string());
        return Err(TransportError::ToolError(truncate(&message, 200)));
    }

    Ok(result)
}

fn sse_data(text: &str) -> Option<&str> {
    text.lines()
        .find_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
