//! One call to one knowledge server, with bounded retries.
//!
//! Transient failures are retried with exponential backoff until the
//! server's attempt budget or the caller's deadline runs out. Permanent
//! failures return immediately. Nothing here ever returns an error: every
//! path ends in a [`ServerOutcome`].

use rmcp::model::CallToolRequestParam;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use super::parse;
use super::transport::{FailureClass, KnowledgeTransport, TransportError};
use crate::config::KnowledgeServer;
use crate::directory::RankedServer;
use crate::error::FederationError;
use crate::fields::Placeholders;
use crate::types::{SearchQuery, SearchResult, ServerOutcome};

/// Raw records plus the outcome of a resilient call.
#[derive(Debug, Clone)]
pub struct CallReport {
    /// Empty unless `outcome` is ok
    pub records: Vec<Value>,
    pub outcome: ServerOutcome,
}

/// Typed results of one search branch.
#[derive(Debug, Clone)]
pub struct BranchReport {
    pub results: Vec<SearchResult>,
    pub outcome: ServerOutcome,
}

#[derive(Clone)]
pub struct ResilientCaller {
    transport: Arc<dyn KnowledgeTransport>,
}

impl ResilientCaller {
    pub fn new(transport: Arc<dyn KnowledgeTransport>) -> Self {
        Self { transport }
    }

    /// Run a search query against one ranked server. `placeholders` decides
    /// which field values count as missing when records are typed.
    pub async fn search(
        &self,
        server: &RankedServer,
        query: &SearchQuery,
        placeholders: &Placeholders,
        deadline: Instant,
    ) -> BranchReport {
        let request = search_request(&server.server, query);
        let report = self.invoke(&server.server, request, deadline).await;
        let results = if report.outcome.is_ok() {
            parse::to_search_results(server, &query.resource_types, &report.records, placeholders)
        } else {
            Vec::new()
        };

        let mut outcome = report.outcome;
        if outcome.is_ok() {
            outcome.result_count = results.len();
        }
        BranchReport { results, outcome }
    }

    /// Invoke `request` on `server` until it succeeds, fails permanently,
    /// exhausts its attempts, or can no longer finish before `deadline`.
    pub async fn invoke(
        &self,
        server: &KnowledgeServer,
        request: CallToolRequestParam,
        deadline: Instant,
    ) -> CallReport {
        let started = Instant::now();
        let policy = &server.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut delay = policy.initial_backoff();
        let mut attempts = 0u32;

        loop {
            let now = Instant::now();
            if now >= deadline {
                let err = FederationError::DeadlineExceeded {
                    server: server.id.clone(),
                    detail: format!("deadline reached before attempt {}", attempts + 1),
                };
                return failed(err, started, attempts);
            }

            attempts += 1;
            let budget = server.timeout().min(deadline - now);
            debug!(
                target: "clinfed::remote",
                server = %server.id,
                tool = %request.name,
                attempt = attempts,
                budget_ms = %budget.as_millis(),
                "invoking knowledge server"
            );

            let attempt = tokio::time::timeout(budget, self.transport.invoke(server, request.clone()));
            let failure = match attempt.await {
                Ok(Ok(result)) => match parse::extract_records(&result) {
                    Ok(records) => {
                        let outcome =
                            ServerOutcome::ok(server.id.clone(), started.elapsed(), attempts, records.len());
                        return CallReport { records, outcome };
                    }
                    Err(e) => e,
                },
                Ok(Err(e)) => e,
                Err(_) => TransportError::Timeout,
            };

            match failure.classify() {
                FailureClass::Permanent => {
                    warn!(
                        target: "clinfed::remote",
                        server = %server.id,
                        attempt = attempts,
                        error = %failure,
                        "permanent failure, not retrying"
                    );
                    let err = FederationError::PermanentServerError {
                        server: server.id.clone(),
                        detail: failure.to_string(),
                    };
                    return failed(err, started, attempts);
                }
                FailureClass::Transient => {
                    if attempts >= max_attempts {
                        warn!(
                            target: "clinfed::remote",
                            server = %server.id,
                            attempts,
                            error = %failure,
                            "retries exhausted"
                        );
                        let err = FederationError::TransientServerError {
                            server: server.id.clone(),
                            detail: format!("{} after {} attempt(s)", failure, attempts),
                            timed_out: failure.is_timeout(),
                        };
                        return failed(err, started, attempts);
                    }

                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining < delay {
                        debug!(
                            target: "clinfed::remote",
                            server = %server.id,
                            delay_ms = %delay.as_millis(),
                            remaining_ms = %remaining.as_millis(),
                            "next retry cannot finish before deadline"
                        );
                        let err = FederationError::DeadlineExceeded {
                            server: server.id.clone(),
                            detail: format!(
                                "{}; next retry in {}ms exceeds remaining {}ms",
                                failure,
                                delay.as_millis(),
                                remaining.as_millis()
                            ),
                        };
                        return failed(err, started, attempts);
                    }

                    debug!(
                        target: "clinfed::remote",
                        server = %server.id,
                        attempt = attempts,
                        error = %failure,
                        delay_ms = %delay.as_millis(),
                        "transient failure, backing off"
                    );
                    sleep(delay).await;
                    delay = policy.next_delay(delay);
                }
            }
        }
    }
}

fn failed(err: FederationError, started: Instant, attempts: u32) -> CallReport {
    CallReport {
        records: Vec::new(),
        outcome: ServerOutcome::failed(&err, started.elapsed(), attempts),
    }
}

/// Tool arguments for a search: subject, types, limits, country, plus the
/// caller's own parameters (which win on key clashes).
pub(crate) fn search_request(server: &KnowledgeServer, query: &SearchQuery) -> CallToolRequestParam {
    let resource_types: Vec<&str> = query
        .resource_types
        .iter()
        .filter(|rt| server.supports(**rt))
        .map(|rt| rt.as_str())
        .collect();

    let mut arguments = Map::new();
    arguments.insert("query".to_string(), json!(query.payload.subject));
    arguments.insert("resource_types".to_string(), json!(resource_types));
    arguments.insert("max_results".to_string(), json!(query.max_results));
    arguments.insert("country_code".to_string(), json!(query.country_code));
    for (key, value) in &query.payload.parameters {
        arguments.insert(key.clone(), value.clone());
    }

    CallToolRequestParam {
        name: server.tool.clone().into(),
        arguments: Some(arguments),
    }
}
