//! Regional search: parallel fan-out under an aggregate deadline.
//!
//! One branch is spawned per applicable server. Branches are collected from a
//! [`JoinSet`] until they have all finished or the deadline fires, at which
//! point whatever is still running is aborted and recorded as a timeout.

use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::merge;
use crate::config::Region;
use crate::directory::{RankedServer, RegionDirectory};
use crate::error::FederationError;
use crate::remote::{BranchReport, KnowledgeTransport, ResilientCaller};
use crate::types::{AggregatedResult, SearchQuery, ServerOutcome};

/// Fans a query out to the knowledge servers of the caller's region.
#[derive(Clone)]
pub struct RegionalSearch {
    directory: Arc<RegionDirectory>,
    caller: ResilientCaller,
}

impl RegionalSearch {
    pub fn new(directory: Arc<RegionDirectory>, transport: Arc<dyn KnowledgeTransport>) -> Self {
        Self {
            directory,
            caller: ResilientCaller::new(transport),
        }
    }

    pub fn directory(&self) -> &RegionDirectory {
        &self.directory
    }

    pub fn caller(&self) -> &ResilientCaller {
        &self.caller
    }

    /// Resolve the query's region and search it, with the deadline counted
    /// from now.
    ///
    /// Only an invalid query is an error. Server failures are reported in
    /// the returned outcomes.
    pub async fn search(&self, query: &SearchQuery) -> Result<AggregatedResult, FederationError> {
        self.search_until(query, Instant::now() + query.deadline).await
    }

    /// Like [`search`](Self::search), against an absolute deadline owned by
    /// the caller.
    pub async fn search_until(
        &self,
        query: &SearchQuery,
        deadline: Instant,
    ) -> Result<AggregatedResult, FederationError> {
        let region = self.directory.resolve(&query.country_code);
        self.run(region, query, deadline).await
    }

    /// Search an already-resolved region.
    pub async fn search_region(
        &self,
        region: &Region,
        query: &SearchQuery,
    ) -> Result<AggregatedResult, FederationError> {
        self.run(region, query, Instant::now() + query.deadline).await
    }

    async fn run(
        &self,
        region: &Region,
        query: &SearchQuery,
        deadline: Instant,
    ) -> Result<AggregatedResult, FederationError> {
        query.validate()?;

        let servers: Vec<RankedServer> = self
            .directory
            .servers_for(region)
            .into_iter()
            .filter(|s| s.server.supports_any(&query.resource_types))
            .collect();

        if servers.is_empty() {
            info!(
                target: "clinfed::search",
                region = %region.id,
                types = %query.family_label(),
                "no knowledge server serves the requested types"
            );
            return Ok(AggregatedResult::empty(region.id.clone()));
        }

        Ok(self.fan_out(&region.id, servers, query, deadline).await)
    }

    async fn fan_out(
        &self,
        region_id: &str,
        servers: Vec<RankedServer>,
        query: &SearchQuery,
        deadline: Instant,
    ) -> AggregatedResult {
        let started = Instant::now();
        let shared_query = Arc::new(query.clone());
        let mut branches = JoinSet::new();

        for (index, server) in servers.iter().enumerate() {
            let caller = self.caller.clone();
            let directory = Arc::clone(&self.directory);
            let server = server.clone();
            let query = Arc::clone(&shared_query);
            branches.spawn(async move {
                let report = caller
                    .search(&server, &query, directory.placeholders(), deadline)
                    .await;
                (index, report)
            });
        }
        debug!(
            target: "clinfed::search",
            region = %region_id,
            branches = servers.len(),
            deadline_ms = %query.deadline.as_millis(),
            "dispatched search branches"
        );

        let mut slots: Vec<Option<BranchReport>> = vec![None; servers.len()];
        let mut deadline_hit = false;
        loop {
            match tokio::time::timeout_at(deadline, branches.join_next()).await {
                Ok(Some(Ok((index, report)))) => slots[index] = Some(report),
                Ok(Some(Err(e))) => {
                    warn!(target: "clinfed::search", error = %e, "search branch did not complete");
                }
                Ok(None) => break,
                Err(_) => {
                    deadline_hit = true;
                    branches.abort_all();
                    break;
                }
            }
        }

        let mut results = Vec::new();
        let mut outcomes = Vec::with_capacity(servers.len());
        for (server, slot) in servers.iter().zip(slots) {
            match slot {
                Some(report) => {
                    results.extend(report.results);
                    outcomes.push(report.outcome);
                }
                None => {
                    let err = if deadline_hit {
                        FederationError::DeadlineExceeded {
                            server: server.server.id.clone(),
                            detail: "cancelled at aggregate deadline".to_string(),
                        }
                    } else {
                        FederationError::PermanentServerError {
                            server: server.server.id.clone(),
                            detail: "search branch aborted".to_string(),
                        }
                    };
                    outcomes.push(ServerOutcome::failed(&err, started.elapsed(), 0));
                }
            }
        }

        let collected = results.len();
        let results = merge::merge_and_rank(results, query.max_results);
        let partial = outcomes.iter().any(|o| !o.is_ok());

        info!(
            target: "clinfed::search",
            region = %region_id,
            servers = outcomes.len(),
            failed = outcomes.iter().filter(|o| !o.is_ok()).count(),
            collected,
            merged = results.len(),
            deadline_hit,
            elapsed_ms = %started.elapsed().as_millis(),
            "federated search finished"
        );

        AggregatedResult {
            region_id: region_id.to_string(),
            results,
            outcomes,
            partial,
        }
    }
}
