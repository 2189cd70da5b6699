//! Clinical decision support facade.
//!
//! The entry point used by the consultation pipeline. Each operation builds a
//! [`SearchQuery`] for one resource-type family, runs the regional search,
//! passes the merged results through enrichment and shapes the response,
//! turning failed server outcomes into readable warnings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

use crate::config::{ConfigStore, FederationConfig, SearchDefaults};
use crate::directory::RegionDirectory;
use crate::enrich::EnrichmentCoordinator;
use crate::error::FederationError;
use crate::remote::{KnowledgeTransport, McpHttpTransport};
use crate::search::RegionalSearch;
use crate::types::{
    AggregatedResult, OutcomeStatus, QueryPayload, ResourceType, SearchQuery, SearchResult,
    ServerOutcome,
};

/// Inbound call contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupRequest {
    pub country_code: String,
    pub resource_types: Vec<ResourceType>,
    pub query: QueryPayload,
    /// Configured default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
    /// Aggregate deadline in milliseconds; configured default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
}

impl LookupRequest {
    pub fn new(
        country_code: impl Into<String>,
        resource_types: impl IntoIterator<Item = ResourceType>,
        query: QueryPayload,
    ) -> Self {
        Self {
            country_code: country_code.into(),
            resource_types: resource_types.into_iter().collect(),
            query,
            max_results: None,
            deadline_ms: None,
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline_ms = Some(deadline.as_millis() as u64);
        self
    }

    fn into_query(self, defaults: &SearchDefaults) -> SearchQuery {
        let deadline = self
            .deadline_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| defaults.deadline());
        SearchQuery::new(self.country_code, self.resource_types, self.query)
            .with_max_results(self.max_results.unwrap_or(defaults.max_results))
            .with_deadline(deadline)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupStatus {
    /// Every queried server answered
    Complete,
    /// Some servers failed; results are best-effort
    Partial,
    /// Every queried server failed
    AllSourcesFailed,
    /// No server in the region serves the requested types
    NoSources,
}

/// Unified response handed back to the analysis pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupResponse {
    pub region_id: String,
    pub results: Vec<SearchResult>,
    pub partial: bool,
    pub warnings: Vec<String>,
    pub outcomes: Vec<ServerOutcome>,
    pub status: LookupStatus,
}

impl LookupResponse {
    /// Escalate an all-sources-failed response into an error.
    pub fn into_result(self) -> Result<Self, FederationError> {
        match self.status {
            LookupStatus::AllSourcesFailed => Err(FederationError::AllSourcesFailed {
                region: self.region_id,
                attempted: self.outcomes.len(),
            }),
            _ => Ok(self),
        }
    }
}

pub struct ClinicalDecisionSupport {
    search: RegionalSearch,
    enrichment: EnrichmentCoordinator,
    defaults: SearchDefaults,
}

impl ClinicalDecisionSupport {
    /// Build the facade over an arbitrary transport.
    pub fn new(
        config: &FederationConfig,
        transport: Arc<dyn KnowledgeTransport>,
    ) -> Result<Self, FederationError> {
        let directory = Arc::new(RegionDirectory::from_config(config)?);
        let search = RegionalSearch::new(Arc::clone(&directory), transport);
        let enrichment =
            EnrichmentCoordinator::new(directory, search.caller().clone(), &config.enrichment);
        Ok(Self {
            search,
            enrichment,
            defaults: config.defaults.clone(),
        })
    }

    /// Build the facade over MCP-over-HTTP.
    pub fn with_http(config: &FederationConfig) -> Result<Self, FederationError> {
        Self::new(config, Arc::new(McpHttpTransport::new()?))
    }

    /// Load configuration from `store` and build an HTTP-backed facade.
    pub fn from_store(store: &ConfigStore) -> Result<Self, FederationError> {
        let config = store.load()?;
        Self::with_http(&config)
    }

    pub fn directory(&self) -> &RegionDirectory {
        self.search.directory()
    }

    pub async fn lookup(&self, request: LookupRequest) -> Result<LookupResponse, FederationError> {
        let query = request.into_query(&self.defaults);
        // search and enrichment share one deadline
        let deadline = Instant::now() + query.deadline;
        let aggregate = self.search.search_until(&query, deadline).await?;
        let AggregatedResult {
            region_id,
            results,
            outcomes,
            partial,
        } = aggregate;

        let results = self.enrichment.enrich(results, deadline).await;
        let status = status_of(&outcomes, partial);
        let warnings = self.warnings(&query, &region_id, &outcomes, status);

        info!(
            target: "clinfed::facade",
            region = %region_id,
            types = %query.family_label(),
            status = ?status,
            results = results.len(),
            warnings = warnings.len(),
            "lookup finished"
        );

        Ok(LookupResponse {
            region_id,
            results,
            partial,
            warnings,
            outcomes,
            status,
        })
    }

    pub async fn lookup_guideline(
        &self,
        country_code: &str,
        topic: &str,
    ) -> Result<LookupResponse, FederationError> {
        self.lookup_single(country_code, ResourceType::Guideline, topic)
            .await
    }

    pub async fn lookup_drug(
        &self,
        country_code: &str,
        drug_name: &str,
    ) -> Result<LookupResponse, FederationError> {
        self.lookup_single(country_code, ResourceType::DrugMonograph, drug_name)
            .await
    }

    pub async fn lookup_dosage(
        &self,
        country_code: &str,
        drug_name: &str,
    ) -> Result<LookupResponse, FederationError> {
        self.lookup_single(country_code, ResourceType::Dosage, drug_name)
            .await
    }

    /// Interactions between `drug_names`. The names are sent both joined as
    /// the subject and as a `drugs` list parameter.
    pub async fn lookup_interactions<S: AsRef<str>>(
        &self,
        country_code: &str,
        drug_names: &[S],
    ) -> Result<LookupResponse, FederationError> {
        let names: Vec<&str> = drug_names
            .iter()
            .map(|n| n.as_ref().trim())
            .filter(|n| !n.is_empty())
            .collect();
        if names.is_empty() {
            return Err(FederationError::InvalidQuery(
                "interaction lookup needs at least one drug name".to_string(),
            ));
        }
        let payload =
            QueryPayload::new(names.join(", ")).with_parameter("drugs", serde_json::json!(names));
        self.lookup(LookupRequest::new(
            country_code,
            [ResourceType::Interaction],
            payload,
        ))
        .await
    }

    pub async fn lookup_patient_education(
        &self,
        country_code: &str,
        topic: &str,
    ) -> Result<LookupResponse, FederationError> {
        self.lookup_single(country_code, ResourceType::PatientEducation, topic)
            .await
    }

    pub async fn lookup_special_considerations(
        &self,
        country_code: &str,
        drug_name: &str,
    ) -> Result<LookupResponse, FederationError> {
        self.lookup_single(country_code, ResourceType::SpecialConsiderations, drug_name)
            .await
    }

    async fn lookup_single(
        &self,
        country_code: &str,
        resource_type: ResourceType,
        subject: &str,
    ) -> Result<LookupResponse, FederationError> {
        let subject = subject.trim();
        if subject.is_empty() {
            return Err(FederationError::InvalidQuery(format!(
                "{} lookup needs a subject",
                resource_type.family_label()
            )));
        }
        self.lookup(LookupRequest::new(
            country_code,
            [resource_type],
            QueryPayload::new(subject),
        ))
        .await
    }

    fn warnings(
        &self,
        query: &SearchQuery,
        region_id: &str,
        outcomes: &[ServerOutcome],
        status: LookupStatus,
    ) -> Vec<String> {
        let mut warnings: Vec<String> = outcomes
            .iter()
            .filter(|o| !o.is_ok())
            .map(|outcome| self.outcome_warning(query, region_id, outcome))
            .collect();

        match status {
            LookupStatus::AllSourcesFailed => warnings.push(format!(
                "no {} source for region {} answered; results are unavailable",
                query.family_label(),
                region_id
            )),
            LookupStatus::NoSources => warnings.push(format!(
                "no {} server is configured for region {}",
                query.family_label(),
                region_id
            )),
            LookupStatus::Complete | LookupStatus::Partial => {}
        }
        warnings
    }

    /// "drug server S1 for region EU-default timed out"
    fn outcome_warning(&self, query: &SearchQuery, region_id: &str, outcome: &ServerOutcome) -> String {
        let (family, name) = match self.directory().server(&outcome.server_id) {
            Some(server) => {
                let served: BTreeSet<ResourceType> = server
                    .resource_types
                    .intersection(&query.resource_types)
                    .copied()
                    .collect();
                let family = served
                    .iter()
                    .map(|rt| rt.family_label())
                    .collect::<Vec<_>>()
                    .join("/");
                (family, server.display_name())
            }
            None => (query.family_label(), outcome.server_id.clone()),
        };

        match outcome.status {
            OutcomeStatus::Timeout => {
                format!("{} server {} for region {} timed out", family, name, region_id)
            }
            _ => format!(
                "{} server {} for region {} failed: {}",
                family,
                name,
                region_id,
                outcome.detail.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}

fn status_of(outcomes: &[ServerOutcome], partial: bool) -> LookupStatus {
    if outcomes.is_empty() {
        LookupStatus::NoSources
    } else if outcomes.iter().all(|o| !o.is_ok()) {
        LookupStatus::AllSourcesFailed
    } else if partial {
        LookupStatus::Partial
    } else {
        LookupStatus::Complete
    }
}
