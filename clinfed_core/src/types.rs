//! Core types for a single federation call.
//!
//! Everything here lives for the duration of one facade call. The only
//! long-lived state is the region directory and server configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::FederationError;
use crate::fields::ClinicalField;

/// Confidence assigned to records that do not report one.
pub const DEFAULT_CONFIDENCE: f32 = 0.5;

/// Category of clinical content a result represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Guideline,
    DrugMonograph,
    Dosage,
    Interaction,
    PatientEducation,
    SpecialConsiderations,
}

impl ResourceType {
    pub const ALL: [ResourceType; 6] = [
        ResourceType::Guideline,
        ResourceType::DrugMonograph,
        ResourceType::Dosage,
        ResourceType::Interaction,
        ResourceType::PatientEducation,
        ResourceType::SpecialConsiderations,
    ];

    /// Wire name, as sent to knowledge servers.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Guideline => "guideline",
            ResourceType::DrugMonograph => "drug_monograph",
            ResourceType::Dosage => "dosage",
            ResourceType::Interaction => "interaction",
            ResourceType::PatientEducation => "patient_education",
            ResourceType::SpecialConsiderations => "special_considerations",
        }
    }

    /// Short human label used in warnings ("drug server S1 ...").
    pub fn family_label(&self) -> &'static str {
        match self {
            ResourceType::Guideline => "guideline",
            ResourceType::DrugMonograph => "drug",
            ResourceType::Dosage => "dosage",
            ResourceType::Interaction => "interaction",
            ResourceType::PatientEducation => "patient education",
            ResourceType::SpecialConsiderations => "special considerations",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = FederationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "guideline" | "guidelines" => Ok(ResourceType::Guideline),
            "drug_monograph" | "drug" | "monograph" => Ok(ResourceType::DrugMonograph),
            "dosage" | "dosing" => Ok(ResourceType::Dosage),
            "interaction" | "interactions" => Ok(ResourceType::Interaction),
            "patient_education" => Ok(ResourceType::PatientEducation),
            "special_considerations" => Ok(ResourceType::SpecialConsiderations),
            _ => Err(FederationError::InvalidQuery(format!(
                "unknown resource type: {}",
                s
            ))),
        }
    }
}

/// Structured query payload handed to knowledge servers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryPayload {
    /// Primary lookup key: drug name, guideline topic, etc.
    pub subject: String,

    /// Extra structured parameters merged into the tool arguments.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
}

impl QueryPayload {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            parameters: Map::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }
}

/// One federated query. Built per facade call and never mutated after dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub resource_types: BTreeSet<ResourceType>,
    pub payload: QueryPayload,
    pub country_code: String,
    pub max_results: usize,
    /// Aggregate deadline, measured from dispatch.
    #[serde(with = "duration_ms")]
    pub deadline: Duration,
}

impl SearchQuery {
    pub fn new(
        country_code: impl Into<String>,
        resource_types: impl IntoIterator<Item = ResourceType>,
        payload: QueryPayload,
    ) -> Self {
        Self {
            resource_types: resource_types.into_iter().collect(),
            payload,
            country_code: country_code.into(),
            max_results: crate::config::DEFAULT_MAX_RESULTS,
            deadline: Duration::from_millis(crate::config::DEFAULT_DEADLINE_MS),
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn validate(&self) -> Result<(), FederationError> {
        if self.resource_types.is_empty() {
            return Err(FederationError::InvalidQuery(
                "at least one resource type is required".to_string(),
            ));
        }
        if self.max_results == 0 {
            return Err(FederationError::InvalidQuery(
                "max_results must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Human label for the requested families, e.g. "drug" or "guideline/drug".
    pub fn family_label(&self) -> String {
        self.resource_types
            .iter()
            .map(|rt| rt.family_label())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// A single record returned by a knowledge server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Server that produced this record
    pub server_id: String,

    pub resource_type: ResourceType,

    pub title: String,

    /// Typed clinical fields extracted through the field-mapping table
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<ClinicalField, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,

    /// Confidence in [0, 1]
    pub confidence: f32,

    pub retrieved_at: DateTime<Utc>,

    /// Priority rank of the owning server (lower = preferred)
    pub server_priority: u32,

    #[serde(default)]
    pub enrichment_applied: bool,

    /// Fields filled from the enrichment server
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enriched_fields: Vec<ClinicalField>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrichment_source: Option<String>,
}

impl SearchResult {
    pub fn new(
        server_id: impl Into<String>,
        resource_type: ResourceType,
        title: impl Into<String>,
        server_priority: u32,
    ) -> Self {
        Self {
            server_id: server_id.into(),
            resource_type,
            title: title.into(),
            fields: BTreeMap::new(),
            source_url: None,
            confidence: DEFAULT_CONFIDENCE,
            retrieved_at: Utc::now(),
            server_priority,
            enrichment_applied: false,
            enriched_fields: Vec::new(),
            enrichment_source: None,
        }
    }

    pub fn with_field(mut self, field: ClinicalField, value: impl Into<String>) -> Self {
        self.fields.insert(field, value.into());
        self
    }

    pub fn with_fields(mut self, fields: BTreeMap<ClinicalField, String>) -> Self {
        self.fields.extend(fields);
        self
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    /// Set the confidence, clamped to [0, 1]. NaN falls back to the default.
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = if confidence.is_nan() {
            DEFAULT_CONFIDENCE
        } else {
            confidence.clamp(0.0, 1.0)
        };
        self
    }

    pub fn field(&self, field: ClinicalField) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }
}

/// Final status of one server branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Ok,
    Timeout,
    Error,
}

/// Per-server diagnostic for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerOutcome {
    pub server_id: String,
    pub status: OutcomeStatus,
    pub latency_ms: u64,
    /// Number of remote attempts made (0 if cancelled before the first one finished)
    pub attempts: u32,
    #[serde(default)]
    pub result_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ServerOutcome {
    pub fn ok(server_id: impl Into<String>, latency: Duration, attempts: u32, count: usize) -> Self {
        Self {
            server_id: server_id.into(),
            status: OutcomeStatus::Ok,
            latency_ms: latency.as_millis() as u64,
            attempts,
            result_count: count,
            error_code: None,
            detail: None,
        }
    }

    pub fn failed(error: &FederationError, latency: Duration, attempts: u32) -> Self {
        let server_id = match error {
            FederationError::TransientServerError { server, .. }
            | FederationError::PermanentServerError { server, .. }
            | FederationError::DeadlineExceeded { server, .. } => server.clone(),
            _ => String::new(),
        };
        Self {
            server_id,
            status: error.outcome_status(),
            latency_ms: latency.as_millis() as u64,
            attempts,
            result_count: 0,
            error_code: Some(error.code_str().to_string()),
            detail: Some(error.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == OutcomeStatus::Ok
    }
}

/// Deduplicated, ranked results plus per-server diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub region_id: String,
    pub results: Vec<SearchResult>,
    pub outcomes: Vec<ServerOutcome>,
    /// True if any server failed or the deadline truncated collection
    pub partial: bool,
}

impl AggregatedResult {
    pub fn empty(region_id: impl Into<String>) -> Self {
        Self {
            region_id: region_id.into(),
            results: Vec::new(),
            outcomes: Vec::new(),
            partial: false,
        }
    }

    /// Every dispatched server ended in error or timeout.
    pub fn all_failed(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(|o| !o.is_ok())
    }

    pub fn failed_outcomes(&self) -> impl Iterator<Item = &ServerOutcome> {
        self.outcomes.iter().filter(|o| !o.is_ok())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
