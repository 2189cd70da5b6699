//! Field-level enrichment from a secondary knowledge server.
//!
//! A merged result whose resource type has an [`EnrichmentRule`] is checked
//! for missing required fields. If any are missing, one extra call goes to
//! the rule's server asking for the record's own subject (its title), and
//! only fields that are missing in the primary result are filled from the
//! answer. Primary values are never overwritten, and a secondary record
//! titled for a different subject is never used.

use futures::future::join_all;
use rmcp::model::CallToolRequestParam;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{EnrichmentConfig, EnrichmentRule};
use crate::directory::RegionDirectory;
use crate::fields::{self, ClinicalField, Placeholders};
use crate::remote::{parse, ResilientCaller};
use crate::search::merge::normalize_title;
use crate::types::{ResourceType, SearchResult};

/// Records requested from the enrichment server per lookup.
const ENRICHMENT_MAX_RESULTS: usize = 3;

pub struct EnrichmentCoordinator {
    directory: Arc<RegionDirectory>,
    caller: ResilientCaller,
    rules: HashMap<ResourceType, EnrichmentRule>,
    placeholders: Placeholders,
}

impl EnrichmentCoordinator {
    pub fn new(
        directory: Arc<RegionDirectory>,
        caller: ResilientCaller,
        config: &EnrichmentConfig,
    ) -> Self {
        let rules = config
            .rules
            .iter()
            .map(|rule| (rule.resource_type, rule.clone()))
            .collect();
        let placeholders = directory.placeholders().clone();
        Self {
            directory,
            caller,
            rules,
            placeholders,
        }
    }

    pub fn rule_for(&self, resource_type: ResourceType) -> Option<&EnrichmentRule> {
        self.rules.get(&resource_type)
    }

    /// Absent, blank, or equal to a placeholder sentinel.
    pub fn is_missing(&self, value: Option<&str>) -> bool {
        self.placeholders.is_missing(value)
    }

    /// Required fields of `result` that are missing. Empty when its resource
    /// type has no enrichment rule.
    pub fn missing_fields(&self, result: &SearchResult) -> Vec<ClinicalField> {
        match self.rule_for(result.resource_type) {
            Some(rule) => rule
                .effective_required_fields()
                .into_iter()
                .filter(|f| self.is_missing(result.field(*f)))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Enrich every result that needs it, concurrently, finishing by
    /// `deadline`. Order is preserved and a failed enrichment leaves its
    /// result unchanged.
    pub async fn enrich(&self, results: Vec<SearchResult>, deadline: Instant) -> Vec<SearchResult> {
        join_all(results.into_iter().map(|r| self.enrich_one(r, deadline))).await
    }

    async fn enrich_one(&self, mut result: SearchResult, deadline: Instant) -> SearchResult {
        let missing = self.missing_fields(&result);
        if missing.is_empty() {
            return result;
        }
        let Some(rule) = self.rule_for(result.resource_type) else {
            return result;
        };
        let Some(server) = self.directory.server(&rule.server) else {
            warn!(
                target: "clinfed::enrich",
                server = %rule.server,
                "enrichment server is not configured"
            );
            return result;
        };

        debug!(
            target: "clinfed::enrich",
            title = %result.title,
            resource_type = %result.resource_type,
            server = %server.id,
            missing = ?missing,
            "requesting enrichment"
        );

        let budget = rule
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| server.timeout());
        let call_deadline = (Instant::now() + budget).min(deadline);
        let request = enrichment_request(rule, &server.tool, &result, &missing);
        let report = self.caller.invoke(server, request, call_deadline).await;

        if !report.outcome.is_ok() {
            warn!(
                target: "clinfed::enrich",
                title = %result.title,
                server = %server.id,
                status = ?report.outcome.status,
                detail = report.outcome.detail.as_deref().unwrap_or(""),
                "enrichment lookup failed, keeping primary record"
            );
            return result;
        }

        let Some(secondary) = pick_record(&result.title, &report.records) else {
            debug!(
                target: "clinfed::enrich",
                title = %result.title,
                server = %server.id,
                records = report.records.len(),
                "enrichment server returned no record for this subject"
            );
            return result;
        };

        let supplied = fields::extract_fields(result.resource_type, secondary, &self.placeholders);
        let mut filled = Vec::new();
        for mapping in fields::mappings_for(result.resource_type) {
            if !self.is_missing(result.field(mapping.field)) {
                continue;
            }
            if let Some(value) = supplied.get(&mapping.field) {
                if !self.is_missing(Some(value)) {
                    result.fields.insert(mapping.field, value.clone());
                    filled.push(mapping.field);
                }
            }
        }

        if filled.is_empty() {
            debug!(
                target: "clinfed::enrich",
                title = %result.title,
                server = %server.id,
                "enrichment supplied nothing usable"
            );
            return result;
        }

        info!(
            target: "clinfed::enrich",
            title = %result.title,
            server = %server.id,
            fields = ?filled,
            "record enriched"
        );
        result.enrichment_applied = true;
        result.enriched_fields = filled;
        result.enrichment_source = Some(server.id.clone());
        result
    }
}

fn enrichment_request(
    rule: &EnrichmentRule,
    server_tool: &str,
    result: &SearchResult,
    missing: &[ClinicalField],
) -> CallToolRequestParam {
    let tool = rule.tool.as_deref().unwrap_or(server_tool).to_string();
    let mut arguments = Map::new();
    arguments.insert("query".to_string(), json!(result.title));
    arguments.insert(
        "resource_types".to_string(),
        json!([result.resource_type.as_str()]),
    );
    arguments.insert("max_results".to_string(), json!(ENRICHMENT_MAX_RESULTS));
    arguments.insert(
        "fields".to_string(),
        json!(missing.iter().map(|f| f.as_str()).collect::<Vec<_>>()),
    );
    CallToolRequestParam {
        name: tool.into(),
        arguments: Some(arguments),
    }
}

/// The record whose title matches `title`, else the first untitled record.
/// Records titled for another subject are never picked.
fn pick_record<'a>(title: &str, records: &'a [Value]) -> Option<&'a Value> {
    let wanted = normalize_title(title);
    records
        .iter()
        .find(|r| parse::record_title(r).is_some_and(|t| normalize_title(t) == wanted))
        .or_else(|| records.iter().find(|r| parse::record_title(r).is_none()))
}
