//! Normalisation of tool results into records and search results.

use rmcp::model::CallToolResult;
use serde_json::Value;
use std::collections::BTreeSet;

use super::transport::TransportError;
use crate::directory::RankedServer;
use crate::fields::{self, Placeholders};
use crate::types::{ResourceType, SearchResult};

/// Keys under which servers return their record list.
const RESULT_LIST_KEYS: &[&str] = &[
    "results", "records", "items", "entries", "documents", "data", "hits",
];

const TITLE_KEYS: &[&str] = &["title", "name", "drug_name", "topic"];
const TYPE_KEYS: &[&str] = &["resource_type", "type", "category"];
const URL_KEYS: &[&str] = &["source_url", "url", "link"];
const CONFIDENCE_KEYS: &[&str] = &["confidence", "score", "relevance"];

/// Pull the raw record list out of a tool result.
///
/// `structured_content` is preferred; otherwise the first text content that
/// parses as JSON is used. A result with neither is malformed. A bare object
/// without a list key is treated as a single record.
pub fn extract_records(result: &CallToolResult) -> Result<Vec<Value>, TransportError> {
    let payload = match &result.structured_content {
        Some(value) => value.clone(),
        None => result
            .content
            .iter()
            .filter_map(|c| c.as_text())
            .find_map(|t| serde_json::from_str::<Value>(&t.text).ok())
            .ok_or_else(|| {
                TransportError::Malformed("tool result carries no JSON payload".to_string())
            })?,
    };

    match payload {
        Value::Array(items) => Ok(items),
        Value::Object(ref map) => {
            for key in RESULT_LIST_KEYS {
                if let Some(value) = map.get(*key) {
                    return match value {
                        Value::Array(items) => Ok(items.clone()),
                        Value::Null => Ok(Vec::new()),
                        other => Err(TransportError::Malformed(format!(
                            "'{}' is not a list (got {})",
                            key,
                            type_name(other)
                        ))),
                    };
                }
            }
            if map.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(vec![payload])
            }
        }
        Value::Null => Ok(Vec::new()),
        other => Err(TransportError::Malformed(format!(
            "expected object or array payload, got {}",
            type_name(&other)
        ))),
    }
}

pub fn record_title(record: &Value) -> Option<&str> {
    first_str(record, TITLE_KEYS).filter(|s| !s.is_empty())
}

/// Convert raw records from `server` into typed search results.
///
/// Records without a title, or whose resource type cannot be determined or
/// was not requested, are dropped. Records without an explicit type are
/// attributed to the requested type only when it is unambiguous.
pub fn to_search_results(
    server: &RankedServer,
    requested: &BTreeSet<ResourceType>,
    records: &[Value],
    placeholders: &Placeholders,
) -> Vec<SearchResult> {
    let served: Vec<ResourceType> = requested
        .iter()
        .copied()
        .filter(|rt| server.server.supports(*rt))
        .collect();

    records
        .iter()
        .filter_map(|record| {
            let title = record_title(record)?;
            let resource_type = match first_str(record, TYPE_KEYS) {
                Some(raw) => raw.parse::<ResourceType>().ok()?,
                None if served.len() == 1 => served[0],
                None => return None,
            };
            if !requested.contains(&resource_type) {
                return None;
            }

            let mut result = SearchResult::new(
                server.server.id.clone(),
                resource_type,
                title,
                server.priority,
            )
            .with_fields(fields::extract_fields(resource_type, record, placeholders));

            if let Some(url) = first_str(record, URL_KEYS) {
                result = result.with_source_url(url);
            }
            if let Some(confidence) = CONFIDENCE_KEYS
                .iter()
                .find_map(|k| record.get(*k).and_then(Value::as_f64))
            {
                result = result.with_confidence(confidence as f32);
            }
            Some(result)
        })
        .collect()
}

fn first_str<'a>(record: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| record.get(*k).and_then(Value::as_str))
        .map(str::trim)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
