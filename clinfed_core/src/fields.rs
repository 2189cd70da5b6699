//! Per-resource-type field mapping.
//!
//! Knowledge servers disagree on key names (`side_effects` vs
//! `adverse_effects`, `dosage` vs `dosing`). Each resource type has a fixed
//! table mapping wire keys onto a closed set of [`ClinicalField`]s, so merge
//! and enrichment work on typed fields instead of ad hoc key lookups.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::types::ResourceType;

/// Named clinical field carried by a search result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClinicalField {
    Summary,
    Recommendations,
    EvidenceLevel,
    Issuer,
    Indications,
    Dosage,
    SideEffects,
    Contraindications,
    Warnings,
    Interactions,
    Severity,
    Management,
    PatientInstructions,
    SpecialConsiderations,
}

impl ClinicalField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClinicalField::Summary => "summary",
            ClinicalField::Recommendations => "recommendations",
            ClinicalField::EvidenceLevel => "evidence_level",
            ClinicalField::Issuer => "issuer",
            ClinicalField::Indications => "indications",
            ClinicalField::Dosage => "dosage",
            ClinicalField::SideEffects => "side_effects",
            ClinicalField::Contraindications => "contraindications",
            ClinicalField::Warnings => "warnings",
            ClinicalField::Interactions => "interactions",
            ClinicalField::Severity => "severity",
            ClinicalField::Management => "management",
            ClinicalField::PatientInstructions => "patient_instructions",
            ClinicalField::SpecialConsiderations => "special_considerations",
        }
    }
}

impl fmt::Display for ClinicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire keys accepted for one clinical field, in lookup order.
#[derive(Debug, Clone)]
pub struct FieldMapping {
    pub field: ClinicalField,
    pub keys: &'static [&'static str],
}

const fn map(field: ClinicalField, keys: &'static [&'static str]) -> FieldMapping {
    FieldMapping { field, keys }
}

static FIELD_MAPPINGS: Lazy<HashMap<ResourceType, Vec<FieldMapping>>> = Lazy::new(|| {
    use ClinicalField::*;

    let mut table = HashMap::new();
    table.insert(
        ResourceType::Guideline,
        vec![
            map(Summary, &["summary", "abstract", "description"]),
            map(Recommendations, &["recommendations", "key_recommendations"]),
            map(EvidenceLevel, &["evidence_level", "grade"]),
            map(Issuer, &["issuer", "organization", "publisher"]),
        ],
    );
    table.insert(
        ResourceType::DrugMonograph,
        vec![
            map(Summary, &["summary", "description"]),
            map(Indications, &["indications", "uses"]),
            map(Dosage, &["dosage", "dosing", "dose"]),
            map(SideEffects, &["side_effects", "adverse_effects", "adverse_reactions"]),
            map(Contraindications, &["contraindications"]),
            map(Warnings, &["warnings", "precautions"]),
            map(Interactions, &["interactions", "drug_interactions"]),
        ],
    );
    table.insert(
        ResourceType::Dosage,
        vec![
            map(Dosage, &["dosage", "dosing", "dose", "adult_dose"]),
            map(SpecialConsiderations, &["adjustments", "renal_adjustment"]),
            map(Warnings, &["warnings", "precautions"]),
        ],
    );
    table.insert(
        ResourceType::Interaction,
        vec![
            map(Interactions, &["interactions", "description", "effect"]),
            map(Severity, &["severity", "level"]),
            map(Management, &["management", "recommendation"]),
        ],
    );
    table.insert(
        ResourceType::PatientEducation,
        vec![
            map(Summary, &["summary", "description"]),
            map(PatientInstructions, &["instructions", "patient_instructions", "advice"]),
            map(Warnings, &["warnings", "when_to_seek_help"]),
        ],
    );
    table.insert(
        ResourceType::SpecialConsiderations,
        vec![
            map(
                SpecialConsiderations,
                &["special_considerations", "considerations", "populations"],
            ),
            map(Warnings, &["warnings", "precautions"]),
            map(Contraindications, &["contraindications"]),
        ],
    );
    table
});

/// Field mapping table for a resource type.
pub fn mappings_for(resource_type: ResourceType) -> &'static [FieldMapping] {
    FIELD_MAPPINGS
        .get(&resource_type)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Required fields used when an enrichment rule does not list its own.
pub fn default_required_fields(resource_type: ResourceType) -> Vec<ClinicalField> {
    match resource_type {
        ResourceType::DrugMonograph => vec![
            ClinicalField::Indications,
            ClinicalField::SideEffects,
            ClinicalField::Contraindications,
            ClinicalField::Dosage,
        ],
        ResourceType::Dosage => vec![ClinicalField::Dosage],
        ResourceType::Interaction => vec![ClinicalField::Interactions],
        ResourceType::SpecialConsiderations => vec![ClinicalField::SpecialConsiderations],
        ResourceType::Guideline => vec![ClinicalField::Recommendations],
        ResourceType::PatientEducation => vec![ClinicalField::PatientInstructions],
    }
}

/// Placeholder sentinels that stand in for a missing value.
///
/// Matching is case-insensitive on trimmed text; blank text always counts
/// as missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholders {
    values: Vec<String>,
}

impl Placeholders {
    pub fn new<S: AsRef<str>>(values: impl IntoIterator<Item = S>) -> Self {
        let values = values
            .into_iter()
            .map(|v| v.as_ref().trim().to_lowercase())
            .filter(|v| !v.is_empty())
            .collect();
        Self { values }
    }

    /// Absent, blank, or equal to a sentinel.
    pub fn is_missing(&self, value: Option<&str>) -> bool {
        match value.map(str::trim) {
            None | Some("") => true,
            Some(v) => {
                let v = v.to_lowercase();
                self.values.iter().any(|p| *p == v)
            }
        }
    }
}

impl Default for Placeholders {
    fn default() -> Self {
        Self::new([crate::config::DEFAULT_PLACEHOLDER])
    }
}

/// Extract the typed fields of `record` according to the mapping table.
///
/// The first wire key holding a real value wins. If every key holds only a
/// placeholder, the first placeholder is kept so the field still reads as
/// missing. Strings are trimmed, arrays of scalars are joined with ", ",
/// numbers and booleans are stringified. Nested objects and nulls are
/// ignored.
pub fn extract_fields(
    resource_type: ResourceType,
    record: &Value,
    placeholders: &Placeholders,
) -> BTreeMap<ClinicalField, String> {
    let mut fields = BTreeMap::new();
    for mapping in mappings_for(resource_type) {
        let mut candidates = mapping
            .keys
            .iter()
            .filter_map(|key| record.get(*key))
            .filter_map(value_to_text)
            .filter(|text| !text.is_empty());

        let mut first_placeholder = None;
        let value = candidates.find(|text| {
            if placeholders.is_missing(Some(text.as_str())) {
                first_placeholder.get_or_insert_with(|| text.clone());
                false
            } else {
                true
            }
        });
        if let Some(value) = value.or(first_placeholder) {
            fields.insert(mapping.field, value);
        }
    }
    fields
}

fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|item| match item {
                    Value::Array(_) | Value::Object(_) | Value::Null => None,
                    other => value_to_text(other),
                })
                .filter(|s| !s.is_empty())
                .collect();
            Some(parts.join(", "))
        }
        Value::Null | Value::Object(_) => None,
    }
}
