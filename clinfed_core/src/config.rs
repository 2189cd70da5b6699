//! Static federation configuration.
//!
//! Regions, knowledge servers, retry policies and enrichment rules are read
//! once at startup and never mutated afterwards. Everything has sensible
//! defaults except the region and server tables themselves.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::FederationError;
use crate::fields::{self, ClinicalField};
use crate::logging::LoggingConfig;
use crate::types::ResourceType;

// ============================================================================
// Default Values
// ============================================================================

/// Default maximum number of merged results per lookup
pub const DEFAULT_MAX_RESULTS: usize = 10;

/// Default aggregate deadline in milliseconds
pub const DEFAULT_DEADLINE_MS: u64 = 8000;

/// Default per-call timeout for a knowledge server in milliseconds
pub const DEFAULT_SERVER_TIMEOUT_MS: u64 = 5000;

/// Default tool invoked on a knowledge server
pub const DEFAULT_TOOL: &str = "search";

/// Default placeholder sentinel treated as a missing value
pub const DEFAULT_PLACEHOLDER: &str = "Not specified";

// ============================================================================
// SearchDefaults
// ============================================================================

/// Defaults applied when the caller leaves a parameter out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchDefaults {
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
}

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

fn default_deadline_ms() -> u64 {
    DEFAULT_DEADLINE_MS
}

impl Default for SearchDefaults {
    fn default() -> Self {
        Self {
            max_results: DEFAULT_MAX_RESULTS,
            deadline_ms: DEFAULT_DEADLINE_MS,
        }
    }
}

impl SearchDefaults {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

// ============================================================================
// Retry Policy
// ============================================================================

/// Bounded exponential backoff for one knowledge server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            multiplier: 2.0,
            max_delay_ms: 2000,
        }
    }
}

impl RetryPolicy {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms.min(self.max_delay_ms))
    }

    /// Delay to wait after `current`, capped at `max_delay_ms`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let multiplier = if self.multiplier.is_finite() && self.multiplier >= 1.0 {
            self.multiplier
        } else {
            1.0
        };
        let next_ms = (current.as_millis() as f64 * multiplier).round() as u64;
        Duration::from_millis(next_ms.min(self.max_delay_ms))
    }
}

// ============================================================================
// Knowledge servers and regions
// ============================================================================

/// A remote knowledge server reachable through tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeServer {
    pub id: String,

    /// Human-readable name used in warnings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    pub endpoint: Url,

    pub resource_types: BTreeSet<ResourceType>,

    /// Tool invoked for searches (default: "search")
    #[serde(default = "default_tool")]
    pub tool: String,

    /// Per-call timeout budget
    #[serde(default = "default_server_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_tool() -> String {
    DEFAULT_TOOL.to_string()
}

fn default_server_timeout_ms() -> u64 {
    DEFAULT_SERVER_TIMEOUT_MS
}

impl KnowledgeServer {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn supports(&self, resource_type: ResourceType) -> bool {
        self.resource_types.contains(&resource_type)
    }

    pub fn supports_any(&self, requested: &BTreeSet<ResourceType>) -> bool {
        requested.iter().any(|rt| self.supports(*rt))
    }

    /// "Label (id)" when a label is configured, otherwise the id.
    pub fn display_name(&self) -> String {
        match &self.label {
            Some(label) if label != &self.id => format!("{} ({})", label, self.id),
            _ => self.id.clone(),
        }
    }
}

/// Server reference inside a region with its priority rank (lower = preferred).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRef {
    pub server: String,
    pub priority: u32,
}

/// A group of countries sharing the same knowledge servers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// ISO country codes belonging to this region
    #[serde(default)]
    pub countries: BTreeSet<String>,

    #[serde(default)]
    pub servers: Vec<ServerRef>,

    /// Region whose servers are appended at lower priority
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

impl Region {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

// ============================================================================
// Enrichment
// ============================================================================

/// Secondary lookup rule for one resource type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRule {
    pub resource_type: ResourceType,

    /// Enrichment server id (need not belong to any region)
    pub server: String,

    /// Fields whose absence triggers enrichment (empty = built-in defaults)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_fields: Vec<ClinicalField>,

    /// Tool to invoke instead of the server's default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,

    /// Budget for one enrichment call (default: the server's timeout)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl EnrichmentRule {
    pub fn effective_required_fields(&self) -> Vec<ClinicalField> {
        if self.required_fields.is_empty() {
            fields::default_required_fields(self.resource_type)
        } else {
            self.required_fields.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Values treated as missing (compared case-insensitively, trimmed)
    #[serde(default = "default_placeholders")]
    pub placeholders: Vec<String>,

    #[serde(default)]
    pub rules: Vec<EnrichmentRule>,
}

fn default_placeholders() -> Vec<String> {
    vec![DEFAULT_PLACEHOLDER.to_string()]
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            placeholders: default_placeholders(),
            rules: Vec::new(),
        }
    }
}

// ============================================================================
// FederationConfig
// ============================================================================

/// Complete static configuration for the federation core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederationConfig {
    #[serde(default)]
    pub defaults: SearchDefaults,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Region used for unknown or missing country codes
    pub default_region: String,

    pub regions: Vec<Region>,

    pub servers: Vec<KnowledgeServer>,

    #[serde(default)]
    pub enrichment: EnrichmentConfig,
}

impl FederationConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self, FederationError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, FederationError> {
        Ok(toml::from_str(content)?)
    }
}

// ============================================================================
// ConfigStore
// ============================================================================

/// Location of the federation configuration file.
///
/// Defaults to `~/.config/clinfed/federation.yaml`. Files ending in `.toml`
/// are parsed as TOML, anything else as YAML.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Create a config store at the default location.
    pub fn new_default() -> Self {
        let base = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|p| p.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."));
        let path = base.join("clinfed").join("federation.yaml");
        Self { path }
    }

    /// Create a config store at a custom path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<FederationConfig, FederationError> {
        let content = std::fs::read_to_string(&self.path)?;
        let is_toml = self
            .path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        if is_toml {
            FederationConfig::from_toml_str(&content)
        } else {
            FederationConfig::from_yaml_str(&content)
        }
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new_default()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_YAML: &str = r#"
default_region: GLOBAL
regions:
  - id: GLOBAL
    servers:
      - { server: who, priority: 1 }
servers:
  - id: who
    endpoint: https://who.example.org/mcp
    resource_types: [guideline]
"#;

    #[test]
    fn test_defaults_applied() {
        let config = FederationConfig::from_yaml_str(MINIMAL_YAML).unwrap();
        assert_eq!(config.defaults, SearchDefaults::default());
        assert_eq!(config.enrichment.placeholders, vec!["Not specified"]);

        let server = &config.servers[0];
        assert_eq!(server.tool, DEFAULT_TOOL);
        assert_eq!(server.timeout(), Duration::from_millis(DEFAULT_SERVER_TIMEOUT_MS));
        assert_eq!(server.retry, RetryPolicy::default());
        assert!(server.supports(ResourceType::Guideline));
        assert!(!server.supports(ResourceType::DrugMonograph));
    }

    #[test]
    fn test_partial_retry_policy() {
        let yaml = r#"
id: s1
endpoint: http://localhost:9000/mcp
resource_types: [drug_monograph]
retry:
  max_attempts: 5
"#;
        let server: KnowledgeServer = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(server.retry.max_attempts, 5);
        assert_eq!(server.retry.initial_backoff_ms, 200);
        assert_eq!(server.retry.multiplier, 2.0);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 6,
            initial_backoff_ms: 300,
            multiplier: 2.0,
            max_delay_ms: 1000,
        };
        let d1 = policy.initial_backoff();
        let d2 = policy.next_delay(d1);
        let d3 = policy.next_delay(d2);
        assert_eq!(d1, Duration::from_millis(300));
        assert_eq!(d2, Duration::from_millis(600));
        assert_eq!(d3, Duration::from_millis(1000));
        assert_eq!(policy.next_delay(d3), Duration::from_millis(1000));
    }

    #[test]
    fn test_invalid_multiplier_does_not_shrink_delay() {
        let policy = RetryPolicy {
            multiplier: 0.1,
            ..RetryPolicy::default()
        };
        let d = policy.initial_backoff();
        assert_eq!(policy.next_delay(d), d);
    }

    #[test]
    fn test_toml_config() {
        let toml = r#"
default_region = "GLOBAL"

[defaults]
max_results = 5

[[regions]]
id = "GLOBAL"
servers = [{ server = "who", priority = 1 }]

[[servers]]
id = "who"
endpoint = "https://who.example.org/mcp"
resource_types = ["guideline", "patient_education"]
timeout_ms = 1500

[[enrichment.rules]]
resource_type = "drug_monograph"
server = "who"
"#;
        let config = FederationConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.defaults.max_results, 5);
        assert_eq!(config.defaults.deadline_ms, DEFAULT_DEADLINE_MS);
        assert_eq!(config.servers[0].timeout_ms, 1500);
        let rule = &config.enrichment.rules[0];
        assert!(rule
            .effective_required_fields()
            .contains(&ClinicalField::SideEffects));
    }

    #[test]
    fn test_store_loads_by_extension() {
        let dir = std::env::temp_dir().join(format!("clinfed-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("federation.yaml");
        std::fs::write(&path, MINIMAL_YAML).unwrap();

        let store = ConfigStore::new(&path);
        let config = store.load().unwrap();
        assert_eq!(config.default_region, "GLOBAL");

        let missing = ConfigStore::new(dir.join("absent.yaml"));
        assert!(matches!(missing.load(), Err(FederationError::Io(_))));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_display_name() {
        let config = FederationConfig::from_yaml_str(MINIMAL_YAML).unwrap();
        let mut server = config.servers[0].clone();
        assert_eq!(server.display_name(), "who");
        server.label = Some("WHO guidelines".to_string());
        assert_eq!(server.display_name(), "WHO guidelines (who)");
    }
}
