//! Region directory: country → region → ordered knowledge servers.
//!
//! Built once from [`FederationConfig`] and shared read-only behind an `Arc`.
//! Lookups never fail; unknown countries land in the default region.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::config::{FederationConfig, KnowledgeServer, Region};
use crate::error::FederationError;
use crate::fields::Placeholders;

/// A server as scheduled for one region, with its effective priority rank.
#[derive(Debug, Clone)]
pub struct RankedServer {
    pub server: Arc<KnowledgeServer>,
    /// Lower = preferred. Fallback servers always rank after own servers.
    pub priority: u32,
    /// True when the server was inherited from the fallback region
    pub from_fallback: bool,
}

#[derive(Debug)]
pub struct RegionDirectory {
    regions: HashMap<String, Region>,
    countries: HashMap<String, String>,
    servers: HashMap<String, Arc<KnowledgeServer>>,
    default_region: String,
    placeholders: Placeholders,
}

impl RegionDirectory {
    /// Validate the configuration and build the lookup tables.
    pub fn from_config(config: &FederationConfig) -> Result<Self, FederationError> {
        let mut servers = HashMap::new();
        for server in &config.servers {
            if server.id.trim().is_empty() {
                return Err(FederationError::Config("server with empty id".to_string()));
            }
            if servers
                .insert(server.id.clone(), Arc::new(server.clone()))
                .is_some()
            {
                return Err(FederationError::Config(format!(
                    "server '{}' is defined twice",
                    server.id
                )));
            }
        }

        let mut regions = HashMap::new();
        for region in &config.regions {
            if regions.insert(region.id.clone(), region.clone()).is_some() {
                return Err(FederationError::Config(format!(
                    "region '{}' is defined twice",
                    region.id
                )));
            }
        }

        if !regions.contains_key(&config.default_region) {
            return Err(FederationError::Config(format!(
                "default region '{}' is not defined",
                config.default_region
            )));
        }

        let mut countries: HashMap<String, String> = HashMap::new();
        for region in &config.regions {
            for code in &region.countries {
                let code = normalize_country(code);
                if code.is_empty() {
                    continue;
                }
                if let Some(existing) = countries.insert(code.clone(), region.id.clone()) {
                    if existing != region.id {
                        return Err(FederationError::Config(format!(
                            "country '{}' is mapped to both '{}' and '{}'",
                            code, existing, region.id
                        )));
                    }
                }
            }

            for server_ref in &region.servers {
                // u32::MAX would leave no room to rank fallback servers after it
                if server_ref.priority == u32::MAX {
                    return Err(FederationError::Config(format!(
                        "region '{}' gives server '{}' reserved priority {}",
                        region.id,
                        server_ref.server,
                        u32::MAX
                    )));
                }
                if !servers.contains_key(&server_ref.server) {
                    return Err(FederationError::Config(format!(
                        "region '{}' references unknown server '{}'",
                        region.id, server_ref.server
                    )));
                }
            }

            if let Some(fallback) = &region.fallback {
                if fallback == &region.id {
                    return Err(FederationError::Config(format!(
                        "region '{}' names itself as fallback",
                        region.id
                    )));
                }
                if !regions.contains_key(fallback) {
                    return Err(FederationError::Config(format!(
                        "region '{}' has unknown fallback '{}'",
                        region.id, fallback
                    )));
                }
            }
        }

        for rule in &config.enrichment.rules {
            if !servers.contains_key(&rule.server) {
                return Err(FederationError::Config(format!(
                    "enrichment rule for {} references unknown server '{}'",
                    rule.resource_type, rule.server
                )));
            }
        }

        Ok(Self {
            regions,
            countries,
            servers,
            default_region: config.default_region.clone(),
            placeholders: Placeholders::new(&config.enrichment.placeholders),
        })
    }

    /// Resolve a country code to its region. Unknown or empty codes resolve
    /// to the default region.
    pub fn resolve(&self, country_code: &str) -> &Region {
        let code = normalize_country(country_code);
        let region = self
            .countries
            .get(&code)
            .and_then(|id| self.regions.get(id))
            .unwrap_or_else(|| self.default_region());
        debug!(
            target: "clinfed::directory",
            country = %code,
            region = %region.id,
            "resolved region"
        );
        region
    }

    pub fn default_region(&self) -> &Region {
        // Presence checked in `from_config`.
        &self.regions[&self.default_region]
    }

    pub fn region(&self, id: &str) -> Option<&Region> {
        self.regions.get(id)
    }

    pub fn server(&self, id: &str) -> Option<&Arc<KnowledgeServer>> {
        self.servers.get(id)
    }

    /// Configured placeholder sentinels.
    pub fn placeholders(&self) -> &Placeholders {
        &self.placeholders
    }

    /// Servers for `region` in priority order, followed by the fallback
    /// region's servers ranked strictly after them. Server ids already listed
    /// are not repeated.
    pub fn servers_for(&self, region: &Region) -> Vec<RankedServer> {
        let mut seen = HashSet::new();
        let mut ranked = Vec::new();

        for server_ref in sorted_refs(region) {
            if let Some(server) = self.servers.get(&server_ref.server) {
                if seen.insert(server.id.clone()) {
                    ranked.push(RankedServer {
                        server: Arc::clone(server),
                        priority: server_ref.priority,
                        from_fallback: false,
                    });
                }
            }
        }

        let fallback = region
            .fallback
            .as_ref()
            .and_then(|id| self.regions.get(id));

        if let Some(fallback) = fallback {
            let base = ranked
                .iter()
                .map(|s| s.priority)
                .max()
                .unwrap_or(0)
                .saturating_add(1);
            for server_ref in sorted_refs(fallback) {
                if let Some(server) = self.servers.get(&server_ref.server) {
                    if seen.insert(server.id.clone()) {
                        ranked.push(RankedServer {
                            server: Arc::clone(server),
                            priority: base.saturating_add(server_ref.priority),
                            from_fallback: true,
                        });
                    }
                }
            }
        }

        ranked
    }
}

fn sorted_refs(region: &Region) -> Vec<&crate::config::ServerRef> {
    let mut refs: Vec<_> = region.servers.iter().collect();
    // Stable: equal priorities keep configuration order.
    refs.sort_by_key(|r| r.priority);
    refs
}

fn normalize_country(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}
