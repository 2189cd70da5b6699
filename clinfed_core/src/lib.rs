// src/lib.rs
pub mod config;
pub mod directory;
pub mod enrich;
pub mod error;
pub mod facade;
pub mod fields;
pub mod logging;
pub mod remote;
pub mod search;
pub mod types;

// Re-export the rmcp model types that transport implementors need
pub use rmcp::model::{CallToolRequestParam, CallToolResult, Content};

pub use config::{
    ConfigStore, EnrichmentConfig, EnrichmentRule, FederationConfig, KnowledgeServer, Region,
    RetryPolicy, SearchDefaults, ServerRef,
};
pub use directory::{RankedServer, RegionDirectory};
pub use enrich::EnrichmentCoordinator;
pub use error::FederationError;
pub use facade::{ClinicalDecisionSupport, LookupRequest, LookupResponse, LookupStatus};
pub use fields::ClinicalField;
pub use logging::{init_tracing, LogLevel, LoggingConfig};
pub use remote::{
    FailureClass, KnowledgeTransport, McpHttpTransport, ResilientCaller, TransportError,
};
pub use search::RegionalSearch;
pub use types::{
    AggregatedResult, OutcomeStatus, QueryPayload, ResourceType, SearchQuery, SearchResult,
    ServerOutcome,
};
