// src/error.rs
use crate::types::OutcomeStatus;

#[derive(Debug, thiserror::Error)]
pub enum FederationError {
    #[error("transient error from server {server}: {detail}")]
    TransientServerError {
        server: String,
        detail: String,
        /// The last failed attempt ran out of time rather than failing outright.
        timed_out: bool,
    },

    #[error("permanent error from server {server}: {detail}")]
    PermanentServerError { server: String, detail: String },

    #[error("deadline exceeded for server {server}: {detail}")]
    DeadlineExceeded { server: String, detail: String },

    #[error("all {attempted} knowledge servers for region {region} failed")]
    AllSourcesFailed { region: String, attempted: usize },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

impl FederationError {
    pub fn code_str(&self) -> &'static str {
        match self {
            FederationError::TransientServerError { .. } => "transient_server_error",
            FederationError::PermanentServerError { .. } => "permanent_server_error",
            FederationError::DeadlineExceeded { .. } => "deadline_exceeded",
            FederationError::AllSourcesFailed { .. } => "all_sources_failed",
            FederationError::InvalidQuery(_) => "invalid_query",
            FederationError::Config(_) => "invalid_config",
            FederationError::Io(_) => "io_error",
            FederationError::Yaml(_) | FederationError::Toml(_) => "config_parse_error",
            FederationError::HttpClient(_) => "http_client_error",
        }
    }

    /// Status recorded on a `ServerOutcome` built from this error.
    pub fn outcome_status(&self) -> OutcomeStatus {
        match self {
            FederationError::DeadlineExceeded { .. } => OutcomeStatus::Timeout,
            FederationError::TransientServerError {
                timed_out: true, ..
            } => OutcomeStatus::Timeout,
            _ => OutcomeStatus::Error,
        }
    }
}
