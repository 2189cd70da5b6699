use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::error::FederationError;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    /// Extra filter directives, e.g. "clinfed::search=debug,reqwest=warn"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directives: Option<String>,

    #[serde(default = "default_with_target")]
    pub with_target: bool,
}

fn default_with_target() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            directives: None,
            with_target: true,
        }
    }
}

impl LoggingConfig {
    /// Build the filter: `RUST_LOG` wins, otherwise level plus directives.
    pub fn env_filter(&self) -> Result<EnvFilter, FederationError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        let directives = match &self.directives {
            Some(directives) if !directives.trim().is_empty() => {
                format!("{},{}", self.level.as_filter(), directives.trim())
            }
            _ => self.level.as_filter().to_string(),
        };
        EnvFilter::try_new(&directives)
            .map_err(|e| FederationError::Config(format!("invalid log filter '{}': {}", directives, e)))
    }
}

/// Install a global fmt subscriber.
///
/// Returns `Ok(false)` if a subscriber was already installed by the host
/// process, which is left untouched.
pub fn init_tracing(config: &LoggingConfig) -> Result<bool, FederationError> {
    let filter = config.env_filter()?;
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .try_init()
        .is_ok();
    Ok(installed)
}
