#![allow(dead_code)]

use async_trait::async_trait;
use clinfed_core::{
    CallToolRequestParam, CallToolResult, FederationConfig, KnowledgeServer, KnowledgeTransport,
    TransportError,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One scripted response.
#[derive(Clone)]
pub enum Step {
    Records(Value),
    Fail(TransportError),
    /// Never answers within any sane deadline
    Hang,
}

struct Script {
    latency: Duration,
    steps: Vec<Step>,
    served: usize,
}

/// In-process transport replaying per-server scripts. The last step of a
/// script repeats once the others are used up.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<(String, CallToolRequestParam)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, server_id: &str, latency_ms: u64, steps: Vec<Step>) -> Self {
        self.scripts.lock().unwrap().insert(
            server_id.to_string(),
            Script {
                latency: Duration::from_millis(latency_ms),
                steps,
                served: 0,
            },
        );
        self
    }

    pub fn calls_to(&self, server_id: &str) -> usize {
        self.requests_to(server_id).len()
    }

    pub fn requests_to(&self, server_id: &str) -> Vec<CallToolRequestParam> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == server_id)
            .map(|(_, request)| request.clone())
            .collect()
    }
}

#[async_trait]
impl KnowledgeTransport for ScriptedTransport {
    async fn invoke(
        &self,
        server: &KnowledgeServer,
        request: CallToolRequestParam,
    ) -> Result<CallToolResult, TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push((server.id.clone(), request));

        let next = {
            let mut scripts = self.scripts.lock().unwrap();
            scripts.get_mut(&server.id).and_then(|script| {
                let index = script.served.min(script.steps.len().checked_sub(1)?);
                script.served += 1;
                Some((script.latency, script.steps[index].clone()))
            })
        };

        let Some((latency, step)) = next else {
            return Err(TransportError::Connect(format!("no script for {}", server.id)));
        };

        tokio::time::sleep(latency).await;
        match step {
            Step::Records(value) => Ok(CallToolResult {
                content: Vec::new(),
                structured_content: Some(value),
                is_error: Some(false),
                meta: None,
            }),
            Step::Fail(err) => Err(err),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(TransportError::Timeout)
            }
        }
    }
}

/// Transport whose calls never answer. Counts calls started, calls that ran
/// to completion and calls dropped while still in flight.
#[derive(Default)]
pub struct StallingTransport {
    started: AtomicUsize,
    completed: AtomicUsize,
    dropped: AtomicUsize,
}

impl StallingTransport {
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }
}

struct InFlight<'a> {
    dropped: &'a AtomicUsize,
    finished: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl KnowledgeTransport for StallingTransport {
    async fn invoke(
        &self,
        _server: &KnowledgeServer,
        _request: CallToolRequestParam,
    ) -> Result<CallToolResult, TransportError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let mut in_flight = InFlight {
            dropped: &self.dropped,
            finished: false,
        };
        tokio::time::sleep(Duration::from_secs(3600)).await;
        in_flight.finished = true;
        self.completed.fetch_add(1, Ordering::SeqCst);
        Err(TransportError::Timeout)
    }
}

pub fn unavailable() -> Step {
    Step::Fail(TransportError::Status {
        status: 503,
        body: "service unavailable".to_string(),
    })
}

pub fn bad_request() -> Step {
    Step::Fail(TransportError::Status {
        status: 400,
        body: "bad request".to_string(),
    })
}

/// EU-default (S1 guideline+drug, S2 drug) falling back to GLOBAL (WHO
/// guideline+patient education, IX interactions). ENRICH fills drug
/// monographs and belongs to no region.
pub const FEDERATION_YAML: &str = r#"
default_region: GLOBAL
defaults:
  max_results: 10
  deadline_ms: 2000
regions:
  - id: EU-default
    name: European Union
    countries: [FR, DE, ES]
    servers:
      - { server: S1, priority: 1 }
      - { server: S2, priority: 2 }
    fallback: GLOBAL
  - id: GLOBAL
    name: Global
    servers:
      - { server: WHO, priority: 1 }
      - { server: IX, priority: 2 }
servers:
  - id: S1
    endpoint: "http://s1.test/mcp"
    resource_types: [guideline, drug_monograph]
    timeout_ms: 1000
    retry: { max_attempts: 1 }
  - id: S2
    endpoint: "http://s2.test/mcp"
    resource_types: [drug_monograph]
    timeout_ms: 1000
  - id: WHO
    label: WHO guidelines
    endpoint: "http://who.test/mcp"
    resource_types: [guideline, patient_education]
  - id: IX
    endpoint: "http://ix.test/mcp"
    resource_types: [interaction]
  - id: ENRICH
    endpoint: "http://enrich.test/mcp"
    resource_types: [drug_monograph]
    retry: { max_attempts: 1 }
enrichment:
  rules:
    - resource_type: drug_monograph
      server: ENRICH
      required_fields: [side_effects]
"#;

pub fn federation_config() -> FederationConfig {
    FederationConfig::from_yaml_str(FEDERATION_YAML).unwrap()
}
