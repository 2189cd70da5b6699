mod support;

use clinfed_core::{
    ClinicalField, OutcomeStatus, QueryPayload, RegionDirectory, RegionalSearch, ResourceType,
    SearchQuery,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use support::{
    bad_request, federation_config, unavailable, ScriptedTransport, StallingTransport, Step,
};
use tokio::time::Instant;

fn engine(transport: ScriptedTransport) -> (RegionalSearch, Arc<ScriptedTransport>) {
    let directory = RegionDirectory::from_config(&federation_config()).unwrap();
    let transport = Arc::new(transport);
    (
        RegionalSearch::new(Arc::new(directory), transport.clone()),
        transport,
    )
}

fn drug_query(subject: &str) -> SearchQuery {
    SearchQuery::new("FR", [ResourceType::DrugMonograph], QueryPayload::new(subject))
        .with_deadline(Duration::from_secs(2))
}

#[tokio::test(start_paused = true)]
async fn test_fan_out_latency_is_max_not_sum() {
    let transport = ScriptedTransport::new()
        .on("S1", 300, vec![Step::Records(json!([{"title": "Amoxicillin"}]))])
        .on("S2", 500, vec![Step::Records(json!([{"title": "Ampicillin"}]))]);
    let (engine, _) = engine(transport);

    let start = Instant::now();
    let aggregate = engine.search(&drug_query("penicillins")).await.unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_millis(600), "took {:?}", elapsed);
    assert_eq!(aggregate.results.len(), 2);
    assert!(!aggregate.partial);
    assert!(aggregate.outcomes.iter().all(|o| o.is_ok()));
}

#[tokio::test(start_paused = true)]
async fn test_failing_server_does_not_hide_healthy_one() {
    let transport = ScriptedTransport::new()
        .on("S1", 10, vec![bad_request()])
        .on("S2", 50, vec![Step::Records(json!({"results": [{"title": "Amoxicillin"}]}))]);
    let (engine, transport) = engine(transport);

    let aggregate = engine.search(&drug_query("Amoxicillin")).await.unwrap();

    assert_eq!(aggregate.region_id, "EU-default");
    assert!(aggregate.partial);
    assert_eq!(aggregate.results.len(), 1);
    assert_eq!(aggregate.results[0].server_id, "S2");

    let s1 = &aggregate.outcomes[0];
    assert_eq!(s1.server_id, "S1");
    assert_eq!(s1.status, OutcomeStatus::Error);
    assert_eq!(s1.error_code.as_deref(), Some("permanent_server_error"));
    assert_eq!(transport.calls_to("S1"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_duplicates_keep_higher_priority_fields() {
    let transport = ScriptedTransport::new()
        .on(
            "S1",
            200,
            vec![Step::Records(json!([
                {"title": "Amoxicillin", "side_effects": "Rash", "score": 0.2}
            ]))],
        )
        .on(
            "S2",
            10,
            vec![Step::Records(json!([
                {"title": "  AMOXICILLIN ", "side_effects": "Nausea", "score": 0.99},
                {"title": "Amoxicillin/clavulanate", "score": 0.7}
            ]))],
        );
    let (engine, _) = engine(transport);

    let aggregate = engine.search(&drug_query("Amoxicillin")).await.unwrap();
    assert_eq!(aggregate.results.len(), 2);

    let first = &aggregate.results[0];
    assert_eq!(first.server_id, "S1");
    assert_eq!(first.field(ClinicalField::SideEffects), Some("Rash"));
    assert_eq!(aggregate.results[1].title, "Amoxicillin/clavulanate");
}

#[tokio::test(start_paused = true)]
async fn test_results_are_truncated_to_max_results() {
    let records: Vec<_> = (0..8).map(|i| json!({"title": format!("Drug {}", i)})).collect();
    let transport = ScriptedTransport::new()
        .on("S1", 10, vec![Step::Records(json!(records))])
        .on("S2", 10, vec![Step::Records(json!([]))]);
    let (engine, _) = engine(transport);

    let aggregate = engine
        .search(&drug_query("drugs").with_max_results(3))
        .await
        .unwrap();
    assert_eq!(aggregate.results.len(), 3);
    assert_eq!(aggregate.outcomes[0].result_count, 8);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_before_any_answer_times_everything_out() {
    let transport = ScriptedTransport::new()
        .on("S1", 0, vec![Step::Hang])
        .on("S2", 0, vec![Step::Hang]);
    let (engine, _) = engine(transport);

    let query = drug_query("Amoxicillin").with_deadline(Duration::from_millis(200));
    let start = Instant::now();
    let aggregate = engine.search(&query).await.unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed <= Duration::from_millis(250), "took {:?}", elapsed);
    assert!(aggregate.results.is_empty());
    assert!(aggregate.partial);
    assert!(aggregate.all_failed());
    assert_eq!(aggregate.outcomes.len(), 2);
    assert!(aggregate
        .outcomes
        .iter()
        .all(|o| o.status == OutcomeStatus::Timeout));
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_is_retried() {
    let transport = ScriptedTransport::new()
        .on("S1", 10, vec![Step::Records(json!([]))])
        .on(
            "S2",
            10,
            vec![unavailable(), Step::Records(json!([{"title": "Metformin"}]))],
        );
    let (engine, transport) = engine(transport);

    let aggregate = engine.search(&drug_query("Metformin")).await.unwrap();

    assert!(!aggregate.partial);
    assert_eq!(aggregate.results[0].title, "Metformin");
    let s2 = aggregate.outcomes.iter().find(|o| o.server_id == "S2").unwrap();
    assert_eq!(s2.attempts, 2);
    assert_eq!(transport.calls_to("S2"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_that_cannot_finish_aborts_as_timeout() {
    let transport = ScriptedTransport::new()
        .on("S1", 10, vec![Step::Records(json!([{"title": "Metformin"}]))])
        .on("S2", 100, vec![unavailable()]);
    let (engine, transport) = engine(transport);

    // After the first 100ms attempt only 150ms remain, less than the 200ms backoff.
    let query = drug_query("Metformin").with_deadline(Duration::from_millis(250));
    let aggregate = engine.search(&query).await.unwrap();

    let s2 = aggregate.outcomes.iter().find(|o| o.server_id == "S2").unwrap();
    assert_eq!(s2.status, OutcomeStatus::Timeout);
    assert_eq!(s2.attempts, 1);
    assert_eq!(transport.calls_to("S2"), 1);
    assert_eq!(aggregate.results.len(), 1);
    assert!(aggregate.partial);
}

#[tokio::test(start_paused = true)]
async fn test_fallback_region_servers_rank_after_own() {
    let transport = ScriptedTransport::new()
        .on(
            "S1",
            10,
            vec![Step::Records(json!([{"title": "Sepsis management"}]))],
        )
        .on(
            "WHO",
            10,
            vec![Step::Records(json!([
                {"title": "Sepsis Management", "resource_type": "guideline", "score": 1.0},
                {"title": "Sepsis in children", "resource_type": "guideline"}
            ]))],
        );
    let (engine, transport) = engine(transport);

    let query = SearchQuery::new("fr", [ResourceType::Guideline], QueryPayload::new("Sepsis"));
    let aggregate = engine.search(&query).await.unwrap();

    let servers: Vec<_> = aggregate.outcomes.iter().map(|o| o.server_id.as_str()).collect();
    assert_eq!(servers, vec!["S1", "WHO"]);
    assert_eq!(transport.calls_to("S2"), 0);

    let titles: Vec<_> = aggregate
        .results
        .iter()
        .map(|r| (r.server_id.as_str(), r.title.as_str()))
        .collect();
    assert_eq!(
        titles,
        vec![("S1", "Sepsis management"), ("WHO", "Sepsis in children")]
    );
}

#[tokio::test(start_paused = true)]
async fn test_unknown_country_uses_default_region() {
    let transport = ScriptedTransport::new().on(
        "WHO",
        10,
        vec![Step::Records(json!([{"title": "Hand hygiene", "type": "patient_education"}]))],
    );
    let (engine, transport) = engine(transport);

    let query = SearchQuery::new(
        "ZZ",
        [ResourceType::PatientEducation],
        QueryPayload::new("hygiene"),
    );
    let aggregate = engine.search(&query).await.unwrap();
    assert_eq!(aggregate.region_id, "GLOBAL");
    assert_eq!(aggregate.results.len(), 1);
    assert_eq!(transport.calls_to("S1"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_request_carries_query_arguments() {
    let transport = ScriptedTransport::new()
        .on("S1", 1, vec![Step::Records(json!([]))])
        .on("S2", 1, vec![Step::Records(json!([]))]);
    let (engine, transport) = engine(transport);

    let query = SearchQuery::new(
        "DE",
        [ResourceType::DrugMonograph],
        QueryPayload::new("Ibuprofen").with_parameter("route", json!("oral")),
    )
    .with_max_results(4);
    engine.search(&query).await.unwrap();

    let request = &transport.requests_to("S2")[0];
    assert_eq!(request.name, "search");
    let args = request.arguments.as_ref().unwrap();
    assert_eq!(args["query"], "Ibuprofen");
    assert_eq!(args["resource_types"], json!(["drug_monograph"]));
    assert_eq!(args["max_results"], 4);
    assert_eq!(args["country_code"], "DE");
    assert_eq!(args["route"], "oral");
}

#[tokio::test(start_paused = true)]
async fn test_unfinished_branches_are_dropped_at_deadline() {
    let directory = RegionDirectory::from_config(&federation_config()).unwrap();
    let transport = Arc::new(StallingTransport::default());
    let engine = RegionalSearch::new(Arc::new(directory), transport.clone());

    let query = drug_query("Amoxicillin").with_deadline(Duration::from_millis(200));
    let aggregate = engine.search(&query).await.unwrap();
    assert!(aggregate
        .outcomes
        .iter()
        .all(|o| o.status == OutcomeStatus::Timeout));

    // let the runtime reap the aborted tasks
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(transport.started(), 2);
    assert_eq!(transport.dropped(), 2);
    assert_eq!(transport.completed(), 0);

    tokio::time::sleep(Duration::from_secs(7200)).await;
    assert_eq!(transport.completed(), 0);
    assert_eq!(transport.dropped(), 2);
}
