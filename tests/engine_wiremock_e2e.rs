use std::sync::{Arc, Mutex};
use std::time::Duration;

use scenario_harness::budget::{build_payload, BudgetConfig};
use scenario_harness::engine::{EngineError, GenerationConfig, ScenarioEngine, EXIT_COVERAGE_FAILED};
use scenario_harness::gap_fill::GapFillConfig;
use scenario_harness::gateway::{GatewayConfig, NoopUsageSink, ProviderGateway};
use scenario_harness::prompts;
use scenario_harness::trace::{JsonlResponseSink, ResponseSink};
use serde_json::{json, Value};
use tempfile::tempdir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn scenario(id: i64) -> Value {
    json!({
        "inventory_id": id,
        "main_function": "Home",
        "test_title": format!("Case {id}"),
        "scope": if id % 2 == 0 { "E2E" } else { "System" },
        "formatted_description": "Given a user, when they open Home, then the rail loads",
        "automation_candidate": false,
        "automation_type": "none",
        "automation_code": ""
    })
}

fn completion(content: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{ "message": { "content": content }, "finish_reason": "stop" }],
        "usage": { "prompt_tokens": 100, "completion_tokens": 200 }
    }))
}

fn user_text(request: &Request) -> String {
    let body: Value = serde_json::from_slice(&request.body).unwrap_or_default();
    body["messages"]
        .as_array()
        .and_then(|msgs| msgs.iter().find(|m| m["role"] == "user"))
        .and_then(|m| m["content"].as_str())
        .unwrap_or_default()
        .to_string()
}

fn requested_ids(user: &str) -> Vec<i64> {
    user.split("EXACTLY in this list: ")
        .nth(1)
        .and_then(|rest| rest.lines().next())
        .map(|csv| csv.split(',').filter_map(|s| s.trim().parse().ok()).collect())
        .unwrap_or_default()
}

/// Initial call covers ids 1 and 3 of 3; repair calls answer exactly the
/// ids they are asked for, unless `repair_answers` is off.
struct ScriptedService {
    repair_answers: bool,
    repair_requests: Mutex<Vec<Vec<i64>>>,
}

impl Respond for ScriptedService {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let user = user_text(request);
        if user.contains("EXACTLY in this list") {
            let ids = requested_ids(&user);
            self.repair_requests.lock().unwrap().push(ids.clone());
            if !self.repair_answers {
                return completion("I could not comply.".to_string());
            }
            let arr: Vec<Value> = ids.into_iter().map(scenario).collect();
            return completion(format!(
                "JSON_START\n{}\nJSON_END",
                serde_json::to_string(&arr).unwrap()
            ));
        }
        let arr = vec![scenario(1), scenario(3)];
        completion(format!(
            "1. Rail ordering\n2. Focus moves right\n3. Empty rail hidden\nTOTAL_INVENTARIO: 3\nJSON_START\n```json\n{}\n```\nJSON_END",
            serde_json::to_string(&arr).unwrap()
        ))
    }
}

async fn engine_for(server: &MockServer, gap_fill: GapFillConfig) -> ScenarioEngine {
    let gateway = ProviderGateway::connect(
        "sk-test",
        server.uri(),
        Duration::from_secs(5),
        Arc::new(NoopUsageSink),
        GatewayConfig {
            jitter_seed: Some(1),
            ..GatewayConfig::default()
        },
    )
    .unwrap();
    ScenarioEngine::new(Arc::new(gateway), GenerationConfig::default(), gap_fill)
}

fn payload() -> scenario_harness::ContextPayload {
    build_payload(
        &BudgetConfig::default(),
        &prompts::initial_system(),
        "Ticket: TV-1\nSummary: Home rail\nDescription:\nRails are ordered by rank.",
        "",
        "",
    )
}

#[tokio::test]
async fn engine_repairs_missing_id_and_records_every_response() {
    let server = MockServer::start().await;
    let service = Arc::new(ScriptedService {
        repair_answers: true,
        repair_requests: Mutex::new(Vec::new()),
    });
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(SharedResponder(service.clone()))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let trace_path = dir.path().join("responses.jsonl");
    let (sink, worker) = JsonlResponseSink::new(&trace_path).unwrap();

    let engine = engine_for(&server, GapFillConfig::default())
        .await
        .with_response_sink(Arc::new(sink) as Arc<dyn ResponseSink>);
    let outcome = engine.generate(&payload()).await.unwrap();
    drop(engine);
    worker.join().unwrap();

    assert_eq!(outcome.n_total, 3);
    let ids: Vec<i64> = outcome.scenarios.iter().map(|s| s.inventory_id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert!(outcome.inventory_text.contains("3. Empty rail hidden"));
    assert_eq!(*service.repair_requests.lock().unwrap(), vec![vec![2]]);

    let raw = std::fs::read_to_string(&trace_path).unwrap();
    let stages: Vec<String> = raw
        .lines()
        .map(|l| serde_json::from_str::<Value>(l).unwrap()["stage"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(stages, vec!["initial", "missing_attempt_1"]);
}

#[tokio::test]
async fn engine_reports_coverage_failure_with_partial_data() {
    let server = MockServer::start().await;
    let service = Arc::new(ScriptedService {
        repair_answers: false,
        repair_requests: Mutex::new(Vec::new()),
    });
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(SharedResponder(service.clone()))
        .mount(&server)
        .await;

    let engine = engine_for(
        &server,
        GapFillConfig {
            max_attempts: 2,
            ..GapFillConfig::default()
        },
    )
    .await;
    let err = engine.generate(&payload()).await.unwrap_err();

    assert!(matches!(err, EngineError::CoverageMismatch { .. }), "{err:?}");
    assert_eq!(err.exit_code(), EXIT_COVERAGE_FAILED);
    let partial = err.partial().unwrap();
    assert_eq!(partial.scenarios.len(), 2);
    // Two bounded attempts plus the final best-effort request.
    assert_eq!(service.repair_requests.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn missing_total_is_its_own_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(completion("Here are some tests, no inventory.".to_string()))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine_for(&server, GapFillConfig::default()).await;
    let err = engine.generate(&payload()).await.unwrap_err();
    assert!(matches!(err, EngineError::MissingInventoryTotal), "{err:?}");
    assert_eq!(err.exit_code(), 21);
}

struct SharedResponder(Arc<ScriptedService>);

impl Respond for SharedResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        self.0.respond(request)
    }
}
