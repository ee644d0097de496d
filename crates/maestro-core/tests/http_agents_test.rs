//! Integration test: drive the HTTP transport against mock agents served by axum.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Map, Value};

use maestro_core::config::{AgentSeed, MaestroConfig, ProbeConfig};
use maestro_core::directory::AgentDirectory;
use maestro_core::models::agent::{AgentDescriptor, Reachability};
use maestro_core::models::workflow::WorkflowStatus;
use maestro_core::transport::{AgentOutcome, AgentRequest, AgentTransport, HttpAgentTransport};
use maestro_core::{AppStateInner, ServerError};

type Recorded = Arc<Mutex<Vec<(String, Value)>>>;

const MARKET_STREAM: &str = "event: message\n\
data: {\"kind\":\"status-update\",\"status\":{\"state\":\"working\",\"message\":\"searching\"}}\n\n\
data: {\"kind\":\"artifact-update\",\"artifact\":{\"parts\":[{\"kind\":\"text\",\"text\":\"3 offers found\"},{\"kind\":\"data\",\"data\":{\"best\":{\"seller\":\"acme\",\"price\":90}}}]}}\n\n\
data: {\"kind\":\"status-update\",\"status\":{\"state\":\"completed\"},\"final\":true}\n\n";

async fn ledger_task(State(recorded): State<Recorded>, Json(body): Json<Value>) -> Json<Value> {
    recorded.lock().unwrap().push(("ledger".into(), body.clone()));
    Json(json!({
        "success": true,
        "message": format!("wallet {} holds 120 credits", body["context"]["wallet"].as_str().unwrap_or("?")),
        "data": { "amount": 120 }
    }))
}

async fn market_task(State(recorded): State<Recorded>, Json(body): Json<Value>) -> impl IntoResponse {
    recorded.lock().unwrap().push(("market".into(), body));
    ([(header::CONTENT_TYPE, "text/event-stream")], MARKET_STREAM)
}

async fn pay_task(State(recorded): State<Recorded>, Json(body): Json<Value>) -> Json<Value> {
    recorded.lock().unwrap().push(("pay".into(), body));
    Json(json!({
        "id": "task-9",
        "kind": "task",
        "status": { "state": "completed" },
        "artifacts": [{ "parts": [{ "kind": "text", "text": "paid 90 to acme" }] }]
    }))
}

async fn broken_task() -> impl IntoResponse {
    (StatusCode::INTERNAL_SERVER_ERROR, "ledger offline")
}

/// Start the mock agents on a random port and return the base URL.
async fn start_mock_agents() -> (String, Recorded) {
    let recorded: Recorded = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/ledger/health", get(|| async { "ok" }))
        .route("/ledger/tasks", post(ledger_task))
        .route(
            "/market/.well-known/agent.json",
            get(|| async { Json(json!({ "name": "market", "skills": ["offers"] })) }),
        )
        .route("/market/tasks", post(market_task))
        .route("/pay/health", get(|| async { "ok" }))
        .route("/pay/tasks", post(pay_task))
        .route(
            "/sleepy/health",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "ok"
            }),
        )
        .route(
            "/sleepy/.well-known/agent.json",
            get(|| async { Json(json!({ "name": "sleepy" })) }),
        )
        .route("/broken/health", get(|| async { "ok" }))
        .route("/broken/tasks", post(broken_task))
        .with_state(recorded.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://{}", addr), recorded)
}

fn fast_probes() -> ProbeConfig {
    ProbeConfig {
        timeout_secs: 2,
        ..ProbeConfig::default()
    }
}

#[tokio::test]
async fn test_probe_uses_health_then_agent_card() {
    let (base, _) = start_mock_agents().await;
    let transport = Arc::new(HttpAgentTransport::new(fast_probes()));
    let directory = AgentDirectory::new(transport, Duration::from_secs(3));

    for name in ["ledger", "market", "ghost"] {
        directory
            .register(AgentDescriptor::new(name, name, format!("{}/{}", base, name)))
            .await;
    }
    let reports = directory.probe_all().await;
    let states: Vec<_> = reports.iter().map(|r| (r.agent_id.as_str(), r.reachability)).collect();
    assert_eq!(
        states,
        vec![
            ("ledger", Reachability::Reachable),
            ("market", Reachability::Reachable),
            ("ghost", Reachability::Unreachable),
        ]
    );

    let ghost = directory.get("ghost").await.unwrap();
    let summary = ghost.last_probe_summary();
    assert!(summary.contains("404"), "unexpected probe summary: {}", summary);
}

#[tokio::test]
async fn test_hanging_health_endpoint_still_falls_back_to_agent_card() {
    let (base, _) = start_mock_agents().await;
    let probes = ProbeConfig {
        timeout_secs: 1,
        ..ProbeConfig::default()
    };
    let transport = Arc::new(HttpAgentTransport::new(probes.clone()));
    let directory = AgentDirectory::new(transport, probes.timeout());

    directory
        .register(AgentDescriptor::new("sleepy", "Sleepy", format!("{}/sleepy", base)))
        .await;
    let reports = directory.probe_all().await;

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].reachability, Reachability::Reachable);
}

#[tokio::test]
async fn test_json_response_and_request_body() {
    let (base, recorded) = start_mock_agents().await;
    let transport = HttpAgentTransport::new(fast_probes());
    let agent = AgentDescriptor::new("ledger", "Ledger", format!("{}/ledger/", base));

    let mut context = Map::new();
    context.insert("wallet".into(), json!("w-7"));
    let request = AgentRequest::new("check_balance", "How much?").with_context(context);

    let outcome = transport.send(&agent, &request).await.unwrap();
    assert_eq!(
        outcome,
        AgentOutcome::Completed {
            text: "wallet w-7 holds 120 credits".into(),
            data: Some(json!({ "amount": 120 })),
        }
    );

    let recorded = recorded.lock().unwrap();
    let (_, body) = &recorded[0];
    assert_eq!(body["request"], "How much?");
    assert_eq!(body["action"], "check_balance");
    assert_eq!(body["context"]["wallet"], "w-7");
}

#[tokio::test]
async fn test_event_stream_response() {
    let (base, _) = start_mock_agents().await;
    let transport = HttpAgentTransport::new(fast_probes());
    let agent = AgentDescriptor::new("market", "Market", format!("{}/market", base));

    let outcome = transport
        .send(&agent, &AgentRequest::new("discover_offers", "gpu"))
        .await
        .unwrap();
    match outcome {
        AgentOutcome::Completed { text, data } => {
            assert_eq!(text, "3 offers found");
            assert_eq!(data.unwrap()["best"]["seller"], "acme");
        }
        other => panic!("expected completion, got {:?}", other),
    }
}

#[tokio::test]
async fn test_error_status_is_a_failed_outcome() {
    let (base, _) = start_mock_agents().await;
    let transport = HttpAgentTransport::new(fast_probes());
    let agent = AgentDescriptor::new("broken", "Broken", format!("{}/broken", base));

    let outcome = transport
        .send(&agent, &AgentRequest::new("check_balance", "?"))
        .await
        .unwrap();
    match outcome {
        AgentOutcome::Failed { reason } => {
            assert!(reason.contains("500"));
            assert!(reason.contains("ledger offline"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_connection_failure_is_a_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = HttpAgentTransport::new(fast_probes());
    let agent = AgentDescriptor::new("gone", "Gone", format!("http://{}", addr));
    let err = transport
        .send(&agent, &AgentRequest::new("ping", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::Transport(_)));
    assert!(transport.probe(&agent).await.is_err());
}

#[tokio::test]
async fn test_resource_purchase_end_to_end() {
    let (base, recorded) = start_mock_agents().await;

    let mut config = MaestroConfig::default();
    config.probe = fast_probes();
    for (id, path) in [
        ("balance-agent", "ledger"),
        ("negotiation-agent", "market"),
        ("payment-agent", "pay"),
    ] {
        config.agents.push(AgentSeed {
            id: id.into(),
            name: None,
            endpoint: format!("{}/{}", base, path),
            capabilities: vec![],
            task_path: "/tasks".into(),
        });
    }

    let transport = Arc::new(HttpAgentTransport::new(config.probe.clone()));
    let state = AppStateInner::new(config, transport, None);
    state.start().await;

    let mut context = Map::new();
    context.insert("resource".into(), json!("gpu-hours"));
    context.insert("wallet".into(), json!("w-1"));
    let instance = state
        .coordinator
        .run_workflow("resource-purchase", context)
        .await
        .unwrap();

    assert_eq!(instance.overall_status, WorkflowStatus::Completed);
    assert_eq!(instance.context["balance"], json!({ "amount": 120 }));
    assert_eq!(instance.step("payment").unwrap().output.as_deref(), Some("paid 90 to acme"));

    let order: Vec<String> = recorded.lock().unwrap().iter().map(|(a, _)| a.clone()).collect();
    assert_eq!(order, vec!["ledger", "market", "pay"]);

    let payment_request = recorded.lock().unwrap()[2].1["request"].as_str().unwrap().to_string();
    assert!(payment_request.contains("wallet w-1 holds 120 credits"));
    assert!(payment_request.contains("3 offers found"));

    state.shutdown().await;
}
