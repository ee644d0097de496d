//! Integration test: start the Maestro HTTP server and verify API endpoints.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use maestro_core::config::{AgentSeed, MaestroConfig};
use maestro_core::models::agent::AgentDescriptor;
use maestro_core::reasoning::{GenerateOptions, ReasoningClient};
use maestro_core::state::{AppState, AppStateInner};
use maestro_core::transport::{AgentOutcome, AgentRequest, AgentTransport};
use maestro_core::ServerError;

/// Answers every call after `delay`, echoing agent and action.
struct EchoAgents {
    delay: Duration,
}

#[async_trait]
impl AgentTransport for EchoAgents {
    async fn send(
        &self,
        agent: &AgentDescriptor,
        request: &AgentRequest,
    ) -> Result<AgentOutcome, ServerError> {
        tokio::time::sleep(self.delay).await;
        Ok(AgentOutcome::completed(format!(
            "{} did {}",
            agent.id, request.action
        )))
    }

    async fn probe(&self, agent: &AgentDescriptor) -> Result<(), String> {
        if agent.endpoint.contains("offline") {
            Err("connection refused".to_string())
        } else {
            Ok(())
        }
    }
}

struct CannedReasoning;

#[async_trait]
impl ReasoningClient for CannedReasoning {
    async fn generate(&self, prompt: &str, _options: &GenerateOptions) -> Result<String, ServerError> {
        let last_line = prompt.lines().last().unwrap_or_default();
        Ok(format!("noted ({})", last_line))
    }
}

async fn start_test_server(delay: Duration) -> (String, AppState) {
    let mut config = MaestroConfig::default();
    for id in ["balance-agent", "negotiation-agent", "payment-agent"] {
        config.agents.push(AgentSeed {
            id: id.into(),
            name: None,
            endpoint: format!("http://{}.test", id),
            capabilities: vec![],
            task_path: "/tasks".into(),
        });
    }

    let state: AppState = Arc::new(AppStateInner::new(
        config,
        Arc::new(EchoAgents { delay }),
        Some(Arc::new(CannedReasoning)),
    ));
    state.start().await;

    let app = maestro_server::build_router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give server a moment to start
    tokio::time::sleep(Duration::from_millis(100)).await;

    (format!("http://{}", addr), state)
}

#[tokio::test]
async fn test_maestro_api() {
    let (base_url, state) = start_test_server(Duration::ZERO).await;
    let client = reqwest::Client::new();

    // ── Health ──────────────────────────────────────────────────────
    let resp = client.get(format!("{}/api/health", base_url)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["agents"]["total"], 3);
    assert_eq!(body["agents"]["reachable"], 3);
    assert_eq!(body["reasoning"], true);

    // ── Agents ──────────────────────────────────────────────────────
    let body: Value = client
        .get(format!("{}/api/agents", base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["agents"].as_array().unwrap().len(), 3);
    assert_eq!(body["agents"][0]["id"], "balance-agent");

    let resp = client
        .post(format!("{}/api/agents", base_url))
        .json(&json!({
            "id": "audit-agent",
            "name": "Audit",
            "endpoint": "http://offline.test",
            "capabilities": ["audit"]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["agent"]["reachability"], "unknown");

    let resp = client
        .post(format!("{}/api/agents", base_url))
        .json(&json!({ "id": "bad", "endpoint": "ftp://nowhere" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let body: Value = client
        .post(format!("{}/api/agents/probe", base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let probes = body["probes"].as_array().unwrap();
    assert_eq!(probes.len(), 4);
    assert_eq!(probes[3]["agentId"], "audit-agent");
    assert_eq!(probes[3]["reachability"], "unreachable");

    let resp = client
        .put(format!("{}/api/agents/audit-agent/reachability", base_url))
        .json(&json!({ "reachability": "reachable" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["reachability"], "reachable");

    let resp = client
        .put(format!("{}/api/agents/audit-agent/reachability", base_url))
        .json(&json!({ "reachability": "sleepy" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .get(format!("{}/api/agents/ghost", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    // ── Direct call ─────────────────────────────────────────────────
    let body: Value = client
        .post(format!("{}/api/agents/balance-agent/call", base_url))
        .json(&json!({ "message": "balance please" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["response"], "balance-agent did message");

    let resp = client
        .post(format!("{}/api/agents/ghost/call", base_url))
        .json(&json!({ "message": "hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("ghost"));

    // ── Templates ───────────────────────────────────────────────────
    let body: Value = client
        .get(format!("{}/api/workflow-templates", base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let purchase = body["templates"]
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["name"] == "resource-purchase")
        .cloned()
        .unwrap();
    assert_eq!(purchase["requiredContext"], json!(["resource", "wallet"]));

    // ── Workflow run ────────────────────────────────────────────────
    let resp = client
        .post(format!("{}/api/workflows/run", base_url))
        .json(&json!({
            "name": "resource-purchase",
            "context": { "resource": "gpu-hours", "wallet": "w-1" }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["workflow"]["overallStatus"], "completed");
    assert_eq!(body["workflow"]["steps"][2]["output"], "payment-agent did execute_payment");
    assert!(body["summary"].as_str().unwrap().contains("resource-purchase"));
    let workflow_id = body["workflow"]["id"].as_str().unwrap().to_string();

    let resp = client
        .post(format!("{}/api/workflows/run", base_url))
        .json(&json!({ "name": "resource-purchase", "context": { "resource": "gpu-hours" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{}/api/workflows/run", base_url))
        .json(&json!({ "name": "teleport" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let body: Value = client
        .get(format!("{}/api/workflows", base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["workflows"].as_array().unwrap().len(), 1);
    assert_eq!(body["workflows"][0]["completedSteps"], 3);

    let resp = client
        .get(format!("{}/api/workflows/{}", base_url, workflow_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .post(format!("{}/api/workflows/{}/cancel", base_url, workflow_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    // ── Chat ────────────────────────────────────────────────────────
    let body: Value = client
        .post(format!("{}/api/chat", base_url))
        .json(&json!({ "sessionId": "s1", "message": "hello" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["reply"], "noted (user: hello)");

    let resp = client
        .delete(format!("{}/api/chat/s1", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .post(format!("{}/api/chat", base_url))
        .json(&json!({ "sessionId": "s1", "message": "still there?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    let resp = client
        .delete(format!("{}/api/chat/nobody", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    state.shutdown().await;
}

#[tokio::test]
async fn test_background_run_can_be_cancelled() {
    let (base_url, state) = start_test_server(Duration::from_millis(200)).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/workflows/run", base_url))
        .json(&json!({
            "name": "resource-purchase",
            "context": { "resource": "gpu-hours", "wallet": "w-1" },
            "background": true
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    let id = body["workflow"]["id"].as_str().unwrap().to_string();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let resp = client
        .post(format!("{}/api/workflows/{}/cancel", base_url, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let mut status = Value::Null;
    for _ in 0..40 {
        let body: Value = client
            .get(format!("{}/api/workflows/{}", base_url, id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        status = body["overallStatus"].clone();
        if status != "running" {
            assert_eq!(body["steps"][0]["status"], "completed");
            assert_eq!(body["steps"][2]["status"], "pending");
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(status, "cancelled");

    state.shutdown().await;
}
