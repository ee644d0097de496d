//! Response-shape adapters.
//!
//! Agents answer in one of three shapes:
//!
//! - a single JSON object — either a task (`{ status: { state }, artifacts }`),
//!   a JSON-RPC envelope wrapping one, or a plain `{ success, message, data }`
//! - a Server-Sent Events stream whose `data:` lines are JSON events
//! - newline-delimited JSON events
//!
//! Streamed events carry a `kind` discriminator: `status-update`,
//! `artifact-update`, or a terminal `message` / `task`.

use serde_json::Value;

use super::AgentOutcome;

const FAILED_STATES: &[&str] = &["failed", "rejected", "canceled", "cancelled"];

/// Convert a raw successful-status HTTP body into an outcome.
pub fn outcome_from_body(content_type: Option<&str>, body: &str) -> AgentOutcome {
    let content_type = content_type.unwrap_or("").to_ascii_lowercase();
    let trimmed = body.trim();

    if content_type.contains("text/event-stream")
        || trimmed.starts_with("data:")
        || trimmed.starts_with("event:")
    {
        return outcome_from_events(parse_sse_events(body));
    }

    if content_type.contains("ndjson") || looks_like_ndjson(trimmed) {
        let events = trimmed
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str::<Value>(l).ok())
            .collect();
        return outcome_from_events(events);
    }

    if trimmed.is_empty() {
        return AgentOutcome::failed("agent returned an empty response");
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(json) => outcome_from_object(&json),
        // Plain-text answer from a successful call
        Err(_) => AgentOutcome::completed(trimmed),
    }
}

/// Interpret a single JSON response object.
pub fn outcome_from_object(json: &Value) -> AgentOutcome {
    // JSON-RPC envelope
    if let Some(err) = json.get("error").filter(|e| e.is_object()) {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("agent returned a JSON-RPC error");
        return AgentOutcome::failed(message);
    }
    if let Some(result) = json.get("result").filter(|r| r.is_object()) {
        return outcome_from_object(result);
    }

    if json.get("kind").and_then(|k| k.as_str()).is_some() {
        return outcome_from_events(vec![json.clone()]);
    }

    if json.get("status").map(|s| s.is_object()).unwrap_or(false) {
        let mut fold = EventFold::default();
        fold.absorb_task(json);
        return fold.finish();
    }

    // Plain `{ success, message, data, error }`
    let success = json.get("success").and_then(|s| s.as_bool()).unwrap_or(true);
    let text = ["message", "text", "response", "summary"]
        .iter()
        .find_map(|k| json.get(*k).and_then(|v| v.as_str()))
        .map(|s| s.to_string());

    if !success {
        let reason = json
            .get("error")
            .and_then(|e| e.as_str())
            .map(|s| s.to_string())
            .or(text)
            .unwrap_or_else(|| "agent reported failure".to_string());
        return AgentOutcome::failed(reason);
    }

    match (text, json.get("data").cloned()) {
        (Some(text), data) => AgentOutcome::Completed { text, data },
        (None, Some(data)) => AgentOutcome::Completed {
            text: String::new(),
            data: Some(data),
        },
        (None, None) => AgentOutcome::Completed {
            text: String::new(),
            data: Some(json.clone()),
        },
    }
}

/// Fold a sequence of `kind`-tagged events into one outcome.
pub fn outcome_from_events(events: Vec<Value>) -> AgentOutcome {
    if events.is_empty() {
        return AgentOutcome::failed("agent event stream contained no events");
    }
    let mut fold = EventFold::default();
    for event in &events {
        fold.absorb(event);
    }
    fold.finish()
}

/// Split an SSE body into its JSON `data:` payloads.
pub fn parse_sse_events(body: &str) -> Vec<Value> {
    let mut events = Vec::new();
    let mut data_lines: Vec<&str> = Vec::new();

    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            flush_sse_event(&mut data_lines, &mut events);
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    flush_sse_event(&mut data_lines, &mut events);
    events
}

fn flush_sse_event(lines: &mut Vec<&str>, events: &mut Vec<Value>) {
    if lines.is_empty() {
        return;
    }
    let payload = lines.join("\n");
    lines.clear();
    if payload.trim() == "[DONE]" {
        return;
    }
    match serde_json::from_str::<Value>(&payload) {
        Ok(v) => events.push(v),
        Err(e) => tracing::debug!("[AgentTransport] Skipping non-JSON SSE payload: {}", e),
    }
}

fn looks_like_ndjson(body: &str) -> bool {
    let mut lines = body.lines().filter(|l| !l.trim().is_empty());
    let first = lines.next();
    let second = lines.next();
    match (first, second) {
        (Some(a), Some(b)) => {
            serde_json::from_str::<Value>(a).is_ok() && serde_json::from_str::<Value>(b).is_ok()
        }
        _ => false,
    }
}

#[derive(Default)]
struct EventFold {
    texts: Vec<String>,
    data: Vec<Value>,
    status_text: Option<String>,
    failure: Option<String>,
}

impl EventFold {
    fn absorb(&mut self, event: &Value) {
        // JSON-RPC streaming responses wrap each event in `result`
        if let Some(result) = event.get("result").filter(|r| r.is_object()) {
            return self.absorb(result);
        }
        if let Some(err) = event.get("error").filter(|e| e.is_object()) {
            let message = err
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("agent returned a JSON-RPC error");
            self.failure = Some(message.to_string());
            return;
        }

        match event.get("kind").and_then(|k| k.as_str()).unwrap_or("") {
            "status-update" => {
                if let Some(status) = event.get("status") {
                    self.absorb_status(status);
                }
            }
            "artifact-update" => {
                if let Some(artifact) = event.get("artifact") {
                    self.absorb_parts(artifact.get("parts"));
                }
            }
            "message" => self.absorb_parts(event.get("parts")),
            "task" => self.absorb_task(event),
            other => {
                tracing::debug!("[AgentTransport] Ignoring event of kind '{}'", other);
            }
        }
    }

    fn absorb_task(&mut self, task: &Value) {
        if let Some(artifacts) = task.get("artifacts").and_then(|a| a.as_array()) {
            for artifact in artifacts {
                self.absorb_parts(artifact.get("parts"));
            }
        }
        if let Some(status) = task.get("status") {
            self.absorb_status(status);
        }
    }

    fn absorb_status(&mut self, status: &Value) {
        let state = status.get("state").and_then(|s| s.as_str()).unwrap_or("");
        let message = status.get("message").and_then(message_text);
        if FAILED_STATES.contains(&state) {
            self.failure = Some(
                message
                    .clone()
                    .unwrap_or_else(|| format!("agent reported state '{}'", state)),
            );
        }
        if let Some(text) = message {
            self.status_text = Some(text);
        }
    }

    fn absorb_parts(&mut self, parts: Option<&Value>) {
        let Some(parts) = parts.and_then(|p| p.as_array()) else {
            return;
        };
        for part in parts {
            let kind = part
                .get("kind")
                .or_else(|| part.get("type"))
                .and_then(|k| k.as_str())
                .unwrap_or("");
            match kind {
                "text" => {
                    if let Some(t) = part.get("text").and_then(|t| t.as_str()) {
                        self.texts.push(t.to_string());
                    }
                }
                "data" => {
                    if let Some(d) = part.get("data") {
                        self.data.push(d.clone());
                    }
                }
                _ => {}
            }
        }
    }

    fn finish(mut self) -> AgentOutcome {
        if let Some(reason) = self.failure {
            return AgentOutcome::failed(reason);
        }
        let text = if self.texts.is_empty() {
            self.status_text.unwrap_or_default()
        } else {
            self.texts.join("\n")
        };
        let data = match self.data.len() {
            0 => None,
            1 => self.data.pop(),
            _ => Some(Value::Array(self.data)),
        };
        AgentOutcome::Completed { text, data }
    }
}

fn message_text(message: &Value) -> Option<String> {
    if let Some(s) = message.as_str() {
        return Some(s.to_string());
    }
    let texts: Vec<&str> = message
        .get("parts")?
        .as_array()?
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    if texts.is_empty() {
        None
    } else {
        Some(texts.join("\n"))
    }
}
