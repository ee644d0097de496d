//! Reasoning backend used by the coordinator to answer chat turns.
//!
//! The coordinator treats it as opaque text-in/text-out. The production
//! client speaks the Anthropic-compatible Messages API:
//!
//! ```text
//! POST {base_url}/v1/messages
//!   x-api-key: <key>
//!   anthropic-version: 2023-06-01
//! ```

use std::time::Duration;

use async_trait::async_trait;

use crate::config::ReasoningConfig;
use crate::error::ServerError;

/// Per-call knobs for [`ReasoningClient::generate`].
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub system_prompt: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

#[async_trait]
pub trait ReasoningClient: Send + Sync {
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String, ServerError>;
}

pub struct AnthropicReasoningClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicReasoningClient {
    /// Build a client from config. Returns `None` when no API key is set.
    pub fn from_config(config: &ReasoningConfig) -> Option<Self> {
        let api_key = config.api_key()?.to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Some(Self {
            client,
            base_url: config.base_url.clone(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ReasoningClient for AnthropicReasoningClient {
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String, ServerError> {
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));

        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": options.max_tokens.unwrap_or(self.max_tokens),
            "messages": [
                {
                    "role": "user",
                    "content": prompt
                }
            ]
        });

        if let Some(system) = options.system_prompt.as_ref().filter(|s| !s.is_empty()) {
            body["system"] = serde_json::Value::String(system.clone());
        }
        if let Some(temp) = options.temperature {
            body["temperature"] = serde_json::Value::Number(
                serde_json::Number::from_f64(temp).unwrap_or_else(|| serde_json::Number::from(0)),
            );
        }

        tracing::debug!("[Reasoning] Calling {} (model: {})", url, self.model);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ServerError::Reasoning(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| ServerError::Reasoning(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(ServerError::Reasoning(format!(
                "API returned {}: {}",
                status,
                crate::transport::http::truncate(&response_text, 300)
            )));
        }

        let json: serde_json::Value = serde_json::from_str(&response_text)
            .map_err(|e| ServerError::Reasoning(format!("Failed to parse response JSON: {}", e)))?;

        extract_text(&json)
            .ok_or_else(|| ServerError::Reasoning("response contained no text content".to_string()))
    }
}

/// Join the `text` blocks of a Messages API response.
fn extract_text(json: &serde_json::Value) -> Option<String> {
    json.get("content")
        .and_then(|c| c.as_array())
        .and_then(|arr| {
            arr.iter()
                .filter_map(|block| {
                    if block.get("type").and_then(|t| t.as_str()) == Some("text") {
                        block.get("text").and_then(|t| t.as_str()).map(|s| s.to_string())
                    } else {
                        None
                    }
                })
                .reduce(|a, b| format!("{}\n{}", a, b))
        })
}
