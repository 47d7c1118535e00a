use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use crate::ProviderClient;
use remorph_types::{RemorphError, Result};

/// Replies are whole refactored modules, but never book-length; the cap is
/// deliberately fixed rather than configurable.
const MAX_TOKENS: u32 = 1000;
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// AnthropicClient
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AnthropicClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com".to_string(),
            model: model.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn transport_error(&self, e: reqwest::Error) -> RemorphError {
        if e.is_timeout() {
            RemorphError::ProviderTimeout {
                provider: "anthropic".into(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            RemorphError::Provider {
                provider: "anthropic".into(),
                status: 0,
                message: e.to_string(),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Request / response translation
// ---------------------------------------------------------------------------

fn build_request_body(model: &str, prompt: &str, system: Option<&str>) -> serde_json::Value {
    let mut body = json!({
        "model": model,
        "max_tokens": MAX_TOKENS,
        "messages": [
            { "role": "user", "content": prompt }
        ],
    });
    if let Some(system) = system {
        body["system"] = json!(system);
    }
    body
}

/// The reply is the first `text` block of `content`.
fn parse_response(body: &serde_json::Value) -> Result<String> {
    let parts = body["content"]
        .as_array()
        .ok_or_else(|| RemorphError::Provider {
            provider: "anthropic".into(),
            status: 0,
            message: "Missing content array in reply".into(),
        })?;

    parts
        .iter()
        .find_map(|p| match p["type"].as_str() {
            Some("text") => p["text"].as_str().map(String::from),
            _ => None,
        })
        .ok_or_else(|| RemorphError::Provider {
            provider: "anthropic".into(),
            status: 0,
            message: "No text block in reply".into(),
        })
}

fn map_error(status: reqwest::StatusCode, body: &str) -> RemorphError {
    let status_u16 = status.as_u16();
    match status_u16 {
        401 | 403 => RemorphError::Auth {
            provider: "anthropic".into(),
        },
        _ => RemorphError::Provider {
            provider: "anthropic".into(),
            status: status_u16,
            message: extract_error_message(body),
        },
    }
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.to_string())
}

// ---------------------------------------------------------------------------
// ProviderClient implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ProviderClient for AnthropicClient {
    async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String> {
        let body = build_request_body(&self.model, prompt, system);
        let url = format!("{}/v1/messages", self.base_url);

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        let response_body = resp.text().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            return Err(map_error(status, &response_body));
        }

        let json: serde_json::Value =
            serde_json::from_str(&response_body).map_err(|e| RemorphError::Provider {
                provider: "anthropic".into(),
                status: status.as_u16(),
                message: format!("Failed to parse response JSON: {e}"),
            })?;

        parse_response(&json)
    }

    /// A minimal one-token round trip; the cheapest way the API can tell us
    /// the key and model are usable.
    async fn test_connection(&self) -> bool {
        let body = json!({
            "model": self.model,
            "max_tokens": 1,
            "messages": [ { "role": "user", "content": "Hi" } ],
        });
        let url = format!("{}/v1/messages", self.base_url);

        match self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .timeout(PROBE_TIMEOUT)
            .json(&body)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "Anthropic probe rejected");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Anthropic unreachable");
                false
            }
        }
    }

    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
