use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use crate::ProviderClient;
use remorph_types::{RemorphError, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// OpenAiClient
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com".to_string(),
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
                provider: "openai".into(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            RemorphError::Provider {
                provider: "openai".into(),
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
    let mut messages: Vec<serde_json::Value> = Vec::new();
    if let Some(system) = system {
        messages.push(json!({ "role": "system", "content": system }));
    }
    messages.push(json!({ "role": "user", "content": prompt }));

    json!({
        "model": model,
        "messages": messages,
        "temperature": 0.7,
    })
}

fn parse_response(body: &serde_json::Value) -> Result<String> {
    body["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| RemorphError::Provider {
            provider: "openai".into(),
            status: 0,
            message: "Missing message content in reply".into(),
        })
}

fn map_error(status: reqwest::StatusCode, body: &str) -> RemorphError {
    let status_u16 = status.as_u16();
    match status_u16 {
        401 | 403 => RemorphError::Auth {
            provider: "openai".into(),
        },
        _ => RemorphError::Provider {
            provider: "openai".into(),
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
impl ProviderClient for OpenAiClient {
    async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String> {
        let body = build_request_body(&self.model, prompt, system);
        let url = format!("{}/v1/chat/completions", self.base_url);

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
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
                provider: "openai".into(),
                status: status.as_u16(),
                message: format!("Failed to parse response JSON: {e}"),
            })?;

        parse_response(&json)
    }

    async fn test_connection(&self) -> bool {
        let url = format!("{}/v1/models", self.base_url);
        let resp = match self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(error = %e, "OpenAI unreachable");
                return false;
            }
        };
        if !resp.status().is_success() {
            tracing::warn!(status = %resp.status(), "OpenAI model listing failed");
            return false;
        }
        let listing: serde_json::Value = match resp.json().await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "OpenAI model listing returned invalid JSON");
                return false;
            }
        };

        let known = listing["data"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m["id"].as_str())
                    .any(|id| id == self.model)
            })
            .unwrap_or(false);
        if !known {
            tracing::warn!(model = %self.model, "model not present in OpenAI listing, proceeding anyway");
        }
        true
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
