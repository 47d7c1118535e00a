use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use crate::ProviderClient;
use remorph_types::{RemorphError, Result};

/// Local models can take a long time to produce a full reply, so the
/// generate path carries a fixed, generous timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// OllamaClient
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct OllamaClient {
    client: reqwest::Client,
    host: String,
    model: String,
}

impl OllamaClient {
    pub fn new(host: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: normalize_host(host.into()),
            model: model.into(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn transport_error(&self, e: reqwest::Error) -> RemorphError {
        if e.is_timeout() {
            RemorphError::ProviderTimeout {
                provider: "ollama".into(),
                timeout_ms: REQUEST_TIMEOUT.as_millis() as u64,
            }
        } else {
            RemorphError::Provider {
                provider: "ollama".into(),
                status: 0,
                message: e.to_string(),
            }
        }
    }
}

/// Hosts are commonly given as bare `host:port`; default the scheme and
/// drop any trailing slash so URL assembly stays simple.
fn normalize_host(host: String) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

fn build_request_body(model: &str, prompt: &str, system: Option<&str>) -> serde_json::Value {
    let mut body = json!({
        "model": model,
        "prompt": prompt,
        "stream": false,
        "options": { "temperature": 0.7 },
    });
    if let Some(system) = system {
        body["system"] = json!(system);
    }
    body
}

fn parse_response(body: &serde_json::Value) -> Result<String> {
    body["response"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| RemorphError::Provider {
            provider: "ollama".into(),
            status: 0,
            message: "Missing 'response' field in reply".into(),
        })
}

fn map_error(status: reqwest::StatusCode, body: &str) -> RemorphError {
    let status_u16 = status.as_u16();
    match status_u16 {
        401 | 403 => RemorphError::Auth {
            provider: "ollama".into(),
        },
        _ => RemorphError::Provider {
            provider: "ollama".into(),
            status: status_u16,
            message: extract_error_message(body),
        },
    }
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"].as_str().map(String::from))
        .unwrap_or_else(|| body.to_string())
}

// ---------------------------------------------------------------------------
// ProviderClient implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ProviderClient for OllamaClient {
    async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String> {
        let body = build_request_body(&self.model, prompt, system);
        let url = format!("{}/api/generate", self.host);

        let resp = self
            .client
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
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
                provider: "ollama".into(),
                status: status.as_u16(),
                message: format!("Failed to parse response JSON: {e}"),
            })?;

        parse_response(&json)
    }

    async fn test_connection(&self) -> bool {
        let url = format!("{}/api/tags", self.host);
        let resp = match self.client.get(&url).timeout(PROBE_TIMEOUT).send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(host = %self.host, error = %e, "Ollama unreachable");
                return false;
            }
        };
        if !resp.status().is_success() {
            tracing::warn!(host = %self.host, status = %resp.status(), "Ollama tag listing failed");
            return false;
        }
        let tags: serde_json::Value = match resp.json().await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(host = %self.host, error = %e, "Ollama tag listing returned invalid JSON");
                return false;
            }
        };

        let available: Vec<&str> = tags["models"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m["name"].as_str())
                    .collect()
            })
            .unwrap_or_default();

        // An unknown model name is a warning, not a failure; the server may
        // pull it on demand.
        if !available.iter().any(|name| *name == self.model) {
            tracing::warn!(
                model = %self.model,
                available = %available.join(", "),
                "model not present in Ollama tag list, proceeding anyway"
            );
        }
        true
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
