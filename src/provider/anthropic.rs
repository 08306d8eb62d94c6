//! Anthropic Messages API backend.

use async_trait::async_trait;
use std::time::Duration;

use super::{ModelCapability, ModelResponse};
use crate::error::CapabilityError;

const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicCapability {
    id: String,
    api_key: String,
    model: String,
    endpoint: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl AnthropicCapability {
    pub fn new(id: String, api_key: String, model: String, timeout: Duration) -> Self {
        Self {
            id,
            api_key,
            model,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout,
            client: reqwest::Client::new(),
        }
    }

    /// Override the endpoint (used by tests against a mock server).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl ModelCapability for AnthropicCapability {
    fn id(&self) -> &str {
        &self.id
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn invoke(
        &self,
        prompt: &str,
        schema_hint: &str,
    ) -> Result<ModelResponse, CapabilityError> {
        let payload = serde_json::json!({
            "model": self.model,
            "max_tokens": 4096,
            "temperature": 0.2,
            "system": format!("Respond with JSON only, conforming to this schema:\n{schema_hint}"),
            "messages": [{
                "role": "user",
                "content": prompt,
            }]
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(CapabilityError::Status { status, body });
        }

        let body: serde_json::Value = resp.json().await?;
        let text = body["content"][0]["text"].as_str().unwrap_or_default();
        if text.is_empty() {
            return Err(CapabilityError::EmptyResponse);
        }

        let input_tokens = body["usage"]["input_tokens"].as_u64();
        let output_tokens = body["usage"]["output_tokens"].as_u64();

        Ok(match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => ModelResponse {
                text: text.to_string(),
                input_tokens: input,
                output_tokens: output,
            },
            _ => ModelResponse::with_estimated_usage(text.to_string(), prompt.len()),
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn capability(server_uri: &str) -> AnthropicCapability {
        AnthropicCapability::new(
            "claude-main".into(),
            "test-key".into(),
            "claude-sonnet-4-5".into(),
            Duration::from_secs(2),
        )
        .with_endpoint(format!("{server_uri}/v1/messages"))
    }

    #[tokio::test]
    async fn invoke_parses_text_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "{\"summary\": \"ok\"}"}],
                "usage": {"input_tokens": 120, "output_tokens": 30}
            })))
            .mount(&server)
            .await;

        let resp = capability(&server.uri())
            .invoke("analyze this", "{}")
            .await
            .unwrap();
        assert_eq!(resp.text, "{\"summary\": \"ok\"}");
        assert_eq!(resp.input_tokens, 120);
        assert_eq!(resp.output_tokens, 30);
    }

    #[tokio::test]
    async fn invoke_surfaces_http_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let err = capability(&server.uri())
            .invoke("analyze", "{}")
            .await
            .unwrap_err();
        match err {
            CapabilityError::Status { status, .. } => assert_eq!(status, 429),
            other => panic!("expected status error, got {other}"),
        }
    }

    #[tokio::test]
    async fn invoke_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(10))
                    .set_body_json(serde_json::json!({"content": []})),
            )
            .mount(&server)
            .await;

        let cap = AnthropicCapability::new(
            "claude-main".into(),
            "k".into(),
            "claude-sonnet-4-5".into(),
            Duration::from_millis(100),
        )
        .with_endpoint(format!("{}/v1/messages", server.uri()));

        let err = cap.invoke("analyze", "{}").await.unwrap_err();
        assert!(matches!(err, CapabilityError::Timeout));
    }

    #[tokio::test]
    async fn empty_content_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [], "usage": {}
            })))
            .mount(&server)
            .await;

        let err = capability(&server.uri())
            .invoke("analyze", "{}")
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::EmptyResponse));
    }
}
