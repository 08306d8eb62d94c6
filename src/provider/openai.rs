//! OpenAI chat-completions backend.

use async_trait::async_trait;
use std::time::Duration;

use super::{ModelCapability, ModelResponse};
use crate::error::CapabilityError;

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiCapability {
    id: String,
    api_key: String,
    model: String,
    endpoint: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenAiCapability {
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
impl ModelCapability for OpenAiCapability {
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
            "temperature": 0.2,
            "max_tokens": 4096,
            "response_format": {"type": "json_object"},
            "messages": [
                {
                    "role": "system",
                    "content": format!(
                        "Respond with JSON only, conforming to this schema:\n{schema_hint}"
                    ),
                },
                {"role": "user", "content": prompt}
            ]
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
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
        let text = body["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default();
        if text.is_empty() {
            return Err(CapabilityError::EmptyResponse);
        }

        let input_tokens = body["usage"]["prompt_tokens"].as_u64();
        let output_tokens = body["usage"]["completion_tokens"].as_u64();

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
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn capability(server_uri: &str) -> OpenAiCapability {
        OpenAiCapability::new(
            "openai-main".into(),
            "sk-test".into(),
            "gpt-4o-mini".into(),
            Duration::from_secs(2),
        )
        .with_endpoint(format!("{server_uri}/v1/chat/completions"))
    }

    #[tokio::test]
    async fn invoke_parses_choice_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "{\"summary\": \"fine\"}"}}],
                "usage": {"prompt_tokens": 55, "completion_tokens": 8}
            })))
            .mount(&server)
            .await;

        let resp = capability(&server.uri())
            .invoke("summarize", "{}")
            .await
            .unwrap();
        assert_eq!(resp.text, "{\"summary\": \"fine\"}");
        assert_eq!(resp.input_tokens, 55);
        assert_eq!(resp.output_tokens, 8);
    }

    #[tokio::test]
    async fn unauthorized_is_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .mount(&server)
            .await;

        let err = capability(&server.uri())
            .invoke("summarize", "{}")
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Status { status: 401, .. }));
    }
}
