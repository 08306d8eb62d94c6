//! Google Gemini generateContent backend.

use async_trait::async_trait;
use std::time::Duration;

use super::{ModelCapability, ModelResponse};
use crate::error::CapabilityError;

pub struct GeminiCapability {
    id: String,
    api_key: String,
    model: String,
    endpoint: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl GeminiCapability {
    pub fn new(id: String, api_key: String, model: String, timeout: Duration) -> Self {
        Self {
            id,
            endpoint: format!(
                "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
                model
            ),
            api_key,
            model,
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
impl ModelCapability for GeminiCapability {
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
            "contents": [{
                "parts": [{ "text": format!(
                    "{prompt}\n\nRespond with JSON only, conforming to this schema:\n{schema_hint}"
                )}]
            }],
            "generationConfig": {
                "temperature": 0.2,
                "maxOutputTokens": 4096,
                "responseMimeType": "application/json"
            }
        });

        let url = format!("{}?key={}", self.endpoint, self.api_key);
        let resp = self
            .client
            .post(&url)
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
        let text = body["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .unwrap_or_default();
        if text.is_empty() {
            return Err(CapabilityError::EmptyResponse);
        }

        let input_tokens = body["usageMetadata"]["promptTokenCount"].as_u64();
        let output_tokens = body["usageMetadata"]["candidatesTokenCount"].as_u64();

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

    #[tokio::test]
    async fn invoke_parses_candidates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{
                    "content": {"parts": [{"text": "{\"clarity\": 80, \"missing\": []}"}]}
                }],
                "usageMetadata": {"promptTokenCount": 90, "candidatesTokenCount": 12}
            })))
            .mount(&server)
            .await;

        let cap = GeminiCapability::new(
            "gemini-main".into(),
            "k".into(),
            "gemini-2.5-flash".into(),
            Duration::from_secs(2),
        )
        .with_endpoint(format!("{}/generate", server.uri()));

        let resp = cap.invoke("evaluate", "{}").await.unwrap();
        assert!(resp.text.contains("clarity"));
        assert_eq!(resp.input_tokens, 90);
        assert_eq!(resp.output_tokens, 12);
    }

    #[tokio::test]
    async fn missing_usage_falls_back_to_estimate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{"content": {"parts": [{"text": "{\"ok\": true}"}]}}]
            })))
            .mount(&server)
            .await;

        let cap = GeminiCapability::new(
            "gemini-main".into(),
            "k".into(),
            "gemini-2.5-flash".into(),
            Duration::from_secs(2),
        )
        .with_endpoint(server.uri());

        let resp = cap.invoke("evaluate this diff", "{}").await.unwrap();
        assert!(resp.input_tokens > 0);
    }

    #[tokio::test]
    async fn server_error_is_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let cap = GeminiCapability::new(
            "gemini-main".into(),
            "k".into(),
            "gemini-2.5-flash".into(),
            Duration::from_secs(2),
        )
        .with_endpoint(server.uri());

        let err = cap.invoke("evaluate", "{}").await.unwrap_err();
        assert!(matches!(err, CapabilityError::Status { status: 500, .. }));
    }
}
