//! OpenAI-compatible chat completions provider.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{http_failure, ProviderKind, SummaryProvider};
use crate::error::{describe_request_error, ProviderError};

const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl SummaryProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::CloudApi
    }

    fn model(&self) -> &str {
        &self.model
    }

    /// Configured key is enough; the call itself reports auth problems.
    async fn probe(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    async fn summarize(&self, _text: &str, prompt: &str) -> Result<String, ProviderError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: 1000,
            temperature: 0.7,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::invocation(self.name(), describe_request_error(&e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(http_failure(self.name(), status, &body));
        }

        let body: ChatResponse = response.json().await.map_err(|e| {
            ProviderError::invocation(self.name(), format!("Failed to parse response: {}", e))
        })?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::invocation(self.name(), "No choices in response"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    #[tokio::test]
    async fn test_chat_completion() {
        let router = Router::new().route(
            "/chat/completions",
            post(|headers: HeaderMap| async move {
                if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer sk-test") {
                    return (StatusCode::UNAUTHORIZED, Json(json!({"error": {"message": "bad key"}})));
                }
                (
                    StatusCode::OK,
                    Json(json!({"choices": [{"message": {"role": "assistant", "content": "## Summary"}}]})),
                )
            }),
        );
        let url = serve(router).await;

        let provider = OpenAiProvider::new("sk-test".into(), url.clone());
        assert!(provider.probe().await);
        assert_eq!(provider.summarize("t", "p").await.unwrap(), "## Summary");

        let err = OpenAiProvider::new("sk-wrong".into(), url)
            .summarize("t", "p")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bad key"));
    }

    #[tokio::test]
    async fn test_blank_key_is_unavailable() {
        assert!(!OpenAiProvider::new("  ".into(), "http://127.0.0.1:9").probe().await);
    }
}
