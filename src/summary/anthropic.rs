//! Anthropic messages API provider.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{http_failure, ProviderKind, SummaryProvider};
use crate::error::{describe_request_error, ProviderError};

pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-3-haiku-20240307";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: DEFAULT_ANTHROPIC_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl SummaryProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::CloudApi
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn probe(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    async fn summarize(&self, _text: &str, prompt: &str) -> Result<String, ProviderError> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: 1000,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::invocation(self.name(), describe_request_error(&e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(http_failure(self.name(), status, &body));
        }

        let body: MessagesResponse = response.json().await.map_err(|e| {
            ProviderError::invocation(self.name(), format!("Failed to parse response: {}", e))
        })?;
        body.content
            .into_iter()
            .find_map(|block| block.text)
            .ok_or_else(|| ProviderError::invocation(self.name(), "No text content in response"))
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
    async fn test_messages_call_sends_version_header() {
        let router = Router::new().route(
            "/messages",
            post(|headers: HeaderMap| async move {
                let version = headers.get("anthropic-version").and_then(|v| v.to_str().ok());
                let key = headers.get("x-api-key").and_then(|v| v.to_str().ok());
                if version != Some(API_VERSION) || key != Some("key") {
                    return (StatusCode::BAD_REQUEST, Json(json!({"error": {"message": "missing headers"}})));
                }
                (
                    StatusCode::OK,
                    Json(json!({"content": [{"type": "text", "text": "- ship on friday"}]})),
                )
            }),
        );
        let provider = AnthropicProvider::new("key".into()).with_base_url(serve(router).await);

        assert!(provider.probe().await);
        assert_eq!(provider.summarize("t", "p").await.unwrap(), "- ship on friday");
    }

    #[tokio::test]
    async fn test_server_error_is_invocation_failure() {
        let router = Router::new().route(
            "/messages",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "overloaded") }),
        );
        let provider = AnthropicProvider::new("key".into()).with_base_url(serve(router).await);
        let err = provider.summarize("t", "p").await.unwrap_err();
        assert!(matches!(err, ProviderError::InvocationFailed { .. }));
        assert!(err.to_string().contains("500"));
    }
}
