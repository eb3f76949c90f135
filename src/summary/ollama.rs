//! Ollama local model server (`/api/generate`).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{http_failure, ProviderKind, SummaryProvider};
use crate::engine::http_ok;
use crate::error::{describe_request_error, ProviderError};

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    probe_timeout: Duration,
}

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

#[async_trait]
impl SummaryProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::LocalModel
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn probe(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        http_ok(&self.client, &url, None, self.probe_timeout).await
    }

    async fn summarize(&self, _text: &str, prompt: &str) -> Result<String, ProviderError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: 0.7,
                top_p: 0.9,
                num_predict: 1000,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::invocation(self.name(), describe_request_error(&e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(http_failure(self.name(), status, &body));
        }

        let body: GenerateResponse = response.json().await.map_err(|e| {
            ProviderError::invocation(self.name(), format!("Failed to parse response: {}", e))
        })?;
        Ok(body.response)
    }
}
