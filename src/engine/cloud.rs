//! OpenAI hosted Whisper (`/audio/transcriptions`).

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::budget::{BudgetCalculator, BudgetConfig};
use super::probe::http_ok;
use super::wire::RawTranscription;
use super::{EngineKind, TranscribeContext, TranscriptionEngine, TranscriptionRequest};
use crate::error::{describe_request_error, EngineError};
use crate::task::TranscriptionResult;

const DEFAULT_MODEL: &str = "whisper-1";

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

pub struct OpenAiWhisperEngine {
    client: Client,
    api_key: String,
    base_url: String,
    budget: BudgetCalculator,
    probe_timeout: Duration,
}

impl OpenAiWhisperEngine {
    pub fn new(api_key: String, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            // The hosted API runs well under real time.
            budget: BudgetCalculator::new(BudgetConfig {
                processing_ratio: 0.3,
                min_processing_minutes: 5.0,
                ..Default::default()
            }),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

#[async_trait]
impl TranscriptionEngine for OpenAiWhisperEngine {
    fn name(&self) -> &str {
        "openai-whisper"
    }

    fn kind(&self) -> EngineKind {
        EngineKind::CloudApi
    }

    async fn probe(&self) -> bool {
        let url = format!("{}/models", self.base_url);
        http_ok(&self.client, &url, Some(&self.api_key), self.probe_timeout).await
    }

    async fn transcribe(
        &self,
        request: &TranscriptionRequest,
        ctx: &TranscribeContext,
    ) -> Result<TranscriptionResult, EngineError> {
        let engine = self.name();
        let budget = self.budget.budget(request.size_bytes());
        let model = request
            .options
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let part = Part::bytes(request.payload.to_vec())
            .file_name(request.filename.clone())
            .mime_str(&request.content_type())
            .map_err(|e| EngineError::invocation(engine, format!("Invalid content type: {}", e)))?;
        let mut form = Form::new()
            .part("file", part)
            .text("model", model)
            .text("response_format", "verbose_json");
        if let Some(language) = &request.options.language {
            form = form.text("language", language.clone());
        }

        tracing::info!(
            engine = %engine,
            timeout_secs = budget.timeout_secs(),
            size_bytes = request.size_bytes(),
            "Sending audio to cloud transcription"
        );

        let send = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(budget.timeout)
            .multipart(form)
            .send();
        let response = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(EngineError::Cancelled),
            response = send => response
                .map_err(|e| EngineError::invocation(engine, describe_request_error(&e)))?,
        };

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EngineError::invocation(engine, describe_request_error(&e)))?;
        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or(body);
            return Err(EngineError::invocation(
                engine,
                format!("HTTP {}: {}", status.as_u16(), message),
            ));
        }

        let raw: RawTranscription = serde_json::from_str(&body).map_err(|e| {
            EngineError::invocation(engine, format!("Failed to parse response: {}", e))
        })?;
        raw.normalize(engine, request.options.language.as_deref())
    }
}
