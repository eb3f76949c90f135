//! HTTP client for Whisper-style transcription services.
//!
//! Shared by the supervised local worker and remote self-hosted services:
//! - `POST /inference` (multipart `file`, optional `language`) answers either
//!   with a finished transcription or with `{task_id, estimated_time_minutes}`
//! - `GET /status/{task_id}` reports progress of an accepted task
//! - `GET /health` answers 2xx when the service is ready

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::budget::{BudgetCalculator, TimeoutBudget};
use super::poller::{AdaptivePoller, StatusFetchError, StatusSource};
use super::probe::http_ok;
use super::wire::{EngineTaskStatus, RawTranscription};
use super::{TranscribeContext, TranscriptionRequest};
use crate::error::{classify_http_status, describe_request_error, EngineError, HttpErrorKind};
use crate::task::TranscriptionResult;

/// Budget, polling and timeout knobs for HTTP-backed engines.
#[derive(Debug, Clone)]
pub struct HttpEngineSettings {
    pub budget: BudgetCalculator,
    pub poller: AdaptivePoller,
    pub health_timeout: Duration,
    pub status_timeout: Duration,
}

impl Default for HttpEngineSettings {
    fn default() -> Self {
        Self {
            budget: BudgetCalculator::default(),
            poller: AdaptivePoller::default(),
            health_timeout: Duration::from_secs(5),
            status_timeout: Duration::from_secs(10),
        }
    }
}

/// Answer of `POST /inference`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InferenceResponse {
    Accepted {
        task_id: String,
        #[serde(default)]
        estimated_time_minutes: Option<f64>,
    },
    Finished(RawTranscription),
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Clone)]
pub struct WhisperHttpClient {
    client: Client,
    base_url: String,
    settings: HttpEngineSettings,
}

impl WhisperHttpClient {
    pub fn new(base_url: impl Into<String>, settings: HttpEngineSettings) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            settings,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn settings(&self) -> &HttpEngineSettings {
        &self.settings
    }

    /// `GET /health` within the health timeout. Never fails.
    pub async fn health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        http_ok(&self.client, &url, None, self.settings.health_timeout).await
    }

    /// Submit, then either return the synchronous result or poll the task.
    pub async fn run(
        &self,
        engine: &str,
        request: &TranscriptionRequest,
        ctx: &TranscribeContext,
    ) -> Result<TranscriptionResult, EngineError> {
        let budget = self.settings.budget.budget(request.size_bytes());
        let language = request.options.language.as_deref();

        let submitted = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(EngineError::Cancelled),
            submitted = self.submit(engine, request, budget) => submitted?,
        };

        match submitted {
            InferenceResponse::Finished(raw) => {
                tracing::info!(engine = %engine, "Engine answered synchronously");
                raw.normalize(engine, language)
            }
            InferenceResponse::Accepted {
                task_id,
                estimated_time_minutes,
            } => {
                let budget = match estimated_time_minutes {
                    Some(minutes) => self.settings.budget.with_estimate(budget, minutes),
                    None => budget,
                };
                tracing::info!(
                    engine = %engine,
                    task_id = %task_id,
                    estimated_minutes = ?estimated_time_minutes,
                    "Engine accepted task for asynchronous processing"
                );
                self.settings
                    .poller
                    .await_completion(self, engine, &task_id, budget, language, ctx)
                    .await
            }
        }
    }

    async fn submit(
        &self,
        engine: &str,
        request: &TranscriptionRequest,
        budget: TimeoutBudget,
    ) -> Result<InferenceResponse, EngineError> {
        let part = Part::bytes(request.payload.to_vec())
            .file_name(request.filename.clone())
            .mime_str(&request.content_type())
            .map_err(|e| EngineError::invocation(engine, format!("Invalid content type: {}", e)))?;
        let mut form = Form::new().part("file", part);
        if let Some(language) = &request.options.language {
            form = form.text("language", language.clone());
        }

        let url = format!("{}/inference", self.base_url);
        let response = self
            .client
            .post(&url)
            .timeout(budget.timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| EngineError::invocation(engine, describe_request_error(&e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EngineError::invocation(engine, describe_request_error(&e)))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or(body);
            return Err(EngineError::invocation(
                engine,
                format!("HTTP {}: {}", status.as_u16(), message),
            ));
        }

        serde_json::from_str(&body).map_err(|e| {
            EngineError::invocation(engine, format!("Failed to parse response: {}, body: {}", e, body))
        })
    }
}

#[async_trait]
impl StatusSource for WhisperHttpClient {
    async fn fetch_status(&self, handle: &str) -> Result<EngineTaskStatus, StatusFetchError> {
        let url = format!("{}/status/{}", self.base_url, urlencoding::encode(handle));
        let response = self
            .client
            .get(&url)
            .timeout(self.settings.status_timeout)
            .send()
            .await
            .map_err(|e| StatusFetchError::Transient(describe_request_error(&e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let kind = classify_http_status(status.as_u16());
            let message = format!("HTTP {}: {}", status.as_u16(), body);
            return Err(if kind.is_transient() {
                StatusFetchError::Transient(message)
            } else if kind == HttpErrorKind::NotFound {
                StatusFetchError::Permanent(format!("task {} not found", handle))
            } else {
                StatusFetchError::Permanent(message)
            });
        }

        response
            .json::<EngineTaskStatus>()
            .await
            .map_err(|e| StatusFetchError::Transient(format!("Malformed status body: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{scripted_engine, serve};
    use axum::http::StatusCode;
    use axum::extract::Path;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;

    fn fast_settings() -> HttpEngineSettings {
        HttpEngineSettings {
            poller: AdaptivePoller::new(crate::engine::PollSchedule {
                fast_interval: Duration::from_millis(10),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_async_submission_is_polled_to_completion() {
        let url = serve(scripted_engine()).await;
        let client = WhisperHttpClient::new(url, fast_settings());
        let request = TranscriptionRequest::new(vec![0u8; 2 * 1024 * 1024], "meeting.wav");

        let result = client
            .run("remote-whisper", &request, &TranscribeContext::new())
            .await
            .unwrap();
        assert_eq!(result.text, "hello world");
        assert_eq!(result.segments.len(), 1);
    }

    #[tokio::test]
    async fn test_sync_answer_is_returned_directly() {
        let router = Router::new().route(
            "/inference",
            post(|| async { Json(json!({"text": "short clip", "language": "en"})) }),
        );
        let client = WhisperHttpClient::new(serve(router).await, fast_settings());
        let result = client
            .run("remote-whisper", &TranscriptionRequest::new(vec![1u8; 16], "a.wav"), &TranscribeContext::new())
            .await
            .unwrap();
        assert_eq!(result.text, "short clip");
        assert_eq!(result.language, "en");
    }

    #[tokio::test]
    async fn test_rejected_submission_carries_message() {
        let router = Router::new().route(
            "/inference",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": "No file provided"})),
                )
            }),
        );
        let client = WhisperHttpClient::new(serve(router).await, fast_settings());
        let err = client
            .run("remote-whisper", &TranscriptionRequest::new(vec![1u8; 16], "a.wav"), &TranscribeContext::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No file provided"));
    }

    #[tokio::test]
    async fn test_status_404_is_permanent() {
        let client = WhisperHttpClient::new(serve(scripted_engine()).await, fast_settings());
        let err = client.fetch_status("missing").await.unwrap_err();
        assert!(matches!(err, StatusFetchError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_status_errors_are_classified() {
        let router = Router::new().route(
            "/status/:id",
            get(|Path(id): Path<String>| async move {
                let code = match id.as_str() {
                    "busy" => StatusCode::TOO_MANY_REQUESTS,
                    "crashed" => StatusCode::SERVICE_UNAVAILABLE,
                    _ => StatusCode::BAD_REQUEST,
                };
                (code, "nope")
            }),
        );
        let client = WhisperHttpClient::new(serve(router).await, fast_settings());

        let busy = client.fetch_status("busy").await.unwrap_err();
        assert!(matches!(busy, StatusFetchError::Transient(_)));
        let crashed = client.fetch_status("crashed").await.unwrap_err();
        assert!(matches!(crashed, StatusFetchError::Transient(_)));
        let rejected = client.fetch_status("bad").await.unwrap_err();
        assert_eq!(rejected, StatusFetchError::Permanent("HTTP 400: nope".to_string()));
    }

    #[tokio::test]
    async fn test_health() {
        let client = WhisperHttpClient::new(serve(scripted_engine()).await, fast_settings());
        assert!(client.health().await);
        let down = WhisperHttpClient::new("http://127.0.0.1:9", fast_settings());
        assert!(!down.health().await);
    }
}
