//! Transcription engines and the machinery that drives them.
//!
//! Every engine implements [`TranscriptionEngine`] and carries a closed
//! [`EngineKind`] tag that the router uses for priority ordering and pinning.
//! Engines that answer asynchronously are tracked by the [`AdaptivePoller`]
//! until they reach a terminal state.

mod budget;
mod cloud;
mod http;
mod local;
mod poller;
mod probe;
mod remote;
mod router;
mod wire;

pub use budget::{BudgetCalculator, BudgetConfig, TimeoutBudget};
pub use cloud::OpenAiWhisperEngine;
pub use http::{HttpEngineSettings, WhisperHttpClient};
pub use local::LocalWhisperEngine;
pub use poller::{AdaptivePoller, PollSchedule, StatusFetchError, StatusSource};
pub use probe::{http_ok, probe_with_timeout};
pub use remote::RemoteWhisperEngine;
pub use router::{EngineRouter, EngineStatus};
pub use wire::{EngineTaskStatus, RawSegment, RawTranscription, RemoteStatus};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::task::TranscriptionResult;

/// Closed set of engine families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    /// Worker process spawned and supervised by this crate
    LocalSubprocess,
    /// Self-hosted engine reachable over HTTP
    RemoteHttp,
    /// Hosted cloud transcription API
    CloudApi,
}

const DEFAULT_PRIORITY: [EngineKind; 3] = [
    EngineKind::LocalSubprocess,
    EngineKind::RemoteHttp,
    EngineKind::CloudApi,
];

impl EngineKind {
    /// Highest priority first.
    pub fn default_priority() -> &'static [EngineKind] {
        &DEFAULT_PRIORITY
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalSubprocess => "local",
            Self::RemoteHttp => "remote",
            Self::CloudApi => "cloud",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" | "local-subprocess" | "local-whisper" => Some(Self::LocalSubprocess),
            "remote" | "remote-http" | "remote-whisper" => Some(Self::RemoteHttp),
            "cloud" | "cloud-api" | "openai" | "openai-whisper" => Some(Self::CloudApi),
            _ => None,
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller options for a transcription.
#[derive(Debug, Clone, Default)]
pub struct TranscribeOptions {
    /// Spoken language hint (ISO code)
    pub language: Option<String>,
    /// Pin a specific engine kind; no fallback when set
    pub engine: Option<EngineKind>,
    /// Engine-specific model override
    pub model: Option<String>,
}

/// Raw audio plus the metadata engines need to upload it.
#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    pub payload: Bytes,
    pub filename: String,
    pub options: TranscribeOptions,
}

impl TranscriptionRequest {
    pub fn new(payload: impl Into<Bytes>, filename: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            filename: filename.into(),
            options: TranscribeOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TranscribeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn size_bytes(&self) -> u64 {
        self.payload.len() as u64
    }

    /// MIME type guessed from the file extension.
    pub fn content_type(&self) -> String {
        let ext = self
            .filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_else(|| "wav".to_string());
        match ext.as_str() {
            "mp3" => "audio/mpeg".to_string(),
            "m4a" => "audio/mp4".to_string(),
            other => format!("audio/{}", other),
        }
    }
}

/// Receives progress observed while an engine works on a task.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, progress: u8);
}

/// Per-call context: progress reporting and cancellation.
#[derive(Clone, Default)]
pub struct TranscribeContext {
    pub progress: Option<Arc<dyn ProgressSink>>,
    pub cancel: CancellationToken,
}

impl TranscribeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn report(&self, progress: u8) {
        if let Some(sink) = &self.progress {
            sink.report(progress).await;
        }
    }
}

/// Trait for transcription engines.
#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> EngineKind;

    /// Lightweight availability check. Must not fail; unreachable means `false`.
    async fn probe(&self) -> bool;

    /// Transcribe the request, tracking asynchronous engine work to completion.
    async fn transcribe(
        &self,
        request: &TranscriptionRequest,
        ctx: &TranscribeContext,
    ) -> Result<TranscriptionResult, EngineError>;

    /// Release resources (stop supervised workers). Default: nothing to do.
    async fn shutdown(&self) {}
}
