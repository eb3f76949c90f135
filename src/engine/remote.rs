//! Engine backed by a self-hosted HTTP service.

use async_trait::async_trait;

use super::http::WhisperHttpClient;
use super::{EngineKind, TranscribeContext, TranscriptionEngine, TranscriptionRequest};
use crate::error::EngineError;
use crate::task::TranscriptionResult;

pub struct RemoteWhisperEngine {
    http: WhisperHttpClient,
}

impl RemoteWhisperEngine {
    pub fn new(http: WhisperHttpClient) -> Self {
        Self { http }
    }
}

#[async_trait]
impl TranscriptionEngine for RemoteWhisperEngine {
    fn name(&self) -> &str {
        "remote-whisper"
    }

    fn kind(&self) -> EngineKind {
        EngineKind::RemoteHttp
    }

    async fn probe(&self) -> bool {
        self.http.health().await
    }

    async fn transcribe(
        &self,
        request: &TranscriptionRequest,
        ctx: &TranscribeContext,
    ) -> Result<TranscriptionResult, EngineError> {
        tracing::info!(url = %self.http.base_url(), filename = %request.filename, "Sending to remote engine");
        self.http.run(self.name(), request, ctx).await
    }
}
