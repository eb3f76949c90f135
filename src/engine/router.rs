//! Priority routing across transcription engines.
//!
//! # Invariants
//! - an engine whose probe returned `false` is never invoked
//! - with no available engine, no engine is invoked at all
//! - a pinned engine kind never falls back to another kind

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::probe::probe_with_timeout;
use super::{EngineKind, TranscribeContext, TranscriptionEngine, TranscriptionRequest};
use crate::error::EngineError;
use crate::task::TranscriptionResult;

/// Availability snapshot of one registered engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub name: String,
    pub kind: EngineKind,
    /// Position in the routing order, 0 is tried first
    pub priority: usize,
    pub available: bool,
}

pub struct EngineRouter {
    engines: Vec<Arc<dyn TranscriptionEngine>>,
    priority: Vec<EngineKind>,
    probe_timeout: Duration,
}

impl EngineRouter {
    pub fn new(priority: Vec<EngineKind>, probe_timeout: Duration) -> Self {
        Self {
            engines: Vec::new(),
            priority,
            probe_timeout,
        }
    }

    pub fn register(&mut self, engine: Arc<dyn TranscriptionEngine>) {
        tracing::info!(engine = %engine.name(), kind = %engine.kind(), "Registered transcription engine");
        self.engines.push(engine);
    }

    pub fn with_engine(mut self, engine: Arc<dyn TranscriptionEngine>) -> Self {
        self.register(engine);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    fn rank(&self, kind: EngineKind) -> usize {
        self.priority
            .iter()
            .position(|k| *k == kind)
            .unwrap_or(self.priority.len())
    }

    /// Registered engines, highest priority first; registration order breaks ties.
    fn ordered(&self) -> Vec<Arc<dyn TranscriptionEngine>> {
        let mut engines = self.engines.clone();
        engines.sort_by_key(|e| self.rank(e.kind()));
        engines
    }

    async fn probe_all(&self, engines: &[Arc<dyn TranscriptionEngine>]) -> Vec<bool> {
        join_all(
            engines
                .iter()
                .map(|e| probe_with_timeout(e.name(), self.probe_timeout, e.probe())),
        )
        .await
    }

    /// Transcribe with the best available engine, falling back in priority order.
    pub async fn transcribe(
        &self,
        request: &TranscriptionRequest,
        ctx: &TranscribeContext,
    ) -> Result<TranscriptionResult, EngineError> {
        let mut candidates = self.ordered();
        if let Some(pinned) = request.options.engine {
            candidates.retain(|e| e.kind() == pinned);
        }

        let availability = self.probe_all(&candidates).await;
        let available: Vec<_> = candidates
            .into_iter()
            .zip(availability)
            .filter_map(|(engine, ok)| {
                if !ok {
                    tracing::info!(engine = %engine.name(), "Engine unavailable, skipping");
                }
                ok.then_some(engine)
            })
            .collect();

        if let Some(pinned) = request.options.engine {
            return self.transcribe_pinned(pinned, available, request, ctx).await;
        }

        if available.is_empty() {
            tracing::warn!("No transcription engine is available");
            return Err(EngineError::AllEnginesUnavailable);
        }

        let mut last_error: Option<EngineError> = None;
        for engine in available {
            tracing::info!(engine = %engine.name(), filename = %request.filename, "Transcribing");
            match engine.transcribe(request, ctx).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    tracing::warn!(engine = %engine.name(), error = %e, "Engine failed, trying next");
                    last_error = Some(e);
                }
            }
        }

        Err(EngineError::AllEnginesFailed {
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no engine attempted".to_string()),
        })
    }

    async fn transcribe_pinned(
        &self,
        pinned: EngineKind,
        available: Vec<Arc<dyn TranscriptionEngine>>,
        request: &TranscriptionRequest,
        ctx: &TranscribeContext,
    ) -> Result<TranscriptionResult, EngineError> {
        let mut last_error = EngineError::Unavailable {
            engine: pinned.to_string(),
        };
        for engine in available {
            tracing::info!(engine = %engine.name(), "Transcribing with pinned engine");
            match engine.transcribe(request, ctx).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }

    /// Probe every engine, in priority order.
    pub async fn engine_status(&self) -> Vec<EngineStatus> {
        let engines = self.ordered();
        let availability = self.probe_all(&engines).await;
        engines
            .iter()
            .zip(availability)
            .enumerate()
            .map(|(priority, (e, available))| EngineStatus {
                name: e.name().to_string(),
                kind: e.kind(),
                priority,
                available,
            })
            .collect()
    }

    /// Release engine resources (stops supervised workers).
    pub async fn shutdown(&self) {
        join_all(self.engines.iter().map(|e| e.shutdown())).await;
    }
}
