//! Engine backed by the supervised local worker.

use async_trait::async_trait;
use std::sync::Arc;

use super::http::WhisperHttpClient;
use super::{EngineKind, TranscribeContext, TranscriptionEngine, TranscriptionRequest};
use crate::error::EngineError;
use crate::supervisor::{ProcessSupervisor, WorkerState};
use crate::task::TranscriptionResult;

pub struct LocalWhisperEngine {
    supervisor: Arc<ProcessSupervisor>,
    http: WhisperHttpClient,
}

impl LocalWhisperEngine {
    pub fn new(supervisor: Arc<ProcessSupervisor>, http: WhisperHttpClient) -> Self {
        Self { supervisor, http }
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }
}

#[async_trait]
impl TranscriptionEngine for LocalWhisperEngine {
    fn name(&self) -> &str {
        "local-whisper"
    }

    fn kind(&self) -> EngineKind {
        EngineKind::LocalSubprocess
    }

    /// A worker still booting counts as available; `transcribe` joins its start.
    async fn probe(&self) -> bool {
        if self.supervisor.state().await == WorkerState::Starting {
            return true;
        }
        self.supervisor.is_healthy().await
    }

    async fn transcribe(
        &self,
        request: &TranscriptionRequest,
        ctx: &TranscribeContext,
    ) -> Result<TranscriptionResult, EngineError> {
        tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(EngineError::Cancelled),
            started = self.supervisor.start() => {
                started.map_err(|e| EngineError::ProcessStartFailed(e.to_string()))?
            }
        }
        self.http.run(self.name(), request, ctx).await
    }

    async fn shutdown(&self) {
        if let Err(e) = self.supervisor.stop().await {
            tracing::warn!(error = %e, "Failed to stop local worker");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{scripted_engine, serve};
    use crate::engine::{AdaptivePoller, HttpEngineSettings, PollSchedule};
    use crate::supervisor::SupervisorConfig;
    use std::time::Duration;

    #[tokio::test]
    async fn test_adopts_running_service_and_transcribes() {
        let url = serve(scripted_engine()).await;
        let supervisor = Arc::new(ProcessSupervisor::new(SupervisorConfig {
            program: "/nonexistent/worker".to_string(),
            args: vec![],
            port: 0,
            model: "tiny".to_string(),
            ready_marker: "ready".to_string(),
            health_url: format!("{}/health", url),
            startup_timeout: Duration::from_secs(1),
            ready_grace: Duration::ZERO,
            stop_grace: Duration::from_secs(1),
            health_timeout: Duration::from_secs(1),
        }));
        let settings = HttpEngineSettings {
            poller: AdaptivePoller::new(PollSchedule {
                fast_interval: Duration::from_millis(10),
                ..Default::default()
            }),
            ..Default::default()
        };
        let engine = LocalWhisperEngine::new(supervisor, WhisperHttpClient::new(url, settings));

        assert!(engine.probe().await);
        let request = TranscriptionRequest::new(vec![0u8; 1024], "a.wav");
        let result = engine
            .transcribe(&request, &TranscribeContext::new())
            .await
            .unwrap();
        assert_eq!(result.text, "hello world");
        assert_eq!(result.engine.as_deref(), Some("local-whisper"));
    }

    #[tokio::test]
    async fn test_start_failure_maps_to_process_start_failed() {
        let supervisor = Arc::new(ProcessSupervisor::new(SupervisorConfig {
            program: "/nonexistent/worker".to_string(),
            args: vec![],
            port: 0,
            model: "tiny".to_string(),
            ready_marker: "ready".to_string(),
            health_url: "http://127.0.0.1:9/health".to_string(),
            startup_timeout: Duration::from_secs(1),
            ready_grace: Duration::ZERO,
            stop_grace: Duration::from_secs(1),
            health_timeout: Duration::from_millis(300),
        }));
        let engine = LocalWhisperEngine::new(
            supervisor,
            WhisperHttpClient::new("http://127.0.0.1:9", HttpEngineSettings::default()),
        );
        let err = engine
            .transcribe(&TranscriptionRequest::new(vec![1u8], "a.wav"), &TranscribeContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ProcessStartFailed(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_booting_worker_is_routed_to() {
        use crate::engine::{EngineKind, EngineRouter};

        let url = serve(scripted_engine()).await;
        let supervisor = Arc::new(ProcessSupervisor::new(SupervisorConfig {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "sleep 1; echo 'Starting Whisper service on test'; exec sleep 30".to_string(),
            ],
            port: 0,
            model: "tiny".to_string(),
            ready_marker: "Starting Whisper service on".to_string(),
            // Nothing listens here, so the worker is spawned rather than adopted
            health_url: "http://127.0.0.1:9/health".to_string(),
            startup_timeout: Duration::from_secs(5),
            ready_grace: Duration::ZERO,
            stop_grace: Duration::from_secs(1),
            health_timeout: Duration::from_millis(300),
        }));
        let settings = HttpEngineSettings {
            poller: AdaptivePoller::new(PollSchedule {
                fast_interval: Duration::from_millis(10),
                ..Default::default()
            }),
            ..Default::default()
        };
        let engine = Arc::new(LocalWhisperEngine::new(
            supervisor.clone(),
            WhisperHttpClient::new(url, settings),
        ));
        assert!(!engine.probe().await);

        let booting = supervisor.clone();
        tokio::spawn(async move { booting.start().await });
        for _ in 0..100 {
            if supervisor.state().await == WorkerState::Starting {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(supervisor.state().await, WorkerState::Starting);
        assert!(engine.probe().await);

        let router = EngineRouter::new(EngineKind::default_priority().to_vec(), Duration::from_secs(1))
            .with_engine(engine.clone());
        let result = router
            .transcribe(&TranscriptionRequest::new(vec![0u8; 64], "a.wav"), &TranscribeContext::new())
            .await
            .unwrap();
        assert_eq!(result.text, "hello world");
        assert_eq!(supervisor.state().await, WorkerState::Running);

        engine.shutdown().await;
    }
}
