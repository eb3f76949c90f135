//! Lifecycle of the locally spawned transcription worker.
//!
//! # Invariants
//! - at most one worker process per supervisor
//! - concurrent `start()` calls share a single in-flight attempt
//! - `stop()` always resolves, even with nothing running
//!
//! # State Machine
//! ```text
//! Stopped -> Starting -> Running
//!    ^          |           |
//!    +----------+-----------+   (stop, startup failure, worker exit)
//! ```

use futures::future::{BoxFuture, FutureExt, Shared};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};

use crate::config::WhisperConfig;
use crate::engine::http_ok;

#[derive(Debug, Clone, Error)]
pub enum SupervisorError {
    #[error("failed to spawn worker: {0}")]
    Spawn(String),

    #[error("worker did not report ready within {secs}s")]
    StartupTimeout { secs: u64 },

    #[error("worker exited before becoming ready ({0})")]
    ExitedBeforeReady(String),

    #[error("worker start was interrupted by stop()")]
    Stopped,
}

/// How to launch and watch the worker.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub program: String,
    /// Leading arguments (typically the worker script)
    pub args: Vec<String>,
    pub port: u16,
    pub model: String,
    /// Output line fragment announcing the service is ready
    pub ready_marker: String,
    pub health_url: String,
    pub startup_timeout: Duration,
    /// Pause after the ready marker before the worker is used
    pub ready_grace: Duration,
    /// Time between SIGTERM and a forced kill
    pub stop_grace: Duration,
    pub health_timeout: Duration,
}

impl SupervisorConfig {
    pub fn from_whisper(config: &WhisperConfig) -> Self {
        Self {
            program: config.worker_command.clone(),
            args: vec![config.worker_script.clone()],
            port: config.server_port,
            model: config.model.clone(),
            ready_marker: config.ready_marker.clone(),
            health_url: format!("{}/health", config.server_url.trim_end_matches('/')),
            startup_timeout: Duration::from_secs(30),
            ready_grace: Duration::from_secs(2),
            stop_grace: Duration::from_secs(5),
            health_timeout: Duration::from_secs(5),
        }
    }

    fn command_args(&self) -> Vec<String> {
        let mut args = self.args.clone();
        args.push("--port".to_string());
        args.push(self.port.to_string());
        args.push("--model-path".to_string());
        args.push(self.model.clone());
        args
    }
}

/// Observable supervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Starting,
    Running,
}

type StartFuture = Shared<BoxFuture<'static, Result<(), SupervisorError>>>;

struct State {
    worker: Option<Child>,
    pending: Option<StartFuture>,
    /// Bumped by `stop()` so an interrupted start can tell it lost
    generation: u64,
}

struct Inner {
    config: SupervisorConfig,
    client: reqwest::Client,
    state: Mutex<State>,
}

#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                client: reqwest::Client::new(),
                state: Mutex::new(State {
                    worker: None,
                    pending: None,
                    generation: 0,
                }),
            }),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    /// Ensure the worker is up.
    ///
    /// Adopts an already healthy service instead of spawning a second one.
    /// A worker that exited since the last start is respawned.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        let attempt = {
            let mut state = self.inner.state.lock().await;
            if let Some(child) = state.worker.as_mut() {
                match child.try_wait() {
                    Ok(None) if state.pending.is_none() => return Ok(()),
                    Ok(None) => {}
                    Ok(Some(status)) => {
                        tracing::warn!(status = %status, "Worker exited, respawning");
                        state.worker = None;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Could not query worker, respawning");
                        state.worker = None;
                    }
                }
            }

            match &state.pending {
                Some(pending) => pending.clone(),
                None => {
                    state.generation += 1;
                    let generation = state.generation;
                    let inner = self.inner.clone();
                    // Spawned so the start completes even if every caller goes away.
                    let handle = tokio::spawn(inner.launch(generation));
                    let attempt = async move {
                        handle.await.unwrap_or_else(|e| {
                            Err(SupervisorError::Spawn(format!("start task failed: {}", e)))
                        })
                    }
                    .boxed()
                    .shared();
                    state.pending = Some(attempt.clone());
                    attempt
                }
            }
        };
        attempt.await
    }

    /// SIGTERM the worker, force-kill after the grace period.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        let worker = {
            let mut state = self.inner.state.lock().await;
            state.generation += 1;
            state.pending = None;
            state.worker.take()
        };
        match worker {
            Some(child) => {
                let status = terminate(child, self.inner.config.stop_grace).await;
                tracing::info!(status = ?status, "Worker stopped");
            }
            None => tracing::debug!("Stop requested with no worker running"),
        }
        Ok(())
    }

    /// Bounded probe of the worker's health endpoint. Never fails.
    pub async fn is_healthy(&self) -> bool {
        self.inner.is_healthy().await
    }

    pub async fn state(&self) -> WorkerState {
        let mut state = self.inner.state.lock().await;
        if state.pending.is_some() {
            return WorkerState::Starting;
        }
        match state.worker.as_mut().map(|c| c.try_wait()) {
            Some(Ok(None)) => WorkerState::Running,
            _ => WorkerState::Stopped,
        }
    }

    pub async fn pid(&self) -> Option<u32> {
        self.inner.state.lock().await.worker.as_ref().and_then(|c| c.id())
    }
}

impl Inner {
    async fn is_healthy(&self) -> bool {
        http_ok(
            &self.client,
            &self.config.health_url,
            None,
            self.config.health_timeout,
        )
        .await
    }

    async fn launch(self: Arc<Self>, generation: u64) -> Result<(), SupervisorError> {
        let result = self.launch_worker(generation).await;
        let mut state = self.state.lock().await;
        if state.generation == generation {
            state.pending = None;
        }
        result
    }

    async fn launch_worker(&self, generation: u64) -> Result<(), SupervisorError> {
        if self.is_healthy().await {
            tracing::info!(url = %self.config.health_url, "Adopting already running worker");
            return Ok(());
        }

        let args = self.config.command_args();
        tracing::info!(program = %self.config.program, args = ?args, "Spawning worker");

        let mut child = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SupervisorError::Spawn(format!("{}: {}", self.config.program, e))
            })?;

        // Both streams are watched; Python logging writes to stderr.
        let (ready_tx, mut ready_rx) = mpsc::channel::<()>(2);
        if let Some(stdout) = child.stdout.take() {
            watch_output(stdout, "stdout", self.config.ready_marker.clone(), ready_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            watch_output(stderr, "stderr", self.config.ready_marker.clone(), ready_tx.clone());
        }
        drop(ready_tx);

        {
            let mut state = self.state.lock().await;
            if state.generation != generation {
                drop(state);
                terminate(child, self.config.stop_grace).await;
                return Err(SupervisorError::Stopped);
            }
            state.worker = Some(child);
        }

        let ready = tokio::time::timeout(self.config.startup_timeout, ready_rx.recv()).await;
        if self.state.lock().await.generation != generation {
            return Err(SupervisorError::Stopped);
        }

        match ready {
            Ok(Some(())) => {
                tokio::time::sleep(self.config.ready_grace).await;
                tracing::info!(port = self.config.port, "Worker ready");
                Ok(())
            }
            Ok(None) => {
                let status = self.reap(generation).await;
                match status {
                    Some(status) => Err(SupervisorError::ExitedBeforeReady(status.to_string())),
                    None => Err(SupervisorError::Stopped),
                }
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.config.startup_timeout.as_secs(),
                    "Worker did not become ready, terminating"
                );
                self.reap(generation).await;
                Err(SupervisorError::StartupTimeout {
                    secs: self.config.startup_timeout.as_secs(),
                })
            }
        }
    }

    /// Take and terminate the worker if it still belongs to `generation`.
    async fn reap(&self, generation: u64) -> Option<ExitStatus> {
        let child = {
            let mut state = self.state.lock().await;
            if state.generation != generation {
                return None;
            }
            state.worker.take()?
        };
        terminate(child, self.config.stop_grace).await
    }
}

fn watch_output<R>(stream: R, name: &'static str, marker: String, ready: mpsc::Sender<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(stream = name, "worker: {}", line);
            if line.contains(&marker) {
                let _ = ready.try_send(());
            }
        }
    });
}

#[cfg(unix)]
fn request_shutdown(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: plain signal delivery to a pid we spawned and have not reaped.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn request_shutdown(child: &mut Child) {
    let _ = child.start_kill();
}

async fn terminate(mut child: Child, grace: Duration) -> Option<ExitStatus> {
    request_shutdown(&mut child);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Failed to wait for worker");
            None
        }
        Err(_) => {
            tracing::warn!(grace_secs = grace.as_secs(), "Worker ignored SIGTERM, killing");
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "Failed to kill worker");
            }
            child.try_wait().ok().flatten()
        }
    }
}
