//! Task lifecycle: creation, serialized updates, processing and summaries.
//!
//! # Invariants
//! - updates for one task id are applied one at a time, in call order
//! - a completed transcript triggers at most one concurrent summarization
//! - a cancelled run leaves the task in its last observed status

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::store::{StoreError, TaskFilter, TaskStore};
use super::task::{Summary, Task, TaskError, TaskUpdate};
use crate::engine::{EngineRouter, ProgressSink, TranscribeContext, TranscriptionRequest};
use crate::summary::ProviderChain;

/// Progress recorded when the router is handed a task.
const PROCESSING_START_PROGRESS: u8 = 5;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("task {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}

struct Inner {
    store: Arc<dyn TaskStore>,
    router: Arc<EngineRouter>,
    summarizer: Arc<ProviderChain>,
    /// Per-task update guards
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
    /// Tasks with a summarization in flight
    summarizing: std::sync::Mutex<HashSet<Uuid>>,
    summary_done: Notify,
}

#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<Inner>,
}

impl TaskManager {
    pub fn new(
        store: Arc<dyn TaskStore>,
        router: Arc<EngineRouter>,
        summarizer: Arc<ProviderChain>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                router,
                summarizer,
                locks: Mutex::new(HashMap::new()),
                summarizing: std::sync::Mutex::new(HashSet::new()),
                summary_done: Notify::new(),
            }),
        }
    }

    pub fn router(&self) -> &Arc<EngineRouter> {
        &self.inner.router
    }

    pub fn summarizer(&self) -> &Arc<ProviderChain> {
        &self.inner.summarizer
    }

    pub async fn create(
        &self,
        meeting_id: impl Into<String>,
        filename: impl Into<String>,
    ) -> Result<Task, ManagerError> {
        let task = Task::new(meeting_id, filename);
        self.inner.store.create_task(&task).await?;
        tracing::info!(task_id = %task.id, meeting_id = %task.meeting_id, filename = %task.filename, "Task created");
        Ok(task)
    }

    pub async fn get(&self, id: Uuid) -> Result<Task, ManagerError> {
        self.inner
            .store
            .get_task(id)
            .await?
            .ok_or(ManagerError::NotFound(id))
    }

    pub async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, ManagerError> {
        Ok(self.inner.store.list_tasks(filter).await?)
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, ManagerError> {
        let _guard = self.lock_for(id).await;
        let deleted = self.inner.store.delete_task(id).await?;
        self.inner.locks.lock().await.remove(&id);
        if deleted {
            tracing::info!(task_id = %id, "Task deleted");
        }
        Ok(deleted)
    }

    /// Apply a partial update. Unset fields are left untouched.
    ///
    /// A transcript without a summary schedules summarization in the
    /// background; the caller is not blocked on it.
    pub async fn update(&self, id: Uuid, update: TaskUpdate) -> Result<Task, ManagerError> {
        let task = self.apply(id, update).await?;
        if task.needs_summary() {
            self.spawn_summary(&task);
        } else {
            self.prune_lock(&task).await;
        }
        Ok(task)
    }

    async fn apply(&self, id: Uuid, update: TaskUpdate) -> Result<Task, ManagerError> {
        let _guard = self.lock_for(id).await;
        let (task, outcome) = self
            .inner
            .store
            .update_task(id, update)
            .await?
            .ok_or(ManagerError::NotFound(id))?;
        if !outcome.is_clean() {
            tracing::debug!(task_id = %id, outcome = ?outcome, status = %task.status, "Update partially ignored");
        }
        Ok(task)
    }

    async fn lock_for(&self, id: Uuid) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.inner.locks.lock().await;
            locks.entry(id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Forget the update guard of a task nothing will write to again.
    async fn prune_lock(&self, task: &Task) {
        if !task.status.is_terminal() || task.needs_summary() || self.is_summarizing(task.id) {
            return;
        }
        let mut locks = self.inner.locks.lock().await;
        // Guards are cloned out under this map lock, so a count of one means idle.
        if locks
            .get(&task.id)
            .map_or(false, |lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&task.id);
        }
    }

    fn spawn_summary(&self, task: &Task) {
        let Some(text) = task.result.as_ref().map(|r| r.text.clone()) else {
            return;
        };
        {
            let mut active = self
                .inner
                .summarizing
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !active.insert(task.id) {
                tracing::debug!(task_id = %task.id, "Summary already in progress");
                return;
            }
        }

        let manager = self.clone();
        let id = task.id;
        tokio::spawn(async move {
            let in_flight = SummaryInFlight {
                manager: manager.clone(),
                id,
            };
            let summary = manager.inner.summarizer.summarize(&text).await;
            manager.store_summary(id, summary).await;
            drop(in_flight);

            if let Ok(task) = manager.get(id).await {
                manager.prune_lock(&task).await;
            }
        });
    }

    async fn store_summary(&self, id: Uuid, summary: Summary) {
        let provider = summary.provider.clone();
        match self.apply(id, TaskUpdate::summary(summary)).await {
            Ok(_) => tracing::info!(task_id = %id, provider = %provider, "Summary saved"),
            Err(e) => tracing::error!(task_id = %id, error = %e, "Failed to save summary"),
        }
    }

    fn is_summarizing(&self, id: Uuid) -> bool {
        self.inner
            .summarizing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&id)
    }

    /// Wait until no summarization is running for `id`, up to `timeout`.
    pub async fn wait_for_summary(&self, id: Uuid, timeout: Duration) -> Result<Task, ManagerError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.inner.summary_done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let task = self.get(id).await?;
            if task.summary.is_some() || !self.is_summarizing(id) {
                return Ok(task);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                tracing::warn!(task_id = %id, "Timed out waiting for summary");
                return self.get(id).await;
            }
        }
    }

    /// Run transcription for an existing task in the foreground.
    ///
    /// Returns the task as last stored. A cancelled run leaves the status
    /// untouched; every other failure ends in `Error`.
    pub async fn process(
        &self,
        id: Uuid,
        request: TranscriptionRequest,
        cancel: CancellationToken,
    ) -> Result<Task, ManagerError> {
        let current = self.get(id).await?;
        if current.status.is_terminal() {
            tracing::info!(task_id = %id, status = %current.status, "Task already finished, not processing");
            return Ok(current);
        }
        self.update(id, TaskUpdate::processing(PROCESSING_START_PROGRESS))
            .await?;

        let sink = Arc::new(TaskProgress {
            manager: self.clone(),
            id,
        });
        let ctx = TranscribeContext::new()
            .with_progress(sink)
            .with_cancel(cancel);

        match self.inner.router.transcribe(&request, &ctx).await {
            Ok(result) => {
                tracing::info!(
                    task_id = %id,
                    engine = ?result.engine,
                    chars = result.text.chars().count(),
                    "Transcription completed"
                );
                self.update(id, TaskUpdate::completed(result)).await
            }
            Err(e) if e.is_cancelled() => {
                tracing::info!(task_id = %id, "Transcription cancelled, keeping last status");
                self.get(id).await
            }
            Err(e) => {
                tracing::error!(task_id = %id, kind = %e.kind(), error = %e, "Transcription failed");
                self.update(id, TaskUpdate::failed(TaskError::new(e.kind(), e.to_string())))
                    .await
            }
        }
    }

    /// Create a task and process it in the background.
    ///
    /// The returned token abandons the run without touching the task.
    pub async fn submit(
        &self,
        meeting_id: impl Into<String>,
        request: TranscriptionRequest,
    ) -> Result<(Task, CancellationToken), ManagerError> {
        let task = self.create(meeting_id, request.filename.clone()).await?;
        let cancel = CancellationToken::new();

        let manager = self.clone();
        let id = task.id;
        let token = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.process(id, request, token).await {
                tracing::error!(task_id = %id, error = %e, "Background processing failed");
            }
        });
        Ok((task, cancel))
    }
}

/// Marks a summarization finished when dropped, including on panic.
struct SummaryInFlight {
    manager: TaskManager,
    id: Uuid,
}

impl Drop for SummaryInFlight {
    fn drop(&mut self) {
        self.manager
            .inner
            .summarizing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.id);
        self.manager.inner.summary_done.notify_waiters();
    }
}

/// Forwards engine progress to the task record.
struct TaskProgress {
    manager: TaskManager,
    id: Uuid,
}

#[async_trait]
impl ProgressSink for TaskProgress {
    async fn report(&self, progress: u8) {
        if let Err(e) = self
            .manager
            .apply(self.id, TaskUpdate::processing(progress))
            .await
        {
            tracing::warn!(task_id = %self.id, error = %e, "Failed to record progress");
        }
    }
}
