//! Task storage with pluggable backends.
//!
//! The orchestrator never assumes a storage engine; it only talks to the
//! [`TaskStore`] trait. The in-memory store ships for tests and the CLI.

mod memory;

pub use memory::InMemoryTaskStore;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use super::task::{ApplyOutcome, Task, TaskStatus, TaskUpdate};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task {0} already exists")]
    Duplicate(Uuid),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Filter for listing tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub meeting_id: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        self.status.map_or(true, |s| task.status == s)
            && self
                .meeting_id
                .as_deref()
                .map_or(true, |m| task.meeting_id == m)
    }
}

/// Task store trait - implemented by all storage backends.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a freshly created task.
    async fn create_task(&self, task: &Task) -> Result<(), StoreError>;

    /// Get a single task by ID.
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, StoreError>;

    /// Apply a partial update atomically. Returns `None` if the task is unknown.
    ///
    /// Implementations must apply the update through [`Task::apply`] so the
    /// status/progress invariants hold regardless of backend.
    async fn update_task(
        &self,
        id: Uuid,
        update: TaskUpdate,
    ) -> Result<Option<(Task, ApplyOutcome)>, StoreError>;

    /// List tasks, ordered by created_at descending.
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError>;

    /// Delete a task.
    async fn delete_task(&self, id: Uuid) -> Result<bool, StoreError>;
}
