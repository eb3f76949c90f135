//! Task module - transcription tasks, their storage and lifecycle.
//!
//! - `task`: the task record and the partial-update rules applied to it
//! - `store`: persistence trait and the in-memory backend
//! - `manager`: processing, progress and background summarization

pub mod store;
pub mod task;
mod manager;

pub use manager::{ManagerError, TaskManager};
pub use store::{InMemoryTaskStore, StoreError, TaskFilter, TaskStore};
pub use task::{
    ApplyOutcome, Segment, Summary, Task, TaskError, TaskStatus, TaskUpdate, TranscriptionResult,
    Word,
};
