//! Core Task type and its update rules.
//!
//! # Invariants
//! - `result` is present only when `status == Completed`
//! - `error` is present only when `status == Error`
//! - once `Completed` or `Error` is reached, `status` never changes again
//! - while `Processing`, `progress` never decreases
//! - `updated_at` advances on every applied update

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;

/// Status of a task in its lifecycle.
///
/// # State Machine
/// ```text
/// Pending -> Processing -> Completed
///        \             \-> Error
///         \-> Completed / Error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Processing => 1,
            Self::Completed | Self::Error => 2,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Word-level timestamp inside a segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub word: String,
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub probability: f32,
}

/// A timed piece of transcribed text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub words: Vec<Word>,
}

/// Normalized output of a transcription engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub text: String,
    pub language: String,
    /// Media duration in seconds (0 when the engine did not report it)
    pub duration: f64,
    pub segments: Vec<Segment>,
    /// Name of the engine that produced this result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
}

/// Summary attached to a task once its transcript is available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub text: String,
    pub provider: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

/// Error recorded on a task in `Error` status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// The unit of asynchronous work tracked for a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub meeting_id: String,
    pub filename: String,
    pub status: TaskStatus,
    /// Percentage in [0, 100]
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TranscriptionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Summary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    /// Engine currently (or last) handling this task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub progress: Option<u8>,
    pub result: Option<TranscriptionResult>,
    pub summary: Option<Summary>,
    pub error: Option<TaskError>,
    pub engine: Option<String>,
}

impl TaskUpdate {
    pub fn processing(progress: u8) -> Self {
        Self {
            status: Some(TaskStatus::Processing),
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn completed(result: TranscriptionResult) -> Self {
        Self {
            status: Some(TaskStatus::Completed),
            progress: Some(100),
            engine: result.engine.clone(),
            result: Some(result),
            ..Default::default()
        }
    }

    pub fn failed(error: TaskError) -> Self {
        Self {
            status: Some(TaskStatus::Error),
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn summary(summary: Summary) -> Self {
        Self {
            summary: Some(summary),
            ..Default::default()
        }
    }
}

/// Parts of an update that were dropped to keep the task invariants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// A status change was refused (terminal task, or regression)
    pub status_rejected: bool,
    /// A lower progress value was ignored
    pub progress_ignored: bool,
    /// `result`/`error` did not match the resulting status and were dropped
    pub payload_dropped: bool,
}

impl ApplyOutcome {
    pub fn is_clean(&self) -> bool {
        !self.status_rejected && !self.progress_ignored && !self.payload_dropped
    }
}

impl Task {
    /// Create a fresh pending task.
    ///
    /// # Postcondition
    /// `status == Pending`, `progress == 0`, `created_at == updated_at`.
    pub fn new(meeting_id: impl Into<String>, filename: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            meeting_id: meeting_id.into(),
            filename: filename.into(),
            status: TaskStatus::Pending,
            progress: 0,
            result: None,
            summary: None,
            error: None,
            engine: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a summary should be generated for this task now.
    pub fn needs_summary(&self) -> bool {
        self.summary.is_none()
            && self
                .result
                .as_ref()
                .map_or(false, |r| !r.text.trim().is_empty())
    }

    /// Apply a partial update while preserving the task invariants.
    ///
    /// Pure with respect to IO; stores call this under their own lock.
    pub fn apply(&mut self, update: TaskUpdate) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();
        let current = self.status;

        let next = match update.status {
            Some(requested) if current.is_terminal() && requested != current => {
                outcome.status_rejected = true;
                current
            }
            Some(requested) if requested.rank() < current.rank() => {
                outcome.status_rejected = true;
                current
            }
            Some(requested) => requested,
            None => current,
        };

        if !current.is_terminal() {
            if let Some(progress) = update.progress {
                let progress = progress.min(100);
                if current == TaskStatus::Processing
                    && next == TaskStatus::Processing
                    && progress < self.progress
                {
                    outcome.progress_ignored = true;
                } else {
                    self.progress = progress;
                }
            }

            match next {
                TaskStatus::Completed => {
                    if let Some(result) = update.result {
                        self.result = Some(result);
                    }
                    if update.error.is_some() {
                        outcome.payload_dropped = true;
                    }
                    self.error = None;
                    self.progress = 100;
                }
                TaskStatus::Error => {
                    self.error = Some(update.error.unwrap_or_else(|| {
                        TaskError::new(ErrorKind::Internal, "task failed")
                    }));
                    if update.result.is_some() {
                        outcome.payload_dropped = true;
                    }
                    self.result = None;
                }
                TaskStatus::Pending | TaskStatus::Processing => {
                    if update.result.is_some() || update.error.is_some() {
                        outcome.payload_dropped = true;
                    }
                }
            }
            self.status = next;

            if let Some(engine) = update.engine {
                self.engine = Some(engine);
            }
        } else if update.progress.is_some()
            || update.result.is_some()
            || update.error.is_some()
            || update.engine.is_some()
        {
            outcome.payload_dropped = true;
        }

        if let Some(summary) = update.summary {
            self.summary = Some(summary);
        }

        self.updated_at = Utc::now().max(self.updated_at);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(text: &str) -> TranscriptionResult {
        TranscriptionResult {
            text: text.to_string(),
            language: "en".to_string(),
            duration: 1.0,
            segments: vec![],
            engine: Some("local-whisper".to_string()),
        }
    }

    #[test]
    fn test_new_task_is_pending() {
        let task = Task::new("m1", "a.wav");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress, 0);
        assert!(task.result.is_none() && task.error.is_none());
        assert_eq!(task.created_at, task.updated_at);
    }

    #[test]
    fn test_terminal_status_is_final() {
        let mut task = Task::new("m1", "a.wav");
        task.apply(TaskUpdate::completed(result("hi")));
        let outcome = task.apply(TaskUpdate::failed(TaskError::new(
            ErrorKind::Internal,
            "late failure",
        )));
        assert!(outcome.status_rejected);
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.error.is_none());
        assert_eq!(task.result.as_ref().unwrap().text, "hi");

        let outcome = task.apply(TaskUpdate::processing(10));
        assert!(outcome.status_rejected);
        assert_eq!(task.progress, 100);
    }

    #[test]
    fn test_progress_never_decreases_while_processing() {
        let mut task = Task::new("m1", "a.wav");
        task.apply(TaskUpdate::processing(40));
        let outcome = task.apply(TaskUpdate::processing(20));
        assert!(outcome.progress_ignored);
        assert_eq!(task.progress, 40);
        task.apply(TaskUpdate::processing(60));
        assert_eq!(task.progress, 60);
    }

    #[test]
    fn test_processing_cannot_regress_to_pending() {
        let mut task = Task::new("m1", "a.wav");
        task.apply(TaskUpdate::processing(5));
        let outcome = task.apply(TaskUpdate {
            status: Some(TaskStatus::Pending),
            ..Default::default()
        });
        assert!(outcome.status_rejected);
        assert_eq!(task.status, TaskStatus::Processing);
    }

    #[test]
    fn test_result_and_error_are_exclusive() {
        let mut task = Task::new("m1", "a.wav");
        let outcome = task.apply(TaskUpdate {
            status: Some(TaskStatus::Processing),
            result: Some(result("early")),
            ..Default::default()
        });
        assert!(outcome.payload_dropped);
        assert!(task.result.is_none());

        task.apply(TaskUpdate::failed(TaskError::new(
            ErrorKind::AllEnginesFailed,
            "boom",
        )));
        assert_eq!(task.status, TaskStatus::Error);
        assert!(task.result.is_none());
        assert_eq!(task.error.as_ref().unwrap().kind, ErrorKind::AllEnginesFailed);
    }

    #[test]
    fn test_completion_forces_full_progress() {
        let mut task = Task::new("m1", "a.wav");
        task.apply(TaskUpdate::processing(40));
        task.apply(TaskUpdate::completed(result("hello world")));
        assert_eq!(task.progress, 100);
        assert_eq!(task.engine.as_deref(), Some("local-whisper"));
    }

    #[test]
    fn test_unspecified_fields_untouched_and_updated_at_advances() {
        let mut task = Task::new("m1", "a.wav");
        task.apply(TaskUpdate::completed(result("hello")));
        let before = task.updated_at;
        let outcome = task.apply(TaskUpdate::summary(Summary {
            text: "s".into(),
            provider: "fallback".into(),
            model: "fallback".into(),
            created_at: Utc::now(),
        }));
        assert!(outcome.is_clean());
        assert_eq!(task.result.as_ref().unwrap().text, "hello");
        assert!(task.summary.is_some());
        assert!(task.updated_at >= before);
    }

    #[test]
    fn test_needs_summary() {
        let mut task = Task::new("m1", "a.wav");
        assert!(!task.needs_summary());
        task.apply(TaskUpdate::completed(result("text")));
        assert!(task.needs_summary());
    }
}
