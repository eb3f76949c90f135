//! # Scribe Orchestrator
//!
//! Turns uploaded meeting recordings into transcripts and summaries by
//! routing work across several interchangeable speech-to-text engines.
//!
//! This library provides:
//! - An engine router that probes engines in priority order and falls back
//! - A supervisor for the locally spawned worker process
//! - Adaptive polling of long-running remote transcription jobs
//! - A summary provider chain that always yields some summary
//!
//! ## Architecture
//!
//! ```text
//!        ┌──────────────────────────────────┐
//!        │           TaskManager            │
//!        │  (status, progress, summaries)   │
//!        └───────┬──────────────────┬───────┘
//!                │                  │
//!                ▼                  ▼
//!        ┌───────────────┐  ┌───────────────┐
//!        │ EngineRouter  │  │ ProviderChain │
//!        └───────┬───────┘  └───────────────┘
//!                │
//!      ┌─────────┼──────────┐
//!      ▼         ▼          ▼
//!    local     remote     cloud
//!  (worker)   (HTTP)    (vendor API)
//! ```
//!
//! ## Task Flow
//! 1. Create a task for the uploaded file
//! 2. Route to the first available engine, falling back on failure
//! 3. Poll asynchronous engines within a size-derived timeout budget
//! 4. Store the transcript and summarize it in the background
//!
//! ## Modules
//! - `engine`: engines, routing, polling and timeout budgets
//! - `supervisor`: local worker process lifecycle
//! - `summary`: summary providers and the extractive fallback
//! - `task`: task records, storage and the lifecycle manager

pub mod config;
pub mod engine;
pub mod error;
pub mod summary;
pub mod supervisor;
pub mod task;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use engine::{EngineKind, EngineRouter, TranscribeOptions, TranscriptionRequest};
pub use error::{EngineError, ErrorKind, ProviderError};
pub use summary::ProviderChain;
pub use supervisor::ProcessSupervisor;
pub use task::{Task, TaskManager, TaskStatus};
