//! Adaptive polling of asynchronous engine tasks.
//!
//! # State Machine
//! ```text
//! polling -> completed | error | timed_out | abandoned
//! ```
//!
//! The interval widens with the attempt count: fast early on, slower once a
//! job is clearly long running. A handle is never queried again after a
//! terminal status has been observed for it.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

use super::budget::TimeoutBudget;
use super::wire::{EngineTaskStatus, RemoteStatus};
use super::TranscribeContext;
use crate::error::EngineError;
use crate::task::TranscriptionResult;

/// Failure of a single status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusFetchError {
    /// Worth retrying (network error, 5xx, malformed body)
    Transient(String),
    /// The handle is gone or the request can never succeed
    Permanent(String),
}

impl std::fmt::Display for StatusFetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient(msg) | Self::Permanent(msg) => f.write_str(msg),
        }
    }
}

/// Something that can report the status of an engine-side task.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self, handle: &str) -> Result<EngineTaskStatus, StatusFetchError>;
}

/// Interval schedule keyed by attempt number.
#[derive(Debug, Clone)]
pub struct PollSchedule {
    pub fast_interval: Duration,
    pub fast_attempts: u32,
    pub medium_interval: Duration,
    pub medium_attempts: u32,
    pub slow_interval: Duration,
    /// Consecutive transient failures tolerated before giving up
    pub max_consecutive_errors: u32,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            fast_interval: Duration::from_secs(1),
            fast_attempts: 60,
            medium_interval: Duration::from_secs(5),
            medium_attempts: 60,
            slow_interval: Duration::from_secs(30),
            max_consecutive_errors: 5,
        }
    }
}

impl PollSchedule {
    /// Sleep before the attempt following `attempts` completed ones.
    pub fn interval_for(&self, attempts: u32) -> Duration {
        if attempts < self.fast_attempts {
            self.fast_interval
        } else if attempts < self.fast_attempts + self.medium_attempts {
            self.medium_interval
        } else {
            self.slow_interval
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AdaptivePoller {
    schedule: PollSchedule,
}

impl AdaptivePoller {
    pub fn new(schedule: PollSchedule) -> Self {
        Self { schedule }
    }

    pub fn schedule(&self) -> &PollSchedule {
        &self.schedule
    }

    /// Poll `handle` on `source` until it finishes, fails or runs out of budget.
    ///
    /// Progress observed while running is forwarded to `ctx` capped at 99;
    /// only the terminal transition may report 100.
    pub async fn await_completion(
        &self,
        source: &dyn StatusSource,
        engine: &str,
        handle: &str,
        budget: TimeoutBudget,
        language_hint: Option<&str>,
        ctx: &TranscribeContext,
    ) -> Result<TranscriptionResult, EngineError> {
        let started = Instant::now();
        let mut attempts: u32 = 0;
        let mut consecutive_errors: u32 = 0;
        let mut last_progress: Option<u8> = None;

        tracing::info!(
            engine = %engine,
            handle = %handle,
            timeout_secs = budget.timeout_secs(),
            max_attempts = budget.max_poll_attempts,
            "Polling engine task"
        );

        loop {
            if ctx.cancel.is_cancelled() {
                tracing::info!(engine = %engine, handle = %handle, "Polling abandoned");
                return Err(EngineError::Cancelled);
            }
            if attempts >= budget.max_poll_attempts || started.elapsed() >= budget.timeout {
                tracing::warn!(
                    engine = %engine,
                    handle = %handle,
                    attempts,
                    "Polling budget exhausted"
                );
                return Err(EngineError::PollTimeout {
                    attempts,
                    elapsed_secs: started.elapsed().as_secs(),
                });
            }
            attempts += 1;

            let fetched = tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(EngineError::Cancelled),
                fetched = source.fetch_status(handle) => fetched,
            };

            match fetched {
                Ok(status) => {
                    consecutive_errors = 0;
                    match status.status {
                        RemoteStatus::Completed => {
                            let raw = status.result.ok_or(EngineError::EmptyResult)?;
                            let hint = status.detected_language.as_deref().or(language_hint);
                            let result = raw.normalize(engine, hint)?;
                            tracing::info!(
                                engine = %engine,
                                handle = %handle,
                                attempts,
                                segments = result.segments.len(),
                                "Engine task completed"
                            );
                            return Ok(result);
                        }
                        RemoteStatus::Error => {
                            let detail = status
                                .error
                                .unwrap_or_else(|| "engine reported an unknown error".to_string());
                            return Err(EngineError::invocation(engine, detail));
                        }
                        RemoteStatus::Pending
                        | RemoteStatus::Processing
                        | RemoteStatus::Unknown => {
                            if let Some(p) = status.progress {
                                let p = p.clamp(0.0, 99.0) as u8;
                                if last_progress.map_or(true, |last| p > last) {
                                    last_progress = Some(p);
                                    ctx.report(p).await;
                                }
                            }
                        }
                    }
                }
                Err(StatusFetchError::Permanent(msg)) => {
                    tracing::warn!(engine = %engine, handle = %handle, error = %msg, "Status query failed permanently");
                    return Err(EngineError::invocation(engine, msg));
                }
                Err(StatusFetchError::Transient(msg)) => {
                    consecutive_errors += 1;
                    tracing::warn!(
                        engine = %engine,
                        handle = %handle,
                        consecutive_errors,
                        error = %msg,
                        "Status query failed"
                    );
                    if consecutive_errors >= self.schedule.max_consecutive_errors {
                        return Err(EngineError::TooManyConsecutiveErrors {
                            count: consecutive_errors,
                            last_error: msg,
                        });
                    }
                }
            }

            let interval = self.schedule.interval_for(attempts);
            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(EngineError::Cancelled),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}
