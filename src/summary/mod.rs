//! Summarization providers and the fallback chain in front of them.
//!
//! The chain never fails: when every provider is unavailable, errors out or
//! times out, a deterministic local summary is produced instead.

mod anthropic;
mod ollama;
mod openai;

pub use anthropic::AnthropicProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::engine::probe_with_timeout;
use crate::error::ProviderError;
use crate::task::Summary;

/// Provider name and model recorded for locally generated summaries.
pub const FALLBACK_PROVIDER: &str = "fallback";

/// Characters per minute used for the fallback's duration estimate.
const CHARS_PER_MINUTE: usize = 150;
const FALLBACK_KEY_SENTENCES: usize = 3;
const MIN_SENTENCE_CHARS: usize = 10;
/// Sentence terminators, full-width and ASCII.
const SENTENCE_BOUNDARY: &str = r"[。！？.!?]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// Model server on this machine (Ollama)
    LocalModel,
    /// Hosted LLM API
    CloudApi,
}

/// Trait for summarization providers.
#[async_trait]
pub trait SummaryProvider: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    fn model(&self) -> &str;

    /// Cheap availability check. Never fails.
    async fn probe(&self) -> bool;

    /// Summarize `text` using the fully rendered `prompt`.
    async fn summarize(&self, text: &str, prompt: &str) -> Result<String, ProviderError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub kind: ProviderKind,
    pub model: String,
    pub available: bool,
}

/// Providers tried in registration order, each call raced against a timeout.
pub struct ProviderChain {
    providers: Vec<Arc<dyn SummaryProvider>>,
    call_timeout: Duration,
    probe_timeout: Duration,
}

impl ProviderChain {
    pub fn new(call_timeout: Duration, probe_timeout: Duration) -> Self {
        Self {
            providers: Vec::new(),
            call_timeout,
            probe_timeout,
        }
    }

    pub fn register(&mut self, provider: Arc<dyn SummaryProvider>) {
        tracing::info!(provider = %provider.name(), model = %provider.model(), "Registered summary provider");
        self.providers.push(provider);
    }

    pub fn with_provider(mut self, provider: Arc<dyn SummaryProvider>) -> Self {
        self.register(provider);
        self
    }

    /// Summarize `text`. Always returns a usable summary.
    pub async fn summarize(&self, text: &str) -> Summary {
        let prompt = summary_prompt(text);

        for provider in &self.providers {
            let name = provider.name();
            if !probe_with_timeout(name, self.probe_timeout, provider.probe()).await {
                let e = ProviderError::Unavailable {
                    provider: name.to_string(),
                };
                tracing::warn!(provider = %name, kind = %e.kind(), error = %e, "Skipping summary provider");
                continue;
            }

            tracing::info!(provider = %name, "Generating summary");
            let outcome = tokio::select! {
                outcome = provider.summarize(text, &prompt) => outcome,
                _ = tokio::time::sleep(self.call_timeout) => Err(ProviderError::Timeout {
                    provider: name.to_string(),
                    secs: self.call_timeout.as_secs(),
                }),
            };

            match outcome {
                Ok(summary) if !summary.trim().is_empty() => {
                    tracing::info!(provider = %name, chars = summary.chars().count(), "Summary generated");
                    return Summary {
                        text: summary,
                        provider: name.to_string(),
                        model: provider.model().to_string(),
                        created_at: Utc::now(),
                    };
                }
                Ok(_) => {
                    tracing::warn!(provider = %name, "Provider returned an empty summary, trying next");
                }
                Err(e) => {
                    tracing::warn!(provider = %name, kind = %e.kind(), error = %e, "Summary provider failed, trying next");
                }
            }
        }

        tracing::warn!("All summary providers failed, using fallback summary");
        Summary {
            text: fallback_summary(text),
            provider: FALLBACK_PROVIDER.to_string(),
            model: FALLBACK_PROVIDER.to_string(),
            created_at: Utc::now(),
        }
    }

    /// Probe every provider, in registration order.
    pub async fn provider_status(&self) -> Vec<ProviderStatus> {
        let mut status = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            let available =
                probe_with_timeout(provider.name(), self.probe_timeout, provider.probe()).await;
            status.push(ProviderStatus {
                name: provider.name().to_string(),
                kind: provider.kind(),
                model: provider.model().to_string(),
                available,
            });
        }
        status
    }
}

/// Prompt asking for key points, decisions and action items.
pub fn summary_prompt(transcript: &str) -> String {
    format!(
        r#"You are a meeting summary assistant. Summarize the following meeting transcript, extracting the key points, decisions and action items.

Transcript:
"{transcript}"

Answer strictly in this format:

## Meeting Summary

### Key Points
- [point]

### Decisions
- [decision]

### Action Items
- [action item]

### Other
- Estimated duration: [estimate]
- Participants: [inferred from the content]
- Topics: [main topics]

Keep it concise and focus on the most important information."#
    )
}

fn sentence_splitter() -> &'static Regex {
    static SPLITTER: OnceLock<Regex> = OnceLock::new();
    SPLITTER.get_or_init(|| Regex::new(SENTENCE_BOUNDARY).unwrap())
}

/// Deterministic summary built without any model.
///
/// Keeps the first few substantial sentences and reports the transcript's
/// character count and an estimated duration.
pub fn fallback_summary(text: &str) -> String {
    let char_count = text.chars().count();
    let minutes = ((char_count as f64 / CHARS_PER_MINUTE as f64).round() as usize).max(1);

    let key: Vec<&str> = sentence_splitter()
        .split(text)
        .map(str::trim)
        .filter(|s| s.chars().count() > MIN_SENTENCE_CHARS)
        .take(FALLBACK_KEY_SENTENCES)
        .collect();
    let key_content = if key.is_empty() {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            "(no transcript content)".to_string()
        } else {
            trimmed.chars().take(200).collect()
        }
    } else {
        format!("{}.", key.join(". "))
    };

    format!(
        "## Meeting Summary (basic)\n\n\
         ### Key Content\n{}\n\n\
         ### Details\n\
         - Transcript length: {} characters\n\
         - Estimated duration: {} min\n\n\
         _Basic summary. Configure a summary provider for a detailed analysis._",
        key_content,
        char_count,
        minutes,
    )
}

/// Build a [`ProviderError`] from a non-2xx response body.
///
/// Understands the `{"error": {"message": ...}}` shape used by hosted APIs.
pub(crate) fn http_failure(provider: &str, status: reqwest::StatusCode, body: &str) -> ProviderError {
    #[derive(Deserialize)]
    struct ApiError {
        error: ApiErrorDetail,
    }
    #[derive(Deserialize)]
    struct ApiErrorDetail {
        message: String,
    }

    let message = serde_json::from_str::<ApiError>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string());
    ProviderError::invocation(provider, format!("HTTP {}: {}", status.as_u16(), message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    enum Behavior {
        Unavailable,
        Fail,
        Hang,
        Answer(&'static str),
    }

    struct FakeProvider {
        name: &'static str,
        behavior: Behavior,
        calls: AtomicU32,
    }

    impl FakeProvider {
        fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                name,
                behavior,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl SummaryProvider for FakeProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn kind(&self) -> ProviderKind {
            ProviderKind::CloudApi
        }

        fn model(&self) -> &str {
            "fake-model"
        }

        async fn probe(&self) -> bool {
            !matches!(self.behavior, Behavior::Unavailable)
        }

        async fn summarize(&self, _text: &str, _prompt: &str) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Unavailable => unreachable!("unavailable provider invoked"),
                Behavior::Fail => Err(ProviderError::invocation(self.name, "HTTP 500")),
                Behavior::Hang => futures::future::pending().await,
                Behavior::Answer(text) => Ok(text.to_string()),
            }
        }
    }

    fn chain() -> ProviderChain {
        ProviderChain::new(Duration::from_secs(30 * 60), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_no_providers_uses_fallback() {
        let summary = chain().summarize("some text").await;
        assert_eq!(summary.provider, FALLBACK_PROVIDER);
        assert_eq!(summary.model, FALLBACK_PROVIDER);
        assert!(!summary.text.is_empty());
    }

    #[tokio::test]
    async fn test_failing_provider_falls_through() {
        let first = FakeProvider::new("first", Behavior::Fail);
        let second = FakeProvider::new("second", Behavior::Answer("- decided to ship"));
        let summary = chain()
            .with_provider(first.clone())
            .with_provider(second.clone())
            .summarize("transcript")
            .await;
        assert_eq!(summary.provider, "second");
        assert_eq!(summary.text, "- decided to ship");
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unavailable_provider_is_not_called() {
        let down = FakeProvider::new("down", Behavior::Unavailable);
        let up = FakeProvider::new("up", Behavior::Answer("ok"));
        let summary = chain()
            .with_provider(down.clone())
            .with_provider(up)
            .summarize("transcript")
            .await;
        assert_eq!(summary.provider, "up");
        assert_eq!(down.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_answer_is_rejected() {
        let blank = FakeProvider::new("blank", Behavior::Answer("   "));
        let summary = chain().with_provider(blank).summarize("transcript").await;
        assert_eq!(summary.provider, FALLBACK_PROVIDER);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_providers_time_out() {
        let text = "The quarterly numbers look strong overall. We agreed to hire two engineers.";
        let chain = chain()
            .with_provider(FakeProvider::new("ollama", Behavior::Hang))
            .with_provider(FakeProvider::new("openai", Behavior::Hang))
            .with_provider(FakeProvider::new("anthropic", Behavior::Hang));

        let started = tokio::time::Instant::now();
        let summary = chain.summarize(text).await;

        assert_eq!(summary.provider, FALLBACK_PROVIDER);
        assert!(summary
            .text
            .contains(&format!("{} characters", text.chars().count())));
        assert!(started.elapsed() <= Duration::from_secs(3 * 30 * 60 + 1));
    }

    #[test]
    fn test_fallback_keeps_first_substantial_sentences() {
        let text = "Hi. Welcome everyone to the planning meeting! Short one? \
                    We will ship the release on Friday. Marketing owns the announcement. \
                    This fourth long sentence is dropped.";
        let summary = fallback_summary(text);
        assert!(summary.contains(
            "Welcome everyone to the planning meeting. We will ship the release on Friday. Marketing owns the announcement."
        ));
        assert!(!summary.contains("fourth"));
        assert!(!summary.contains("Hi."));
    }

    #[test]
    fn test_fallback_handles_cjk_punctuation_and_duration() {
        let text = "今天我们讨论了下一个季度的产品路线图和预算。大家同意优先完成移动端的重构工作！";
        let summary = fallback_summary(text);
        assert!(summary.contains(&format!("{} characters", text.chars().count())));
        assert!(summary.contains("Estimated duration: 1 min"));

        let long = "word ".repeat(120);
        assert!(fallback_summary(&long).contains("Estimated duration: 4 min"));
    }

    #[test]
    fn test_fallback_is_deterministic() {
        let text = "We reviewed the hiring plan for next quarter. Budget was approved.";
        assert_eq!(fallback_summary(text), fallback_summary(text));
    }

    #[test]
    fn test_fallback_on_empty_text() {
        let summary = fallback_summary("");
        assert!(summary.contains("0 characters"));
        assert!(summary.contains("no transcript content"));
    }

    #[test]
    fn test_prompt_embeds_transcript() {
        let prompt = summary_prompt("we ship friday");
        assert!(prompt.contains("\"we ship friday\""));
        assert!(prompt.contains("Action Items"));
    }

    #[tokio::test]
    async fn test_provider_status() {
        let status = chain()
            .with_provider(FakeProvider::new("a", Behavior::Unavailable))
            .with_provider(FakeProvider::new("b", Behavior::Fail))
            .provider_status()
            .await;
        assert_eq!(status.len(), 2);
        assert!(!status[0].available);
        assert!(status[1].available);
        assert_eq!(status[1].model, "fake-model");
    }
}
