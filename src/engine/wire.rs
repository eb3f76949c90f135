//! Wire types shared by the HTTP engines and the poller.
//!
//! Engines are loose about field names (`start`/`t0`, `language`/
//! `detected_language`), so everything here is optional and the shape is
//! fixed up in [`RawTranscription::normalize`].

use serde::Deserialize;

use crate::error::EngineError;
use crate::task::{Segment, TranscriptionResult, Word};

/// Confidence assigned to synthesized word timestamps.
const SYNTHETIC_WORD_PROBABILITY: f32 = 0.9;

/// Task status as reported by an engine's status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    Pending,
    Processing,
    Completed,
    Error,
    /// Anything else (`queued`, `uploading`, ...) is treated as still running
    #[serde(other)]
    Unknown,
}

impl RemoteStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// Body of `GET /status/{task_id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineTaskStatus {
    pub status: RemoteStatus,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub result: Option<RawTranscription>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub detected_language: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSegment {
    #[serde(default)]
    pub start: Option<f64>,
    #[serde(default)]
    pub end: Option<f64>,
    #[serde(default)]
    pub t0: Option<f64>,
    #[serde(default)]
    pub t1: Option<f64>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub words: Option<Vec<Word>>,
}

/// Transcription payload as engines return it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTranscription {
    #[serde(default, alias = "transcription")]
    pub text: Option<String>,
    #[serde(default)]
    pub segments: Option<Vec<RawSegment>>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub detected_language: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
}

impl RawTranscription {
    /// Normalize into a [`TranscriptionResult`].
    ///
    /// Segment output wins; whole text is the fallback; neither is
    /// [`EngineError::EmptyResult`].
    pub fn normalize(
        self,
        engine: &str,
        language_hint: Option<&str>,
    ) -> Result<TranscriptionResult, EngineError> {
        let segments: Vec<Segment> = self
            .segments
            .unwrap_or_default()
            .into_iter()
            .filter_map(normalize_segment)
            .collect();

        let whole_text = self
            .text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        let (text, segments) = if !segments.is_empty() {
            let joined = segments
                .iter()
                .map(|s| s.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            (whole_text.unwrap_or(joined), segments)
        } else if let Some(text) = whole_text {
            let end = self.duration.unwrap_or(0.0).max(0.0);
            let words = synthesize_words(&text, 0.0, end);
            let segment = Segment {
                start: 0.0,
                end,
                text: text.clone(),
                words,
            };
            (text, vec![segment])
        } else {
            return Err(EngineError::EmptyResult);
        };

        let duration = self
            .duration
            .or_else(|| segments.last().map(|s| s.end))
            .unwrap_or(0.0);
        let language = self
            .language
            .or(self.detected_language)
            .or_else(|| language_hint.map(str::to_string))
            .unwrap_or_else(|| "auto".to_string());

        Ok(TranscriptionResult {
            text,
            language,
            duration,
            segments,
            engine: Some(engine.to_string()),
        })
    }
}

fn normalize_segment(raw: RawSegment) -> Option<Segment> {
    let text = raw.text.map(|t| t.trim().to_string()).unwrap_or_default();
    if text.is_empty() {
        return None;
    }
    let start = raw.start.or(raw.t0).unwrap_or(0.0);
    let end = raw.end.or(raw.t1).unwrap_or(start).max(start);
    let words = match raw.words {
        Some(words) if !words.is_empty() => words,
        _ => synthesize_words(&text, start, end),
    };
    Some(Segment {
        start,
        end,
        text,
        words,
    })
}

/// Spread the whitespace-separated words of `text` evenly over `[start, end]`.
pub(crate) fn synthesize_words(text: &str, start: f64, end: f64) -> Vec<Word> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.is_empty() {
        return Vec::new();
    }
    let step = (end - start).max(0.0) / tokens.len() as f64;
    tokens
        .into_iter()
        .enumerate()
        .map(|(i, token)| {
            let word_start = start + step * i as f64;
            Word {
                word: token.to_string(),
                start: round_ms(word_start),
                end: round_ms((word_start + step).min(end)),
                probability: SYNTHETIC_WORD_PROBABILITY,
            }
        })
        .collect()
}

fn round_ms(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}
