//! Configuration management for the orchestrator.
//!
//! Configuration is read from environment variables:
//! - `WHISPER_SERVER_PORT` - Optional. Local worker port. Defaults to `8178`.
//! - `WHISPER_SERVER_URL` - Optional. Local worker base URL. Defaults to `http://localhost:{port}`.
//! - `WHISPER_MODEL_SIZE` / `WHISPER_MODEL` - Optional. Model passed as `--model-path`. Defaults to `small`.
//! - `WHISPER_WORKER_COMMAND` - Optional. Worker program. Defaults to `python`.
//! - `WHISPER_WORKER_SCRIPT` - Optional. Worker script. Defaults to `app.py`.
//! - `WHISPER_READY_MARKER` - Optional. Stdout line announcing readiness.
//! - `WHISPER_AUTOSTART` - Optional. Spawn the worker at boot. Defaults to `true`.
//! - `REMOTE_WHISPER_URL` - Optional. Registers the remote HTTP engine.
//! - `OPENAI_API_KEY` - Optional. Enables the cloud engine and the OpenAI provider.
//! - `OPENAI_BASE_URL` - Optional. Defaults to `https://api.openai.com/v1`.
//! - `OPENAI_MODEL` - Optional. Chat model for OpenAI summaries. Defaults to `gpt-3.5-turbo`.
//! - `ANTHROPIC_API_KEY` - Optional. Enables the Anthropic provider.
//! - `OLLAMA_BASE_URL` - Optional. Defaults to `http://localhost:11434`.
//! - `OLLAMA_MODEL` - Optional. Defaults to `llama3.2:1b`.
//! - `ENGINE_PRIORITY` - Optional. Comma separated engine kinds. Defaults to `local,remote,cloud`.
//! - `PROBE_TIMEOUT_SECS` - Optional. Availability probe ceiling. Defaults to `5`.
//! - `SUMMARY_TIMEOUT_SECS` - Optional. Provider call ceiling. Defaults to `1800`.

use std::time::Duration;
use thiserror::Error;

use crate::engine::EngineKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

pub const DEFAULT_WHISPER_PORT: u16 = 8178;
pub const DEFAULT_READY_MARKER: &str = "Starting Whisper service on";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.2:1b";

/// Local worker (subprocess engine) configuration.
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    pub server_url: String,
    pub server_port: u16,
    pub model: String,
    pub worker_command: String,
    pub worker_script: String,
    pub ready_marker: String,
    pub autostart: bool,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            server_url: format!("http://localhost:{}", DEFAULT_WHISPER_PORT),
            server_port: DEFAULT_WHISPER_PORT,
            model: "small".to_string(),
            worker_command: "python".to_string(),
            worker_script: "app.py".to_string(),
            ready_marker: DEFAULT_READY_MARKER.to_string(),
            autostart: true,
        }
    }
}

/// API keys and base URLs for cloud services and the local model server.
#[derive(Debug, Clone)]
pub struct ProvidersConfig {
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    /// Chat model for OpenAI summaries (provider default when unset)
    pub openai_model: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub ollama_base_url: String,
    pub ollama_model: String,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            openai_model: None,
            anthropic_api_key: None,
            ollama_base_url: DEFAULT_OLLAMA_BASE_URL.to_string(),
            ollama_model: DEFAULT_OLLAMA_MODEL.to_string(),
        }
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Local worker settings
    pub whisper: WhisperConfig,

    /// Remote HTTP engine base URL (engine registered only when set)
    pub remote_whisper_url: Option<String>,

    /// Summary provider and cloud engine credentials
    pub providers: ProvidersConfig,

    /// Engine kinds, highest priority first
    pub engine_priority: Vec<EngineKind>,

    /// Ceiling for each availability probe
    pub probe_timeout: Duration,

    /// Ceiling for each summary provider call
    pub summary_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            whisper: WhisperConfig::default(),
            remote_whisper_url: None,
            providers: ProvidersConfig::default(),
            engine_priority: EngineKind::default_priority().to_vec(),
            probe_timeout: Duration::from_secs(5),
            summary_timeout: Duration::from_secs(30 * 60),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` when a numeric, boolean or list
    /// variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup (the environment in
    /// production, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let server_port: u16 = parse_or(&lookup, "WHISPER_SERVER_PORT", DEFAULT_WHISPER_PORT)?;
        let server_url = non_empty("WHISPER_SERVER_URL")
            .unwrap_or_else(|| format!("http://localhost:{}", server_port));
        let model = non_empty("WHISPER_MODEL_SIZE")
            .or_else(|| non_empty("WHISPER_MODEL"))
            .unwrap_or_else(|| "small".to_string());

        let whisper = WhisperConfig {
            server_url,
            server_port,
            model,
            worker_command: non_empty("WHISPER_WORKER_COMMAND")
                .unwrap_or_else(|| "python".to_string()),
            worker_script: non_empty("WHISPER_WORKER_SCRIPT")
                .unwrap_or_else(|| "app.py".to_string()),
            ready_marker: non_empty("WHISPER_READY_MARKER")
                .unwrap_or_else(|| DEFAULT_READY_MARKER.to_string()),
            autostart: parse_bool(&lookup, "WHISPER_AUTOSTART", true)?,
        };

        let providers = ProvidersConfig {
            openai_api_key: non_empty("OPENAI_API_KEY"),
            openai_base_url: non_empty("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            openai_model: non_empty("OPENAI_MODEL"),
            anthropic_api_key: non_empty("ANTHROPIC_API_KEY"),
            ollama_base_url: non_empty("OLLAMA_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OLLAMA_BASE_URL.to_string()),
            ollama_model: non_empty("OLLAMA_MODEL")
                .unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string()),
        };

        let engine_priority = match non_empty("ENGINE_PRIORITY") {
            Some(raw) => parse_priority(&raw)?,
            None => EngineKind::default_priority().to_vec(),
        };

        let probe_timeout = Duration::from_secs(parse_or(&lookup, "PROBE_TIMEOUT_SECS", 5u64)?);
        let summary_timeout =
            Duration::from_secs(parse_or(&lookup, "SUMMARY_TIMEOUT_SECS", 30 * 60u64)?);

        Ok(Self {
            whisper,
            remote_whisper_url: non_empty("REMOTE_WHISPER_URL"),
            providers,
            engine_priority,
            probe_timeout,
            summary_timeout,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), format!("{}", e))),
        None => Ok(default),
    }
}

fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "" => Ok(default),
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::InvalidValue(
                key.to_string(),
                format!("expected a boolean, got {}", other),
            )),
        },
    }
}

fn parse_priority(raw: &str) -> Result<Vec<EngineKind>, ConfigError> {
    let mut kinds = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let kind = EngineKind::parse(item).ok_or_else(|| {
            ConfigError::InvalidValue("ENGINE_PRIORITY".to_string(), item.to_string())
        })?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    // Kinds left out keep their default relative order after the listed ones.
    for kind in EngineKind::default_priority() {
        if !kinds.contains(kind) {
            kinds.push(*kind);
        }
    }
    Ok(kinds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.whisper.server_port, 8178);
        assert_eq!(config.whisper.server_url, "http://localhost:8178");
        assert_eq!(config.whisper.model, "small");
        assert!(config.whisper.autostart);
        assert!(config.remote_whisper_url.is_none());
        assert!(config.providers.openai_api_key.is_none());
        assert_eq!(
            config.engine_priority,
            vec![EngineKind::LocalSubprocess, EngineKind::RemoteHttp, EngineKind::CloudApi]
        );
        assert_eq!(config.summary_timeout, Duration::from_secs(1800));
    }

    #[test]
    fn test_port_feeds_default_url() {
        let config = Config::from_lookup(lookup(&[("WHISPER_SERVER_PORT", "9000")])).unwrap();
        assert_eq!(config.whisper.server_url, "http://localhost:9000");
    }

    #[test]
    fn test_invalid_port() {
        let err = Config::from_lookup(lookup(&[("WHISPER_SERVER_PORT", "abc")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref k, _) if k == "WHISPER_SERVER_PORT"));
    }

    #[test]
    fn test_priority_override_keeps_missing_kinds() {
        let config = Config::from_lookup(lookup(&[("ENGINE_PRIORITY", "cloud, local")])).unwrap();
        assert_eq!(
            config.engine_priority,
            vec![EngineKind::CloudApi, EngineKind::LocalSubprocess, EngineKind::RemoteHttp]
        );
    }

    #[test]
    fn test_priority_rejects_unknown_kind() {
        assert!(Config::from_lookup(lookup(&[("ENGINE_PRIORITY", "local,gpu")])).is_err());
    }

    #[test]
    fn test_empty_key_is_ignored() {
        let config = Config::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "  "),
            ("ANTHROPIC_API_KEY", "sk-ant"),
            ("WHISPER_AUTOSTART", "false"),
        ]))
        .unwrap();
        assert!(config.providers.openai_api_key.is_none());
        assert_eq!(config.providers.anthropic_api_key.as_deref(), Some("sk-ant"));
        assert!(!config.whisper.autostart);
    }

    #[test]
    fn test_openai_model_override() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert!(config.providers.openai_model.is_none());

        let config = Config::from_lookup(lookup(&[("OPENAI_MODEL", "gpt-4o-mini")])).unwrap();
        assert_eq!(config.providers.openai_model.as_deref(), Some("gpt-4o-mini"));
    }
}
