//! scribe-orchestrator - CLI Entry Point
//!
//! Transcribes one recording through the engine router, waits for the
//! summary and prints the finished task as JSON.

use anyhow::{bail, Context};
use clap::Parser;
use scribe_orchestrator::config::Config;
use scribe_orchestrator::engine::{
    EngineKind, EngineRouter, HttpEngineSettings, LocalWhisperEngine, OpenAiWhisperEngine,
    RemoteWhisperEngine, TranscribeOptions, TranscriptionRequest, WhisperHttpClient,
};
use scribe_orchestrator::summary::{
    AnthropicProvider, OllamaProvider, OpenAiProvider, ProviderChain,
};
use scribe_orchestrator::supervisor::{ProcessSupervisor, SupervisorConfig};
use scribe_orchestrator::task::{InMemoryTaskStore, TaskManager, TaskStatus};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "scribe-orchestrator")]
#[command(about = "Transcribe and summarize a meeting recording", long_about = None)]
struct Args {
    /// Audio or video file to transcribe
    file: PathBuf,

    /// Spoken language hint (ISO code)
    #[arg(short, long)]
    language: Option<String>,

    /// Pin an engine (local, remote or cloud); disables fallback
    #[arg(short, long, value_parser = parse_engine)]
    engine: Option<EngineKind>,

    /// Meeting the recording belongs to
    #[arg(long, default_value = "cli")]
    meeting_id: String,

    /// Skip waiting for the summary
    #[arg(long)]
    no_summary: bool,
}

fn parse_engine(raw: &str) -> Result<EngineKind, String> {
    EngineKind::parse(raw).ok_or_else(|| format!("unknown engine: {}", raw))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scribe_orchestrator=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;
    info!(
        "Loaded configuration: whisper={} model={} priority={:?}",
        config.whisper.server_url, config.whisper.model, config.engine_priority
    );

    let supervisor = Arc::new(ProcessSupervisor::new(SupervisorConfig::from_whisper(
        &config.whisper,
    )));
    let router = Arc::new(build_router(&config, supervisor.clone()));
    let summarizer = Arc::new(build_provider_chain(&config));

    if config.whisper.autostart {
        match supervisor.start().await {
            Ok(()) => info!(pid = ?supervisor.pid().await, "Local worker ready"),
            Err(e) => warn!("Local worker did not start: {}", e),
        }
    }

    let payload = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let filename = args
        .file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "upload".to_string());
    let request = TranscriptionRequest::new(payload, filename.clone()).with_options(
        TranscribeOptions {
            language: args.language,
            engine: args.engine,
            model: None,
        },
    );

    let manager = TaskManager::new(Arc::new(InMemoryTaskStore::new()), router.clone(), summarizer);
    let task = manager.create(args.meeting_id, filename).await?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, abandoning task");
            ctrl_c.cancel();
        }
    });

    let mut task = manager.process(task.id, request, cancel).await?;
    if task.status == TaskStatus::Completed && !args.no_summary {
        task = manager
            .wait_for_summary(task.id, config.summary_timeout + Duration::from_secs(5))
            .await?;
    }

    router.shutdown().await;
    println!("{}", serde_json::to_string_pretty(&task)?);

    match (&task.status, &task.error) {
        (TaskStatus::Error, Some(err)) => bail!("{} ({})", err.message, err.kind),
        (TaskStatus::Completed, _) => Ok(()),
        (status, _) => bail!("Task ended in status {:?}", status),
    }
}

fn build_router(config: &Config, supervisor: Arc<ProcessSupervisor>) -> EngineRouter {
    let mut router = EngineRouter::new(config.engine_priority.clone(), config.probe_timeout);

    let local = WhisperHttpClient::new(config.whisper.server_url.clone(), HttpEngineSettings::default());
    router.register(Arc::new(LocalWhisperEngine::new(supervisor, local)));

    if let Some(url) = &config.remote_whisper_url {
        let remote = WhisperHttpClient::new(url.clone(), HttpEngineSettings::default());
        router.register(Arc::new(RemoteWhisperEngine::new(remote)));
        info!("Remote engine registered at {}", url);
    }

    if let Some(key) = &config.providers.openai_api_key {
        router.register(Arc::new(OpenAiWhisperEngine::new(
            key.clone(),
            config.providers.openai_base_url.clone(),
        )));
        info!("Cloud engine registered");
    }

    router
}

fn build_provider_chain(config: &Config) -> ProviderChain {
    let providers = &config.providers;
    let mut chain = ProviderChain::new(config.summary_timeout, config.probe_timeout);

    chain.register(Arc::new(OllamaProvider::new(
        providers.ollama_base_url.clone(),
        providers.ollama_model.clone(),
    )));
    if let Some(key) = &providers.openai_api_key {
        let mut provider = OpenAiProvider::new(key.clone(), providers.openai_base_url.clone());
        if let Some(model) = &providers.openai_model {
            provider = provider.with_model(model.clone());
        }
        chain.register(Arc::new(provider));
    }
    if let Some(key) = &providers.anthropic_api_key {
        chain.register(Arc::new(AnthropicProvider::new(key.clone())));
    }

    chain
}
