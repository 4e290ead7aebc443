mod cli;
mod ui;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use ecoroute::config::EcorouteConfig;
use ecoroute::services::{
    ExtractiveSummarizer, FileStore, HashingEmbedder, OverlapChecker, PlainTextTriage,
    ResultStore, StaticSignalSource, Summarizer, TierModels,
};
use ecoroute::{
    Collaborators, Document, JobOrchestrator, JobState, OrchestratorSettings, RagQueryEngine,
    Strategy, llm,
};
use ui::JobProgress;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => EcorouteConfig::load_from(path)?,
        None => EcorouteConfig::load()?,
    };

    match cli.command {
        Command::Summarize {
            file,
            strategy,
            location,
        } => {
            if let Some(location) = location {
                config.carbon.location = location;
            }
            summarize(&config, &file, strategy.into()).await
        }
        Command::Query {
            document_id,
            question,
        } => query(&config, &document_id, &question).await,
        Command::Documents => {
            let store = FileStore::open(&config.storage_dir.0)?;
            ui::print_documents(&store.list_documents()?);
            Ok(())
        }
        Command::Stats => {
            let store = FileStore::open(&config.storage_dir.0)?;
            ui::print_stats(&store.dashboard_stats()?);
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "ecoroute=debug" } else { "ecoroute=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Remote models when an API key is configured, the offline extractive tiers otherwise.
fn tier_models(config: &EcorouteConfig) -> Result<TierModels> {
    if config.models.api_key.is_empty() {
        warn!("no API key configured, using offline extractive summarizers");
        return Ok(TierModels::from_fn(|tier| {
            Arc::new(ExtractiveSummarizer::new(tier)) as Arc<dyn Summarizer>
        }));
    }
    Ok(llm::tier_models(
        &config.models,
        config.pipeline.model_timeout(),
    )?)
}

fn collaborators(config: &EcorouteConfig, store: Arc<FileStore>) -> Result<Collaborators> {
    Ok(Collaborators {
        triage: Arc::new(PlainTextTriage::new(config.pipeline.max_chunk_chars)),
        models: tier_models(config)?,
        checker: Arc::new(OverlapChecker::default()),
        signal: Arc::new(StaticSignalSource::from_config(&config.carbon)),
        embedder: Arc::new(HashingEmbedder::default()),
        vectors: store.clone(),
        results: store,
    })
}

async fn summarize(config: &EcorouteConfig, file: &Path, strategy: Strategy) -> Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());

    let store = Arc::new(FileStore::open(&config.storage_dir.0)?);
    let orchestrator = JobOrchestrator::new(
        collaborators(config, store)?,
        OrchestratorSettings::from_config(config),
    );
    let job_id = orchestrator.submit(Document::new(name.clone(), bytes), strategy)?;
    info!(%job_id, %strategy, location = %config.carbon.location, "submitted");

    let progress = JobProgress::start(&name);
    let mut rx = orchestrator.watch(&job_id)?;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let status = loop {
        let status = rx.borrow_and_update().clone();
        progress.update(&status);
        if status.state.is_terminal() {
            break status;
        }
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break orchestrator.status(&job_id)?;
                }
            }
            _ = &mut ctrl_c => {
                orchestrator.cancel(&job_id)?;
                break orchestrator.wait(&job_id).await?;
            }
        }
    };
    progress.complete(&status);

    if status.state != JobState::Complete {
        bail!("job {job_id} did not complete");
    }
    progress.print_output(&orchestrator.result(&job_id)?);
    Ok(())
}

async fn query(config: &EcorouteConfig, document_id: &str, question: &str) -> Result<()> {
    let store = Arc::new(FileStore::open(&config.storage_dir.0)?);
    let engine = RagQueryEngine::new(
        Arc::new(HashingEmbedder::default()),
        store,
        tier_models(config)?,
        Arc::new(OverlapChecker::default()),
        config.rag.clone(),
        config.pipeline.model_timeout(),
    );
    let answer = engine.query(document_id, question).await?;
    ui::print_answer(&answer);
    Ok(())
}
