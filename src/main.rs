//! Menu Textspot - EAST scene text detection over remote menu images
//!
//! Serves a small web page; each POST runs one batch pass that pulls menu
//! images from the catalog, detects text lines, reports them to the results
//! API and stores the artifacts per session.

mod batch;
mod config;
mod error;
mod server;
mod storage;
mod vision;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::batch::{BatchOrchestrator, Endpoints, RemoteClient};
use crate::config::AppConfig;
use crate::storage::ResultPersister;
use crate::vision::models::resolve_checkpoint;
use crate::vision::{OrtPredictorLoader, PredictorCache};

/// Menu Textspot - text detection service
#[derive(Parser, Debug)]
#[command(name = "menu-textspot")]
#[command(about = "EAST text detection over remote menu images")]
struct Args {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Checkpoint directory of the EAST model
    #[arg(long)]
    checkpoint_path: Option<PathBuf>,

    /// Directory session results are written under
    #[arg(long)]
    results_root: Option<PathBuf>,

    /// Write the effective configuration and exit
    #[arg(long)]
    write_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    let mut config = load_or_default_config(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(checkpoint_path) = args.checkpoint_path {
        config.model.checkpoint_path = checkpoint_path;
    }
    if let Some(results_root) = args.results_root {
        config.storage.results_root = results_root;
    }

    if args.write_config {
        let path = match args.config {
            Some(path) => path,
            None => storage::get_config_dir()?.join("config.toml"),
        };
        config::save_config(&config, &path)?;
        info!("Wrote configuration to {:?}", path);
        return Ok(());
    }

    info!("Menu Textspot starting...");

    let checkpoint = config.model.checkpoint_path.clone();
    let model_path = resolve_checkpoint(&checkpoint)
        .with_context(|| format!("Checkpoint `{}` not found", checkpoint.display()))?;
    info!("Checkpoint {:?} -> {:?}", checkpoint, model_path);

    let loader = OrtPredictorLoader::from_config(&config.model);
    let cache = Arc::new(PredictorCache::new(config.model.cache_capacity, loader));
    info!("Predictor cache capacity: {}", cache.capacity());

    if config.model.preload {
        let preload_cache = cache.clone();
        let preload_path = checkpoint.clone();
        tokio::task::spawn_blocking(move || preload_cache.get(&preload_path))
            .await?
            .context("Failed to preload model")?;
    }

    let persister = Arc::new(ResultPersister::new(&config.storage.results_root)?);
    let remote = RemoteClient::new(&config.remote, config.retry.clone())?;
    let orchestrator = Arc::new(BatchOrchestrator::new(
        remote,
        cache.clone(),
        persister,
        checkpoint,
        config.remote.manifest_path.clone(),
    ));

    let shutdown = CancellationToken::new();
    let state = server::AppState::new(
        orchestrator,
        Endpoints::from(&config.remote),
        shutdown.clone(),
    );

    let addr = config.server.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        shutdown.cancel();
    });

    let served = server::serve(listener, state).await;

    cache.clear();
    info!("Menu Textspot shutdown complete");

    served
}

/// Load configuration from the given file, the config directory, or defaults
fn load_or_default_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        let config = config::load_config(path)?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }

    if let Ok(config_dir) = storage::get_config_dir() {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            let config = config::load_config(&config_path)?;
            info!("Loaded configuration from {:?}", config_path);
            return Ok(config);
        }
    }

    info!("Using default configuration");
    Ok(AppConfig::default())
}
