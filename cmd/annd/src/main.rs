//! annd - logo nearest-neighbor index daemon.

mod config;
mod server;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use logosearch_embed::{HttpEmbedder, LogoEmbedder};
use logosearch_index::{IndexManager, IndexSnapshot, RegenerationJob, Resolver};
use logosearch_store::{EmbeddingStore, RedbBackend};

use crate::config::Config;
use crate::server::AppState;

/// Logo nearest-neighbor index daemon.
#[derive(Parser, Debug)]
#[command(name = "annd")]
#[command(about = "Logo nearest-neighbor index daemon")]
struct Args {
    /// Config file path (YAML)
    #[arg(short, long)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server
    Serve,
    /// Rebuild the index once and exit
    GenerateIndex,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    std::fs::create_dir_all(&cfg.data_dir)?;
    let backend = RedbBackend::open(&cfg.db_path())?;
    let store = Arc::new(EmbeddingStore::new(Box::new(backend)));

    let manager = Arc::new(IndexManager::new());
    let index_dir = cfg.index_dir();
    match IndexSnapshot::load_from_dir(&index_dir) {
        Ok(snapshot) if snapshot.meta().model_version == cfg.model_version => {
            info!(
                model_version = %snapshot.meta().model_version,
                record_count = snapshot.len(),
                "loaded persisted index"
            );
            manager.swap(snapshot);
        }
        Ok(snapshot) => {
            warn!(
                found = %snapshot.meta().model_version,
                expected = %cfg.model_version,
                "persisted index is for another model version; ignoring"
            );
        }
        Err(e) => {
            // Fresh deployments have no index yet; queries answer 503
            // until the first build.
            warn!(error = %e, "no usable persisted index");
        }
    }

    let job = Arc::new(RegenerationJob::new(
        store.clone(),
        manager.clone(),
        index_dir,
    ));

    match args.command {
        Command::GenerateIndex => {
            let meta = job.run(&cfg.model_version, cfg.metric, cfg.build_params())?;
            info!(
                model_version = %meta.model_version,
                record_count = meta.record_count,
                "index generated"
            );
            Ok(())
        }
        Command::Serve => {
            let embedder = cfg
                .embedder
                .clone()
                .map(|ec| Arc::new(HttpEmbedder::new(ec)) as Arc<dyn LogoEmbedder>);
            let resolver = Arc::new(Resolver::new(
                store,
                manager,
                embedder,
                &cfg.model_version,
            ));

            if let Some(secs) = cfg.rebuild_interval_secs {
                spawn_rebuild_loop(job.clone(), &cfg, secs);
            }

            let state = AppState {
                resolver,
                job,
                metric: cfg.metric,
                params: cfg.build_params(),
            };
            server::serve(&cfg.listen, state).await
        }
    }
}

/// Periodically rebuild the index in the background. A failed run is
/// logged and retried at the next tick.
fn spawn_rebuild_loop(job: Arc<RegenerationJob>, cfg: &Config, secs: u64) {
    let model_version = cfg.model_version.clone();
    let metric = cfg.metric;
    let params = cfg.build_params();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so startup is not
        // spent building when a persisted index was just loaded.
        interval.tick().await;

        loop {
            interval.tick().await;
            let job = job.clone();
            let model_version = model_version.clone();
            let outcome =
                tokio::task::spawn_blocking(move || job.run(&model_version, metric, params)).await;
            match outcome {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(error = %e, "scheduled rebuild failed"),
                Err(e) => warn!(error = %e, "scheduled rebuild panicked"),
            }
        }
    });
}
