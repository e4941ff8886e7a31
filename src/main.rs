//! knowledge-observatory CLI entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use knowledge_observatory::{
    cancel::CancellationToken,
    config::Config,
    embed::{Embedder, OllamaEmbedder},
    http::{self, AppState},
    jobs::spawn_workers,
    meta::{self, MetadataStore},
    store::{InMemoryVectorStore, QdrantStore, VectorStore},
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "knowledge-observatory")]
#[command(version, about = "Semantic knowledge service with collection health metrics", long_about = None)]
struct Cli {
    /// Path to a TOML tuning file
    #[arg(short, long, global = true, env = "KO_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API and the ingest worker pool (default)
    Serve,

    /// Run only the ingest worker pool
    Worker,

    /// Create the metadata tables and exit
    InitDb,

    /// Print the collection quality report as JSON
    Quality {
        /// Restrict the report to one collection
        #[arg(long)]
        collection: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let json_logs = cli.log_json
        || std::env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
    init_logging(cli.verbose, json_logs);

    let config = Config::from_env(cli.config.as_deref()).context("invalid configuration")?;
    let root = CancellationToken::new();
    spawn_signal_handler(root.clone());

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::InitDb => {
            let meta = open_metadata(&config, &root).await?;
            drop(meta);
            info!("Metadata schema ready");
        }

        Commands::Serve => {
            let state = build_state(&config, &root).await?;
            serve(&config, state, root).await?;
        }

        Commands::Worker => {
            let state = build_state(&config, &root).await?;
            let workers = spawn_workers(&state.jobs, &config.tuning.worker, &root);
            info!(count = workers.len(), "Worker pool running");
            futures::future::join_all(workers).await;
        }

        Commands::Quality { collection } => {
            let state = build_state(&config, &root).await?;
            let report = state
                .quality
                .report(&root, collection.as_deref())
                .await
                .context("quality report failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

/// Cancel `root` on Ctrl-C or SIGTERM
fn spawn_signal_handler(root: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    warn!("Failed to listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }

        info!("Shutdown requested");
        root.cancel();
    });
}

async fn open_metadata(config: &Config, root: &CancellationToken) -> Result<Arc<dyn MetadataStore>> {
    let meta = meta::connect(config)
        .await
        .context("failed to open metadata store")?;
    meta.init_schema()
        .await
        .context("failed to create metadata schema")?;
    meta.ping(root).await.context("database is unreachable")?;
    Ok(meta)
}

fn open_vectors(config: &Config) -> Result<Arc<dyn VectorStore>> {
    if config.qdrant_url.eq_ignore_ascii_case("memory") {
        warn!("Using the in-memory vector store; points are lost on exit");
        return Ok(Arc::new(InMemoryVectorStore::new()));
    }
    let store = QdrantStore::from_config(config).context("invalid vector store settings")?;
    Ok(Arc::new(store))
}

async fn build_state(config: &Config, root: &CancellationToken) -> Result<AppState> {
    let meta = open_metadata(config, root).await?;
    let vectors = open_vectors(config)?;
    let embedder: Arc<dyn Embedder> =
        Arc::new(OllamaEmbedder::from_config(config).context("invalid embedder settings")?);
    info!(model = embedder.model_name(), "Embedder ready");

    Ok(AppState::build(config, embedder, vectors, meta, root.clone()))
}

async fn serve(config: &Config, state: AppState, root: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", config.api_port))
        .await
        .with_context(|| format!("failed to bind port {}", config.api_port))?;

    let workers = spawn_workers(&state.jobs, &config.tuning.worker, &root);
    let app = http::router(state, config.tuning.timeouts.handler());

    let served = http::serve(listener, app, root.clone()).await;

    // Stop the workers whether the server drained or failed.
    root.cancel();
    futures::future::join_all(workers).await;
    served.context("HTTP server failed")?;

    info!("Shutdown complete");
    Ok(())
}

