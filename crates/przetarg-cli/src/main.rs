use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use przetarg_adapters::{EzamowieniaAdapter, EZAMOWIENIA_NOTICE_URL};
use przetarg_core::Source;
use przetarg_storage::{QueryFacade, SqliteTenderStore, TenderStore};
use przetarg_sync::{run_sync_once, start_schedulers, SourceRegistry, SyncConfig};
use przetarg_web::AppState;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "przetarg")]
#[command(about = "Tender ingestion pipeline and query API")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the hourly schedulers and the HTTP API (default).
    Serve,
    /// Run one ingestion pass and exit.
    Sync {
        /// Only this source, even when it is disabled in the registry.
        #[arg(long)]
        source: Option<Source>,
    },
    /// Apply database migrations and exit.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Migrate => {
            open_store(&config).await?;
            println!("migrations applied to {}", config.database_url);
        }
        Commands::Sync { source } => {
            let store = open_store(&config).await?;
            let registry = SourceRegistry::load(&config.sources_file).await?;
            let summaries = run_sync_once(&config, &registry, store, source).await?;
            for summary in &summaries {
                println!(
                    "sync complete: run_id={} source={} fetched={} applied={} unchanged={} failed={} skipped_rows={} documents={}",
                    summary.run_id,
                    summary.source,
                    summary.fetched,
                    summary.applied,
                    summary.unchanged,
                    summary.failed,
                    summary.skipped_rows,
                    summary.documents_downloaded
                );
            }
        }
        Commands::Serve => serve(config).await?,
    }

    Ok(())
}

/// Connects and migrates; either failing is fatal for every command.
async fn open_store(config: &SyncConfig) -> Result<Arc<dyn TenderStore>> {
    let store = SqliteTenderStore::connect(&config.database_url)
        .await
        .with_context(|| format!("connecting to {}", config.database_url))?;
    store.migrate().await.context("running migrations")?;
    Ok(Arc::new(store))
}

async fn serve(config: SyncConfig) -> Result<()> {
    let store = open_store(&config).await?;
    let registry = SourceRegistry::load(&config.sources_file).await?;
    let schedulers = start_schedulers(&config, &registry, store.clone())?;
    info!(schedulers = schedulers.len(), "periodic ingestion started");

    let relay_url = registry
        .get(Source::Ezamowienia)
        .map(|source| source.url().to_string())
        .unwrap_or_else(|| EZAMOWIENIA_NOTICE_URL.to_string());
    let http = config.http_fetcher()?;
    let state = AppState::new(
        QueryFacade::new(store),
        EzamowieniaAdapter::new(&http, relay_url),
    );

    let listener = TcpListener::bind(("0.0.0.0", config.web_port))
        .await
        .with_context(|| format!("binding port {}", config.web_port))?;
    let served = przetarg_web::serve(listener, state, shutdown_signal()).await;

    info!("stopping schedulers");
    schedulers.shutdown().await;
    served
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "cannot listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
