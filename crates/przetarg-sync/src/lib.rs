//! Ingestion orchestration: source registry, sync pipelines and hourly schedulers.

use std::sync::Arc;

use anyhow::{Context, Result};
use przetarg_core::Source;
use przetarg_storage::TenderStore;
use tracing::{info, warn};

mod config;
mod pipeline;
mod scheduler;

pub use config::{
    SourceConfig, SourceKind, SourceRegistry, SyncConfig, DEFAULT_DATABASE_URL,
    DEFAULT_USER_AGENT,
};
pub use pipeline::{SyncPipeline, SyncRunSummary};
pub use scheduler::{
    Clock, HourlySchedule, LocalClock, Scheduler, SchedulerHandle, SchedulerState,
};

pub const CRATE_NAME: &str = "przetarg-sync";

/// One pass over every enabled source, or over `only` when given, whether
/// enabled or not. A failing source is logged and does not stop the others.
pub async fn run_sync_once(
    config: &SyncConfig,
    registry: &SourceRegistry,
    store: Arc<dyn TenderStore>,
    only: Option<Source>,
) -> Result<Vec<SyncRunSummary>> {
    let http = config.http_fetcher()?;
    let selected: Vec<SourceConfig> = match only {
        Some(source) => vec![registry
            .get(source)
            .cloned()
            .unwrap_or_else(|| SourceConfig::new(source))],
        None => registry.enabled().cloned().collect(),
    };

    let mut summaries = Vec::with_capacity(selected.len());
    for source in &selected {
        let pipeline = SyncPipeline::from_config(config, source, &http, store.clone());
        match pipeline.run_once().await {
            Ok(summary) => summaries.push(summary),
            Err(err) if only.is_some() => return Err(err),
            Err(err) => {
                warn!(source = %source.source_id, error = %format!("{err:#}"), "sync failed");
            }
        }
    }
    Ok(summaries)
}

/// Spawns one scheduler per enabled source. With scheduling disabled the
/// returned handle owns no tasks.
pub fn start_schedulers(
    config: &SyncConfig,
    registry: &SourceRegistry,
    store: Arc<dyn TenderStore>,
) -> Result<SchedulerHandle> {
    let mut handle = SchedulerHandle::new();
    if !config.scheduler_enabled {
        info!("periodic ingestion disabled");
        return Ok(handle);
    }

    let http = config.http_fetcher()?;
    for source in registry.enabled() {
        let schedule = HourlySchedule::new(source.schedule_minute)
            .with_context(|| format!("schedule for {}", source.source_id))?;
        let scheduler = Scheduler::new(source.source_id.as_str(), schedule);
        let pipeline = Arc::new(SyncPipeline::from_config(config, source, &http, store.clone()));
        let shutdown = handle.subscribe();
        handle.spawn(async move {
            scheduler
                .run(
                    move || {
                        let pipeline = pipeline.clone();
                        async move { pipeline.run_once().await.map(|_| ()) }
                    },
                    shutdown,
                )
                .await;
        });
        info!(source = %source.source_id, minute = source.schedule_minute, "scheduler spawned");
    }
    Ok(handle)
}
