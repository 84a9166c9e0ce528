use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, Utc};
use przetarg_adapters::{
    DocumentDiscovery, EzamowieniaAdapter, PlatformaZakupowaAdapter, SourceAdapter,
};
use przetarg_core::Source;
use przetarg_storage::{DownloadStore, HttpFetcher, TenderStore};
use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{SourceConfig, SourceKind, SyncConfig};

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub source: Source,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fetched: usize,
    pub applied: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub skipped_rows: usize,
    pub documents_downloaded: usize,
    pub documents_failed: usize,
    pub snapshot_path: Option<String>,
}

/// Fetch → normalize → upsert for one source, with optional per-record document discovery.
pub struct SyncPipeline {
    store: Arc<dyn TenderStore>,
    adapter: SourceAdapter,
    discovery: Option<DocumentDiscovery>,
}

impl SyncPipeline {
    pub fn new(store: Arc<dyn TenderStore>, adapter: SourceAdapter) -> Self {
        Self {
            store,
            adapter,
            discovery: None,
        }
    }

    pub fn with_discovery(mut self, discovery: DocumentDiscovery) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Wires the adapter a registry entry asks for. CSV sources also get
    /// attachment discovery rooted at the entry's detail page base.
    pub fn from_config(
        config: &SyncConfig,
        source: &SourceConfig,
        http: &HttpFetcher,
        store: Arc<dyn TenderStore>,
    ) -> Self {
        let downloads = DownloadStore::new(config.download_dir.clone());
        match source.kind {
            SourceKind::CsvExport => {
                let adapter = PlatformaZakupowaAdapter::new(http.clone(), downloads.clone(), source.url());
                let discovery = DocumentDiscovery::new(
                    http.clone(),
                    downloads,
                    store.clone(),
                    source.detail_base_url(),
                );
                Self::new(store, SourceAdapter::CsvExport(adapter)).with_discovery(discovery)
            }
            SourceKind::JsonApi => Self::new(
                store,
                SourceAdapter::JsonApi {
                    adapter: EzamowieniaAdapter::new(http, source.url()),
                    lookback_days: source.lookback_days,
                },
            ),
        }
    }

    pub fn source(&self) -> Source {
        self.adapter.source()
    }

    pub async fn run_once(&self) -> Result<SyncRunSummary> {
        self.run_for_date(Local::now().date_naive()).await
    }

    /// One ingestion pass. A failed fetch aborts the run; record, row and
    /// document failures are logged and counted.
    pub async fn run_for_date(&self, today: NaiveDate) -> Result<SyncRunSummary> {
        let run_id = Uuid::new_v4();
        let source = self.source();
        let span = info_span!("sync_run", %run_id, %source);
        async move {
            let started_at = Utc::now();
            info!("sync run started");
            let batch = self
                .adapter
                .fetch_batch(today)
                .await
                .with_context(|| format!("fetching {source}"))?;

            let mut summary = SyncRunSummary {
                run_id,
                source,
                started_at,
                finished_at: started_at,
                fetched: batch.records.len(),
                applied: 0,
                unchanged: 0,
                failed: 0,
                skipped_rows: batch.row_errors.len(),
                documents_downloaded: 0,
                documents_failed: 0,
                snapshot_path: batch
                    .snapshot_path
                    .as_ref()
                    .map(|p| p.display().to_string()),
            };

            for tender in &batch.records {
                match self.store.upsert(tender).await {
                    Ok(true) => {
                        summary.applied += 1;
                        debug!(source_id = %tender.source_id, "tender saved");
                    }
                    Ok(false) => {
                        summary.unchanged += 1;
                        debug!(source_id = %tender.source_id, "tender unchanged");
                    }
                    Err(err) => {
                        summary.failed += 1;
                        warn!(source_id = %tender.source_id, error = %err, "failed to save tender");
                    }
                }

                // Runs regardless of the upsert outcome.
                if let Some(discovery) = &self.discovery {
                    match discovery.discover(&tender.source_id).await {
                        Ok(report) => {
                            summary.documents_downloaded += report.downloaded;
                            summary.documents_failed += report.failed;
                        }
                        Err(err) => {
                            warn!(source_id = %tender.source_id, error = %err, "document discovery failed");
                        }
                    }
                }
            }

            summary.finished_at = Utc::now();
            info!(
                fetched = summary.fetched,
                applied = summary.applied,
                unchanged = summary.unchanged,
                failed = summary.failed,
                skipped_rows = summary.skipped_rows,
                documents_downloaded = summary.documents_downloaded,
                "sync run finished"
            );
            Ok(summary)
        }
        .instrument(span)
        .await
    }
}
