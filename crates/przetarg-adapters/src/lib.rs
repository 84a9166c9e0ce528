//! Upstream source adapters and per-tender document discovery.

use std::path::PathBuf;

use chrono::NaiveDate;
use przetarg_core::{Source, Tender};
use przetarg_storage::FetchError;
use thiserror::Error;

mod discovery;
mod ezamowienia;
mod platformazakupowa;

pub use discovery::{extract_attachment_links, AttachmentLink, DiscoveryReport, DocumentDiscovery};
pub use ezamowienia::{
    normalize_notice, parse_flexible_datetime, EzamowieniaAdapter, EzamowieniaNotice,
    EZAMOWIENIA_NOTICE_URL, NOTICE_TYPE, PAGE_SIZE,
};
pub use platformazakupowa::{
    parse_export, PlatformaZakupowaAdapter, EXPORT_COLUMNS, EXPORT_DATE_FORMAT,
    PLATFORMAZAKUPOWA_BASE_URL, PLATFORMAZAKUPOWA_EXPORT_URL,
};

pub const CRATE_NAME: &str = "przetarg-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("decoding upstream json: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("date_from {from} is after date_to {to}")]
    InvalidDateRange { from: NaiveDate, to: NaiveDate },
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// A single upstream row or item that could not be turned into a tender.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("row {row}: {reason}")]
pub struct RowError {
    pub row: usize,
    pub reason: String,
}

/// Outcome of one adapter fetch: normalized records plus the items that were skipped.
#[derive(Debug, Clone, Default)]
pub struct SourceBatch {
    pub records: Vec<Tender>,
    pub row_errors: Vec<RowError>,
    pub snapshot_path: Option<PathBuf>,
}

/// Closed set of upstream adapters selectable from configuration.
#[derive(Debug, Clone)]
pub enum SourceAdapter {
    CsvExport(PlatformaZakupowaAdapter),
    JsonApi {
        adapter: EzamowieniaAdapter,
        lookback_days: u32,
    },
}

impl SourceAdapter {
    pub fn source(&self) -> Source {
        match self {
            SourceAdapter::CsvExport(_) => Source::PlatformaZakupowa,
            SourceAdapter::JsonApi { .. } => Source::Ezamowienia,
        }
    }

    /// Fetches and normalizes everything the source currently publishes.
    ///
    /// `today` anchors the publication window of date-ranged sources.
    pub async fn fetch_batch(&self, today: NaiveDate) -> Result<SourceBatch, AdapterError> {
        match self {
            SourceAdapter::CsvExport(adapter) => adapter.fetch_and_normalize().await,
            SourceAdapter::JsonApi {
                adapter,
                lookback_days,
            } => {
                let from = today - chrono::Days::new(u64::from(*lookback_days));
                adapter.fetch_normalized(from, today).await
            }
        }
    }
}

/// Adapter-side cleanup applied before hashing: trims and folds CRLF to LF.
pub fn normalize_text(value: &str) -> String {
    value.trim().replace("\r\n", "\n")
}
