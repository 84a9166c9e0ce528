//! Change-aware tender store contract and the read-only query facade.

use std::sync::Arc;

use async_trait::async_trait;
use przetarg_core::{NewAttachment, Source, Tender, TenderAttachment};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    #[error("not found")]
    NotFound,
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Persistence contract for normalized tenders.
///
/// `upsert` is keyed on `(source, source_id)` and decides on the content
/// hash alone: a new key is inserted, a changed hash rewrites the content
/// and `updated_at`, and an equal hash writes nothing. Implementations must
/// make each call atomic for its key.
#[async_trait]
pub trait TenderStore: Send + Sync {
    /// Returns `true` when a row was inserted or updated.
    async fn upsert(&self, tender: &Tender) -> Result<bool, StoreError>;

    async fn description_by_id(&self, id: i64) -> Result<String, StoreError>;

    async fn tender_by_id(&self, id: i64) -> Result<Tender, StoreError>;

    async fn list_tenders(&self, query: &TenderQuery) -> Result<TenderPage, StoreError>;

    /// Returns `true` when the attachment was not known before.
    async fn record_attachment(&self, attachment: &NewAttachment) -> Result<bool, StoreError>;

    async fn attachments_for(
        &self,
        source: Source,
        tender_source_id: &str,
    ) -> Result<Vec<TenderAttachment>, StoreError>;
}

pub(crate) fn validate_for_upsert(tender: &Tender) -> Result<(), StoreError> {
    if tender.source_id.trim().is_empty() {
        return Err(StoreError::InvalidRecord(format!(
            "{} record without source_id",
            tender.source
        )));
    }
    Ok(())
}

pub(crate) fn validate_attachment(attachment: &NewAttachment) -> Result<(), StoreError> {
    if attachment.tender_source_id.trim().is_empty() || attachment.link.trim().is_empty() {
        return Err(StoreError::InvalidRecord(
            "attachment needs a tender id and a link".to_string(),
        ));
    }
    Ok(())
}

pub const DEFAULT_PER_PAGE: usize = 20;
pub const MAX_PER_PAGE: usize = 200;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenderQuery {
    pub source: Option<Source>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

impl TenderQuery {
    pub fn page(&self) -> usize {
        self.page.unwrap_or(1).max(1)
    }

    pub fn per_page(&self) -> usize {
        self.per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE)
    }

    pub fn offset(&self) -> usize {
        (self.page() - 1).saturating_mul(self.per_page())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TenderPage {
    pub items: Vec<Tender>,
    pub page: usize,
    pub per_page: usize,
    pub total: u64,
}

/// Read-only view over a [`TenderStore`] for the HTTP boundary.
#[derive(Clone)]
pub struct QueryFacade {
    store: Arc<dyn TenderStore>,
}

impl QueryFacade {
    pub fn new(store: Arc<dyn TenderStore>) -> Self {
        Self { store }
    }

    pub async fn description_by_id(&self, id: i64) -> Result<String, StoreError> {
        self.store.description_by_id(id).await
    }

    pub async fn tender_by_id(&self, id: i64) -> Result<Tender, StoreError> {
        self.store.tender_by_id(id).await
    }

    pub async fn list_tenders(&self, query: &TenderQuery) -> Result<TenderPage, StoreError> {
        self.store.list_tenders(query).await
    }

    /// Attachments of the tender with surrogate `id`; `NotFound` when the tender is unknown.
    pub async fn attachments_for_tender(&self, id: i64) -> Result<Vec<TenderAttachment>, StoreError> {
        let tender = self.store.tender_by_id(id).await?;
        self.store
            .attachments_for(tender.source, &tender.source_id)
            .await
    }
}
