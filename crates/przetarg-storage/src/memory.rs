//! In-process [`TenderStore`] used by tests and ephemeral runs.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use przetarg_core::{NewAttachment, Source, Tender, TenderAttachment};
use tokio::sync::Mutex;

use crate::store::{
    validate_attachment, validate_for_upsert, StoreError, TenderPage, TenderQuery, TenderStore,
};

#[derive(Debug, Default)]
pub struct MemoryTenderStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    last_id: i64,
    tenders: BTreeMap<i64, Tender>,
    keys: HashMap<(Source, String), i64>,
    last_attachment_id: i64,
    attachments: Vec<TenderAttachment>,
}

impl MemoryTenderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.tenders.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn find(&self, source: Source, source_id: &str) -> Option<Tender> {
        let state = self.state.lock().await;
        state
            .keys
            .get(&(source, source_id.to_string()))
            .and_then(|id| state.tenders.get(id))
            .cloned()
    }
}

#[async_trait]
impl TenderStore for MemoryTenderStore {
    async fn upsert(&self, tender: &Tender) -> Result<bool, StoreError> {
        validate_for_upsert(tender)?;
        let content_hash = tender.compute_hash();
        let now = Utc::now();

        let mut state = self.state.lock().await;
        let key = (tender.source, tender.source_id.clone());
        if let Some(id) = state.keys.get(&key).copied() {
            let Some(stored) = state.tenders.get_mut(&id) else {
                return Err(StoreError::Corrupt(format!("key index points at missing row {id}")));
            };
            if stored.content_hash == content_hash {
                return Ok(false);
            }
            let created_at = stored.created_at;
            *stored = Tender {
                id: Some(id),
                content_hash,
                created_at,
                updated_at: Some(now),
                ..tender.clone()
            };
            return Ok(true);
        }

        state.last_id += 1;
        let id = state.last_id;
        state.keys.insert(key, id);
        state.tenders.insert(
            id,
            Tender {
                id: Some(id),
                content_hash,
                created_at: Some(now),
                updated_at: Some(now),
                ..tender.clone()
            },
        );
        Ok(true)
    }

    async fn description_by_id(&self, id: i64) -> Result<String, StoreError> {
        self.tender_by_id(id).await.map(|t| t.description)
    }

    async fn tender_by_id(&self, id: i64) -> Result<Tender, StoreError> {
        self.state
            .lock()
            .await
            .tenders
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list_tenders(&self, query: &TenderQuery) -> Result<TenderPage, StoreError> {
        let state = self.state.lock().await;
        let mut matching = state
            .tenders
            .values()
            .filter(|t| query.source.map_or(true, |s| t.source == s))
            .cloned()
            .collect::<Vec<_>>();
        matching.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(query.offset())
            .take(query.per_page())
            .collect();
        Ok(TenderPage {
            items,
            page: query.page(),
            per_page: query.per_page(),
            total,
        })
    }

    async fn record_attachment(&self, attachment: &NewAttachment) -> Result<bool, StoreError> {
        validate_attachment(attachment)?;
        let mut state = self.state.lock().await;
        let known = state.attachments.iter().any(|a| {
            a.source == attachment.source
                && a.tender_source_id == attachment.tender_source_id
                && a.link == attachment.link
        });
        if known {
            return Ok(false);
        }
        state.last_attachment_id += 1;
        let id = state.last_attachment_id;
        state.attachments.push(TenderAttachment {
            id,
            source: attachment.source,
            tender_source_id: attachment.tender_source_id.clone(),
            title: attachment.title.clone(),
            link: attachment.link.clone(),
            file_path: attachment.file_path.clone(),
            byte_size: attachment.byte_size,
            content_hash: attachment.content_hash.clone(),
            created_at: Utc::now(),
        });
        Ok(true)
    }

    async fn attachments_for(
        &self,
        source: Source,
        tender_source_id: &str,
    ) -> Result<Vec<TenderAttachment>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .attachments
            .iter()
            .filter(|a| a.source == source && a.tender_source_id == tender_source_id)
            .cloned()
            .collect())
    }
}
