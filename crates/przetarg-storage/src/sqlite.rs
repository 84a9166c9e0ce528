//! SQLite-backed [`TenderStore`] built on sqlx.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use przetarg_core::{NewAttachment, Source, Tender, TenderAttachment};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, Row};
use tracing::info;

use crate::store::{
    validate_attachment, validate_for_upsert, StoreError, TenderPage, TenderQuery, TenderStore,
};

const TENDER_COLUMNS: &str = "id, source, source_id, title, description, \
    organization_name, organization_contact, organization_email, organization_phone, \
    cpv_code, publication_date, submission_deadline, link, additional_info, \
    content_hash, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct SqliteTenderStore {
    pool: SqlitePool,
}

impl SqliteTenderStore {
    /// Opens (creating if needed) the database at `database_url`.
    ///
    /// Schema setup is separate; call [`SqliteTenderStore::migrate`] before use.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Private in-memory database on a single pinned connection.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("tender schema is up to date");
        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct TenderRow {
    id: i64,
    source: String,
    source_id: String,
    title: String,
    description: String,
    organization_name: String,
    organization_contact: String,
    organization_email: String,
    organization_phone: String,
    cpv_code: String,
    publication_date: Option<DateTime<Utc>>,
    submission_deadline: Option<DateTime<Utc>>,
    link: String,
    additional_info: String,
    content_hash: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TenderRow> for Tender {
    type Error = StoreError;

    fn try_from(row: TenderRow) -> Result<Self, Self::Error> {
        let source = Source::from_str(&row.source)
            .map_err(|e| StoreError::Corrupt(format!("tender {}: {e}", row.id)))?;
        Ok(Tender {
            id: Some(row.id),
            source,
            source_id: row.source_id,
            title: row.title,
            description: row.description,
            organization_name: row.organization_name,
            organization_contact: row.organization_contact,
            organization_email: row.organization_email,
            organization_phone: row.organization_phone,
            cpv_code: row.cpv_code,
            publication_date: row.publication_date,
            submission_deadline: row.submission_deadline,
            link: row.link,
            additional_info: row.additional_info,
            content_hash: row.content_hash,
            created_at: Some(row.created_at),
            updated_at: Some(row.updated_at),
        })
    }
}

#[derive(Debug, FromRow)]
struct AttachmentRow {
    id: i64,
    source: String,
    tender_source_id: String,
    title: String,
    link: String,
    file_path: String,
    byte_size: i64,
    content_hash: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<AttachmentRow> for TenderAttachment {
    type Error = StoreError;

    fn try_from(row: AttachmentRow) -> Result<Self, Self::Error> {
        let source = Source::from_str(&row.source)
            .map_err(|e| StoreError::Corrupt(format!("attachment {}: {e}", row.id)))?;
        Ok(TenderAttachment {
            id: row.id,
            source,
            tender_source_id: row.tender_source_id,
            title: row.title,
            link: row.link,
            file_path: row.file_path,
            byte_size: row.byte_size,
            content_hash: row.content_hash,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl TenderStore for SqliteTenderStore {
    async fn upsert(&self, tender: &Tender) -> Result<bool, StoreError> {
        validate_for_upsert(tender)?;
        let content_hash = tender.compute_hash();
        let now = Utc::now();

        // One statement per key keeps the check-and-write atomic; the WHERE
        // clause turns a hash match into zero affected rows.
        let result = sqlx::query(
            r#"
            INSERT INTO tenders (
                source, source_id, title, description,
                organization_name, organization_contact, organization_email, organization_phone,
                cpv_code, publication_date, submission_deadline, link, additional_info,
                content_hash, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source, source_id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                organization_name = excluded.organization_name,
                organization_contact = excluded.organization_contact,
                organization_email = excluded.organization_email,
                organization_phone = excluded.organization_phone,
                cpv_code = excluded.cpv_code,
                publication_date = excluded.publication_date,
                submission_deadline = excluded.submission_deadline,
                link = excluded.link,
                additional_info = excluded.additional_info,
                content_hash = excluded.content_hash,
                updated_at = excluded.updated_at
            WHERE tenders.content_hash != excluded.content_hash
            "#,
        )
        .bind(tender.source.as_str())
        .bind(&tender.source_id)
        .bind(&tender.title)
        .bind(&tender.description)
        .bind(&tender.organization_name)
        .bind(&tender.organization_contact)
        .bind(&tender.organization_email)
        .bind(&tender.organization_phone)
        .bind(&tender.cpv_code)
        .bind(tender.publication_date)
        .bind(tender.submission_deadline)
        .bind(&tender.link)
        .bind(&tender.additional_info)
        .bind(&content_hash)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn description_by_id(&self, id: i64) -> Result<String, StoreError> {
        let row = sqlx::query("SELECT description FROM tenders WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        Ok(row.try_get("description")?)
    }

    async fn tender_by_id(&self, id: i64) -> Result<Tender, StoreError> {
        let row: TenderRow =
            sqlx::query_as(&format!("SELECT {TENDER_COLUMNS} FROM tenders WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(StoreError::NotFound)?;
        row.try_into()
    }

    async fn list_tenders(&self, query: &TenderQuery) -> Result<TenderPage, StoreError> {
        let source = query.source.map(|s| s.as_str());
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM tenders WHERE (? IS NULL OR source = ?)")
                .bind(source)
                .bind(source)
                .fetch_one(&self.pool)
                .await?;

        let rows: Vec<TenderRow> = sqlx::query_as(&format!(
            "SELECT {TENDER_COLUMNS} FROM tenders \
             WHERE (? IS NULL OR source = ?) \
             ORDER BY updated_at DESC, id DESC \
             LIMIT ? OFFSET ?"
        ))
        .bind(source)
        .bind(source)
        .bind(query.per_page() as i64)
        .bind(query.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .into_iter()
            .map(Tender::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TenderPage {
            items,
            page: query.page(),
            per_page: query.per_page(),
            total: total.max(0) as u64,
        })
    }

    /// Rows are insert-once: `byte_size` and `content_hash` describe the first
    /// download of a link, even when a later run rewrites the file on disk.
    async fn record_attachment(&self, attachment: &NewAttachment) -> Result<bool, StoreError> {
        validate_attachment(attachment)?;
        let result = sqlx::query(
            r#"
            INSERT INTO tender_attachments (
                source, tender_source_id, title, link, file_path, byte_size, content_hash, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source, tender_source_id, link) DO NOTHING
            "#,
        )
        .bind(attachment.source.as_str())
        .bind(&attachment.tender_source_id)
        .bind(&attachment.title)
        .bind(&attachment.link)
        .bind(&attachment.file_path)
        .bind(attachment.byte_size)
        .bind(&attachment.content_hash)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn attachments_for(
        &self,
        source: Source,
        tender_source_id: &str,
    ) -> Result<Vec<TenderAttachment>, StoreError> {
        let rows: Vec<AttachmentRow> = sqlx::query_as(
            r#"
            SELECT id, source, tender_source_id, title, link, file_path, byte_size, content_hash, created_at
              FROM tender_attachments
             WHERE source = ? AND tender_source_id = ?
             ORDER BY id
            "#,
        )
        .bind(source.as_str())
        .bind(tender_source_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TenderAttachment::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tender(source_id: &str) -> Tender {
        let mut t = Tender::new(Source::PlatformaZakupowa, source_id);
        t.title = "Delivery of widgets".into();
        t.description = "<p>Spec text</p>".into();
        t.organization_name = "ACME".into();
        t.publication_date = Utc.with_ymd_and_hms(2026, 1, 13, 15, 26, 0).single();
        t
    }

    fn attachment(link: &str) -> NewAttachment {
        NewAttachment {
            source: Source::PlatformaZakupowa,
            tender_source_id: "99".into(),
            title: "spec.pdf".into(),
            link: link.into(),
            file_path: "99/spec.pdf".into(),
            byte_size: 3,
            content_hash: przetarg_core::sha256_hex(b"pdf"),
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_leaves_the_row_untouched() {
        let store = SqliteTenderStore::in_memory().await.unwrap();
        let record = tender("99");

        assert!(store.upsert(&record).await.unwrap());
        let before = store.tender_by_id(1).await.unwrap();
        assert!(!store.upsert(&record).await.unwrap());
        let after = store.tender_by_id(1).await.unwrap();

        assert_eq!(before, after);
        assert_eq!(after.content_hash, record.compute_hash());
        assert_eq!(after.publication_date, record.publication_date);
        assert_eq!(after.submission_deadline, None);
    }

    #[tokio::test]
    async fn content_change_updates_in_place() {
        let store = SqliteTenderStore::in_memory().await.unwrap();
        let mut record = tender("99");
        assert!(store.upsert(&record).await.unwrap());
        let original = store.tender_by_id(1).await.unwrap();

        record.title = "Delivery of gadgets".into();
        assert!(store.upsert(&record).await.unwrap());

        let page = store.list_tenders(&TenderQuery::default()).await.unwrap();
        assert_eq!(page.total, 1);
        let updated = &page.items[0];
        assert_eq!(updated.id, Some(1));
        assert_eq!(updated.title, "Delivery of gadgets");
        assert_eq!(updated.created_at, original.created_at);
        assert!(updated.updated_at >= original.updated_at);
        assert_ne!(updated.content_hash, original.content_hash);
    }

    #[tokio::test]
    async fn supplied_hash_is_ignored_in_favour_of_a_fresh_one() {
        let store = SqliteTenderStore::in_memory().await.unwrap();
        let mut record = tender("5");
        record.content_hash = "bogus".into();
        store.upsert(&record).await.unwrap();
        let row = store.tender_by_id(1).await.unwrap();
        assert_eq!(row.content_hash, record.compute_hash());
    }

    #[tokio::test]
    async fn same_source_id_in_another_source_is_a_separate_row() {
        let store = SqliteTenderStore::in_memory().await.unwrap();
        let mut other = tender("99");
        other.source = Source::Ezamowienia;
        assert!(store.upsert(&tender("99")).await.unwrap());
        assert!(store.upsert(&other).await.unwrap());

        let only_json = store
            .list_tenders(&TenderQuery {
                source: Some(Source::Ezamowienia),
                ..TenderQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(only_json.total, 1);
        assert_eq!(only_json.items[0].source, Source::Ezamowienia);
    }

    #[tokio::test]
    async fn invalid_records_and_missing_ids_are_reported() {
        let store = SqliteTenderStore::in_memory().await.unwrap();
        assert!(matches!(
            store.upsert(&tender("")).await,
            Err(StoreError::InvalidRecord(_))
        ));
        assert!(matches!(
            store.description_by_id(404).await,
            Err(StoreError::NotFound)
        ));

        store.upsert(&tender("99")).await.unwrap();
        assert_eq!(store.description_by_id(1).await.unwrap(), "<p>Spec text</p>");
    }

    #[tokio::test]
    async fn listing_pages_through_results() {
        let store = SqliteTenderStore::in_memory().await.unwrap();
        for n in 0..5 {
            store.upsert(&tender(&n.to_string())).await.unwrap();
        }
        let page = store
            .list_tenders(&TenderQuery {
                source: None,
                page: Some(2),
                per_page: Some(2),
            })
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.page, 2);
    }

    #[tokio::test]
    async fn attachments_are_recorded_once_per_link() {
        let store = SqliteTenderStore::in_memory().await.unwrap();
        assert!(store.record_attachment(&attachment("https://cdn/a.pdf")).await.unwrap());
        assert!(!store.record_attachment(&attachment("https://cdn/a.pdf")).await.unwrap());
        assert!(store.record_attachment(&attachment("https://cdn/b.pdf")).await.unwrap());

        let listed = store
            .attachments_for(Source::PlatformaZakupowa, "99")
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].link, "https://cdn/a.pdf");
        assert!(store
            .attachments_for(Source::Ezamowienia, "99")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_same_key_upserts_leave_one_row() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("tenders.db").display());
        let store = SqliteTenderStore::connect(&url).await.unwrap();
        store.migrate().await.unwrap();

        let mut tasks = Vec::new();
        for n in 0..32 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let mut record = tender("99");
                record.title = format!("Delivery of widgets, lot {n}");
                store.upsert(&record).await
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }

        let page = store.list_tenders(&TenderQuery::default()).await.unwrap();
        assert_eq!(page.total, 1);
        let survivor = &page.items[0];
        assert_eq!(survivor.source_id, "99");
        assert!(survivor.title.starts_with("Delivery of widgets, lot "));
        assert_eq!(survivor.content_hash, survivor.compute_hash());
    }
}
