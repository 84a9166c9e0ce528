//! Attachment discovery on tender detail pages.

use std::sync::Arc;

use anyhow::Context;
use przetarg_core::{NewAttachment, Source};
use przetarg_storage::{is_safe_path_component, DownloadStore, HttpFetcher, TenderStore};
use scraper::{Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use crate::AdapterError;

const ATTACHMENT_SELECTOR: &str = "a.proceeding-file-download[href]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentLink {
    pub url: Url,
    pub file_name: String,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub tender_id: String,
    pub found: usize,
    pub downloaded: usize,
    pub failed: usize,
}

pub struct DocumentDiscovery {
    http: HttpFetcher,
    downloads: DownloadStore,
    store: Arc<dyn TenderStore>,
    base_url: String,
}

impl DocumentDiscovery {
    pub fn new(
        http: HttpFetcher,
        downloads: DownloadStore,
        store: Arc<dyn TenderStore>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            downloads,
            store,
            base_url: base_url.into(),
        }
    }

    /// `<base>/transakcja/<tender_id>`.
    pub fn detail_page_url(&self, tender_id: &str) -> Result<Url, AdapterError> {
        Ok(Url::parse(&format!(
            "{}/transakcja/{tender_id}",
            self.base_url.trim_end_matches('/')
        ))?)
    }

    /// Downloads every attachment linked from the tender's detail page.
    ///
    /// Page fetch problems are returned; a failing file is logged and
    /// counted while the remaining files are still attempted.
    pub async fn discover(&self, tender_id: &str) -> Result<DiscoveryReport, AdapterError> {
        let tender_dir = self.downloads.tender_dir(tender_id)?;
        let page_url = self.detail_page_url(tender_id)?;
        let page = self
            .http
            .fetch_bytes(Source::PlatformaZakupowa.as_str(), page_url.as_str())
            .await?;
        let html = String::from_utf8_lossy(&page.body);
        let base = Url::parse(&page.final_url).unwrap_or_else(|_| page_url.clone());
        let links = extract_attachment_links(&html, &base);

        tokio::fs::create_dir_all(&tender_dir)
            .await
            .with_context(|| format!("creating {}", tender_dir.display()))?;

        let mut report = DiscoveryReport {
            tender_id: tender_id.to_string(),
            found: links.len(),
            ..DiscoveryReport::default()
        };
        for link in links {
            debug!(url = %link.url, "downloading document");
            match self.download_one(tender_id, &link).await {
                Ok(()) => report.downloaded += 1,
                Err(err) => {
                    warn!(url = %link.url, error = %err, "document download failed");
                    report.failed += 1;
                }
            }
        }
        info!(
            tender_id,
            found = report.found,
            downloaded = report.downloaded,
            failed = report.failed,
            "document discovery finished"
        );
        Ok(report)
    }

    async fn download_one(&self, tender_id: &str, link: &AttachmentLink) -> Result<(), AdapterError> {
        let resp = self
            .http
            .fetch_bytes(Source::PlatformaZakupowa.as_str(), link.url.as_str())
            .await?;
        let stored = self
            .downloads
            .store_attachment(tender_id, &link.file_name, &resp.body)
            .await?;

        let attachment = NewAttachment {
            source: Source::PlatformaZakupowa,
            tender_source_id: tender_id.to_string(),
            title: link.title.clone(),
            link: link.url.to_string(),
            file_path: stored.relative_path.to_string_lossy().into_owned(),
            byte_size: i64::try_from(stored.byte_size).unwrap_or(i64::MAX),
            content_hash: stored.content_hash,
        };
        // The file is already on disk; a bookkeeping failure is not a download failure.
        if let Err(err) = self.store.record_attachment(&attachment).await {
            warn!(url = %link.url, error = %err, "could not record attachment");
        }
        Ok(())
    }
}

/// Finds file-download anchors in a detail page and resolves them against `page_url`.
pub fn extract_attachment_links(html: &str, page_url: &Url) -> Vec<AttachmentLink> {
    let Ok(selector) = Selector::parse(ATTACHMENT_SELECTOR) else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    document
        .select(&selector)
        .filter_map(|anchor| {
            let href = anchor.value().attr("href")?;
            let url = resolve_href(href, page_url)?;
            let Some(file_name) = file_name_for(&url) else {
                warn!(%url, "attachment link has no usable file name");
                return None;
            };
            let text = anchor.text().collect::<Vec<_>>().join(" ");
            let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
            let title = if text.is_empty() { file_name.clone() } else { text };
            Some(AttachmentLink {
                url,
                file_name,
                title,
            })
        })
        .collect()
}

fn resolve_href(href: &str, page_url: &Url) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    if let Some(rest) = href.strip_prefix("//") {
        return Url::parse(&format!("https://{rest}")).ok();
    }
    page_url.join(href).ok()
}

/// Last path segment; the query string and fragment never reach the file name.
fn file_name_for(url: &Url) -> Option<String> {
    let name = url.path_segments()?.next_back()?.to_string();
    is_safe_path_component(&name).then_some(name)
}
