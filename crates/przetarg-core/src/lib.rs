//! Canonical tender model and content hashing for przetarg.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const CRATE_NAME: &str = "przetarg-core";

/// Rendering of a missing timestamp inside the hash input.
pub const ZERO_TIMESTAMP: &str = "0001-01-01T00:00:00Z";

/// Upstream system a tender was ingested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    PlatformaZakupowa,
    Ezamowienia,
}

impl Source {
    pub const ALL: [Source; 2] = [Source::PlatformaZakupowa, Source::Ezamowienia];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::PlatformaZakupowa => "platformazakupowa",
            Source::Ezamowienia => "ezamowienia",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown tender source `{0}`")]
pub struct UnknownSource(pub String);

impl FromStr for Source {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Source::ALL
            .into_iter()
            .find(|source| source.as_str() == s.trim())
            .ok_or_else(|| UnknownSource(s.to_string()))
    }
}

/// Normalized tender record shared by every adapter and the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tender {
    /// Store-assigned surrogate key; `None` until persisted.
    pub id: Option<i64>,
    pub source: Source,
    pub source_id: String,
    pub title: String,
    pub description: String,
    pub organization_name: String,
    pub organization_contact: String,
    pub organization_email: String,
    pub organization_phone: String,
    pub cpv_code: String,
    pub publication_date: Option<DateTime<Utc>>,
    pub submission_deadline: Option<DateTime<Utc>>,
    pub link: String,
    pub additional_info: String,
    pub content_hash: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Tender {
    pub fn new(source: Source, source_id: impl Into<String>) -> Self {
        Self {
            id: None,
            source,
            source_id: source_id.into(),
            title: String::new(),
            description: String::new(),
            organization_name: String::new(),
            organization_contact: String::new(),
            organization_email: String::new(),
            organization_phone: String::new(),
            cpv_code: String::new(),
            publication_date: None,
            submission_deadline: None,
            link: String::new(),
            additional_info: String::new(),
            content_hash: String::new(),
            created_at: None,
            updated_at: None,
        }
    }

    /// SHA-256 over the pipe-joined content fields.
    ///
    /// Identity (`source`, `source_id`, `id`), store metadata and the
    /// stored `content_hash` never take part, so the same upstream content
    /// always hashes the same regardless of where or when it was stored.
    pub fn compute_hash(&self) -> String {
        let input = [
            self.title.as_str(),
            self.description.as_str(),
            self.organization_name.as_str(),
            self.organization_contact.as_str(),
            self.organization_email.as_str(),
            self.organization_phone.as_str(),
            self.cpv_code.as_str(),
            hash_timestamp(self.publication_date).as_str(),
            hash_timestamp(self.submission_deadline).as_str(),
            self.link.as_str(),
            self.additional_info.as_str(),
        ]
        .join("|");
        sha256_hex(input.as_bytes())
    }

    /// Returns the record with `content_hash` recomputed from its content.
    pub fn with_content_hash(mut self) -> Self {
        self.content_hash = self.compute_hash();
        self
    }
}

fn hash_timestamp(value: Option<DateTime<Utc>>) -> String {
    match value {
        Some(ts) => ts.to_rfc3339_opts(SecondsFormat::Secs, true),
        None => ZERO_TIMESTAMP.to_string(),
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// File fetched for a tender by document discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenderAttachment {
    pub id: i64,
    pub source: Source,
    pub tender_source_id: String,
    pub title: String,
    pub link: String,
    pub file_path: String,
    pub byte_size: i64,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Attachment as handed to the store before an id is assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttachment {
    pub source: Source,
    pub tender_source_id: String,
    pub title: String,
    pub link: String,
    pub file_path: String,
    pub byte_size: i64,
    pub content_hash: String,
}
