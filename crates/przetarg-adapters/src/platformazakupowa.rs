//! CSV export adapter for platformazakupowa.pl.

use std::io::Read;

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use csv::{ByteRecord, ReaderBuilder};
use przetarg_core::{Source, Tender};
use przetarg_storage::{DownloadStore, HttpFetcher};
use tracing::{info, warn};

use crate::{normalize_text, AdapterError, RowError, SourceBatch};

pub const PLATFORMAZAKUPOWA_EXPORT_URL: &str = "https://platformazakupowa.pl/transakcje-ON-eksport.csv";
pub const PLATFORMAZAKUPOWA_BASE_URL: &str = "https://platformazakupowa.pl";

/// Columns every export row must carry.
pub const EXPORT_COLUMNS: usize = 18;

/// Layout of the two leading date columns, e.g. `2026-01-13 15:26:00`.
pub const EXPORT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// Positional contract with the export header:
// data_rozpoczecia, data_zakonczenia, firma_wystawiajaca,
// nazwisko_i_imie_wystawiajacego, email, telefon, nazwa, link, termin_platnosci,
// najwczesniejszy_termin_dostawy, napozniejszy_termin_dostawy, opcja_transportu,
// adres_dostawy, wymagania_dodatkowe, opis_dodatkowy_ON, przedmiot_zapytania,
// id_zapytania, opis_i_specyfikacja
mod col {
    pub const PUBLICATION_DATE: usize = 0;
    pub const SUBMISSION_DEADLINE: usize = 1;
    pub const ORGANIZATION_NAME: usize = 2;
    pub const ORGANIZATION_CONTACT: usize = 3;
    pub const ORGANIZATION_EMAIL: usize = 4;
    pub const ORGANIZATION_PHONE: usize = 5;
    pub const TITLE: usize = 6;
    pub const LINK: usize = 7;
    pub const SUBJECT: usize = 15;
    pub const INQUIRY_ID: usize = 16;
    pub const DESCRIPTION: usize = 17;
}

#[derive(Debug, Clone)]
pub struct PlatformaZakupowaAdapter {
    http: HttpFetcher,
    downloads: DownloadStore,
    export_url: String,
}

impl PlatformaZakupowaAdapter {
    pub fn new(http: HttpFetcher, downloads: DownloadStore, export_url: impl Into<String>) -> Self {
        Self {
            http,
            downloads,
            export_url: export_url.into(),
        }
    }

    /// Downloads the export, keeps a timestamped copy, then parses it row by row.
    pub async fn fetch_and_normalize(&self) -> Result<SourceBatch, AdapterError> {
        let source = Source::PlatformaZakupowa.as_str();
        let resp = self.http.fetch_bytes(source, &self.export_url).await?;
        let snapshot = self
            .downloads
            .store_snapshot(source, Local::now().naive_local(), &resp.body)
            .await?;
        info!(
            path = %snapshot.absolute_path.display(),
            bytes = snapshot.byte_size,
            "stored export snapshot"
        );

        let (records, row_errors) = parse_export(resp.body.as_slice());
        for err in &row_errors {
            warn!(%err, "skipping export row");
        }
        Ok(SourceBatch {
            records,
            row_errors,
            snapshot_path: Some(snapshot.absolute_path),
        })
    }
}

/// Parses an export body. Row 0 is the header; short or malformed rows are
/// reported and skipped without stopping the rest of the file. Fields are
/// decoded lossily, so stray non-UTF-8 bytes never cost a row.
pub fn parse_export<R: Read>(reader: R) -> (Vec<Tender>, Vec<RowError>) {
    let mut csv_reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut records = Vec::new();
    let mut errors = Vec::new();
    for (row, result) in csv_reader.byte_records().enumerate() {
        if row == 0 {
            continue;
        }
        let record = match result {
            Ok(record) => record,
            Err(err) => {
                errors.push(RowError {
                    row,
                    reason: err.to_string(),
                });
                continue;
            }
        };
        if record.len() < EXPORT_COLUMNS {
            errors.push(RowError {
                row,
                reason: format!(
                    "expected {EXPORT_COLUMNS} columns, found {}",
                    record.len()
                ),
            });
            continue;
        }
        records.push(row_to_tender(&record));
    }
    (records, errors)
}

fn row_to_tender(record: &ByteRecord) -> Tender {
    let field = |idx: usize| {
        normalize_text(&String::from_utf8_lossy(record.get(idx).unwrap_or_default()))
    };

    let mut tender = Tender::new(Source::PlatformaZakupowa, field(col::INQUIRY_ID));
    tender.title = field(col::TITLE);
    tender.description = field(col::DESCRIPTION);
    tender.organization_name = field(col::ORGANIZATION_NAME);
    tender.organization_contact = field(col::ORGANIZATION_CONTACT);
    tender.organization_email = field(col::ORGANIZATION_EMAIL);
    tender.organization_phone = field(col::ORGANIZATION_PHONE);
    tender.publication_date = parse_export_date(&field(col::PUBLICATION_DATE));
    tender.submission_deadline = parse_export_date(&field(col::SUBMISSION_DEADLINE));
    tender.link = field(col::LINK);
    tender.additional_info = field(col::SUBJECT);
    tender.with_content_hash()
}

/// Export dates carry no zone and are read as UTC; anything else becomes `None`.
fn parse_export_date(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, EXPORT_DATE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}
