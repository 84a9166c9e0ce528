//! JSON notice board adapter for ezamowienia.gov.pl.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use przetarg_core::{Source, Tender};
use przetarg_storage::{BackoffPolicy, HttpFetcher};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, warn};
use url::Url;

use crate::{normalize_text, AdapterError, RowError, SourceBatch};

pub const EZAMOWIENIA_NOTICE_URL: &str = "https://ezamowienia.gov.pl/mo-board/api/v1/notice";
pub const PAGE_SIZE: u32 = 20;
pub const NOTICE_TYPE: &str = "ContractNotice";
const DATE_PARAM_FORMAT: &str = "%Y-%m-%d";

/// One notice as published by the board.
///
/// Fields this crate does not interpret are carried through untouched,
/// either in the dedicated `procedure_result` / `contractors` slots or in
/// `extra`, so relaying a notice never loses data. Known fields absent
/// upstream stay absent when serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EzamowieniaNotice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tender_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bzp_number: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "isTenderAmountBelowEU"
    )]
    pub is_tender_amount_below_eu: Option<bool>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_flexible_datetime"
    )]
    pub publication_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_object: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpv_code: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_flexible_datetime"
    )]
    pub submitting_offers_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "JsonValue::is_null")]
    pub procedure_result: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_province: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_national_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tender_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_body: Option<String>,
    #[serde(default, skip_serializing_if = "JsonValue::is_null")]
    pub contractors: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// Accepts RFC3339 or a zone-less ISO timestamp (read as UTC); null or blank is `None`.
pub fn parse_flexible_datetime(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

fn deserialize_flexible_datetime<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => parse_flexible_datetime(text)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("unrecognized timestamp `{text}`"))),
    }
}

#[derive(Debug, Clone)]
pub struct EzamowieniaAdapter {
    http: HttpFetcher,
    base_url: String,
}

impl EzamowieniaAdapter {
    /// Builds the adapter on `http`'s client with retries disabled: every
    /// fetch is exactly one request.
    pub fn new(http: &HttpFetcher, base_url: impl Into<String>) -> Self {
        Self {
            http: http.with_backoff(BackoffPolicy::none()),
            base_url: base_url.into(),
        }
    }

    pub fn notice_url(&self, date_from: NaiveDate, date_to: NaiveDate) -> Result<Url, AdapterError> {
        let from = date_from.format(DATE_PARAM_FORMAT).to_string();
        let to = date_to.format(DATE_PARAM_FORMAT).to_string();
        let page_size = PAGE_SIZE.to_string();
        Ok(Url::parse_with_params(
            &self.base_url,
            [
                ("PageSize", page_size.as_str()),
                ("NoticeType", NOTICE_TYPE),
                ("PublicationDateFrom", from.as_str()),
                ("PublicationDateTo", to.as_str()),
            ],
        )?)
    }

    /// One bounded request for notices published in `[date_from, date_to]`.
    ///
    /// Any transport error, non-success status or undecodable body fails the
    /// whole call; nothing is salvaged from a partial response.
    pub async fn fetch(
        &self,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<Vec<EzamowieniaNotice>, AdapterError> {
        if date_from > date_to {
            return Err(AdapterError::InvalidDateRange {
                from: date_from,
                to: date_to,
            });
        }
        let url = self.notice_url(date_from, date_to)?;
        let resp = self
            .http
            .fetch_bytes(Source::Ezamowienia.as_str(), url.as_str())
            .await?;
        let notices: Vec<EzamowieniaNotice> = serde_json::from_slice(&resp.body)?;
        debug!(count = notices.len(), %date_from, %date_to, "decoded notices");
        Ok(notices)
    }

    pub async fn fetch_normalized(
        &self,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<SourceBatch, AdapterError> {
        let notices = self.fetch(date_from, date_to).await?;
        let mut batch = SourceBatch::default();
        for (row, notice) in notices.iter().enumerate() {
            match normalize_notice(notice) {
                Some(tender) => batch.records.push(tender),
                None => {
                    let err = RowError {
                        row,
                        reason: "notice has no objectId, bzpNumber or noticeNumber".into(),
                    };
                    warn!(%err, "skipping notice");
                    batch.row_errors.push(err);
                }
            }
        }
        Ok(batch)
    }
}

/// Maps a notice onto the canonical record; `None` when it carries no identifier.
pub fn normalize_notice(notice: &EzamowieniaNotice) -> Option<Tender> {
    let text = |value: &Option<String>| normalize_text(value.as_deref().unwrap_or_default());

    let source_id = [&notice.object_id, &notice.bzp_number, &notice.notice_number]
        .into_iter()
        .map(text)
        .find(|id| !id.is_empty())?;

    let mut tender = Tender::new(Source::Ezamowienia, source_id);
    tender.title = text(&notice.order_object);
    tender.description = text(&notice.html_body);
    tender.organization_name = text(&notice.organization_name);
    tender.cpv_code = text(&notice.cpv_code);
    tender.publication_date = notice.publication_date;
    tender.submission_deadline = notice.submitting_offers_date;

    let mut info = Map::new();
    for (key, value) in [
        ("noticeNumber", &notice.notice_number),
        ("bzpNumber", &notice.bzp_number),
        ("tenderId", &notice.tender_id),
        ("organizationCity", &notice.organization_city),
        ("organizationProvince", &notice.organization_province),
        ("organizationCountry", &notice.organization_country),
    ] {
        let value = text(value);
        if !value.is_empty() {
            info.insert(key.to_string(), JsonValue::String(value));
        }
    }
    if !info.is_empty() {
        tender.additional_info = JsonValue::Object(info).to_string();
    }
    Some(tender.with_content_hash())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use przetarg_storage::HttpClientConfig;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const NOTICES: &str = r#"[
      {
        "clientType": "1.1.5",
        "orderType": "Delivery",
        "tenderType": "1.1.1",
        "noticeType": "ContractNotice",
        "noticeNumber": "2026/BZP 00012345/01",
        "bzpNumber": "2026/BZP 00012345",
        "isTenderAmountBelowEU": true,
        "publicationDate": "2026-01-13T09:15:00Z",
        "orderObject": "  Dostawa mebli biurowych ",
        "cpvCode": "39130000-2 (Meble biurowe)",
        "submittingOffersDate": "2026-01-27T10:00:00",
        "procedureResult": {"status": "open"},
        "organizationName": "Gmina Przykładowa",
        "organizationCity": "Kraków",
        "organizationProvince": "PL21",
        "organizationCountry": "PL",
        "organizationNationalId": "1234567890",
        "organizationId": "42",
        "tenderId": "ocds-148610-abc",
        "htmlBody": "<p>Opis</p>",
        "contractors": [{"name": "Meblex"}],
        "objectId": "OBJ-1",
        "futureField": 7
      }
    ]"#;

    fn adapter(base: &str) -> EzamowieniaAdapter {
        let http = HttpFetcher::new(HttpClientConfig::default()).unwrap();
        EzamowieniaAdapter::new(&http, base)
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn builds_the_bounded_query() {
        let url = adapter(EZAMOWIENIA_NOTICE_URL)
            .notice_url(day(2026, 1, 1), day(2026, 1, 31))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://ezamowienia.gov.pl/mo-board/api/v1/notice?PageSize=20&NoticeType=ContractNotice&PublicationDateFrom=2026-01-01&PublicationDateTo=2026-01-31"
        );
    }

    #[test]
    fn decodes_known_fields_and_keeps_the_rest() {
        let notices: Vec<EzamowieniaNotice> = serde_json::from_str(NOTICES).unwrap();
        let notice = &notices[0];
        assert_eq!(notice.is_tender_amount_below_eu, Some(true));
        assert_eq!(
            notice.submitting_offers_date,
            Utc.with_ymd_and_hms(2026, 1, 27, 10, 0, 0).single()
        );
        assert_eq!(notice.contractors[0]["name"], "Meblex");
        assert_eq!(notice.extra["futureField"], 7);

        let relayed = serde_json::to_value(notice).unwrap();
        assert_eq!(relayed["procedureResult"]["status"], "open");
        assert_eq!(relayed["futureField"], 7);
        assert_eq!(relayed["isTenderAmountBelowEU"], true);
    }

    #[test]
    fn fields_missing_upstream_are_not_relayed_as_null() {
        let notice: EzamowieniaNotice =
            serde_json::from_str(r#"{"objectId": "OBJ-2", "orderObject": "Remont drogi"}"#).unwrap();
        let relayed = serde_json::to_value(&notice).unwrap();
        let keys: Vec<&str> = relayed
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&"objectId"));
        assert!(keys.contains(&"orderObject"));
    }

    #[test]
    fn normalizes_into_a_tender() {
        let notices: Vec<EzamowieniaNotice> = serde_json::from_str(NOTICES).unwrap();
        let tender = normalize_notice(&notices[0]).unwrap();
        assert_eq!(tender.source, Source::Ezamowienia);
        assert_eq!(tender.source_id, "OBJ-1");
        assert_eq!(tender.title, "Dostawa mebli biurowych");
        assert_eq!(tender.cpv_code, "39130000-2 (Meble biurowe)");
        let info: JsonValue = serde_json::from_str(&tender.additional_info).unwrap();
        assert_eq!(info["organizationCity"], "Kraków");

        let mut anonymous = notices[0].clone();
        anonymous.object_id = None;
        anonymous.bzp_number = Some(" ".into());
        anonymous.notice_number = None;
        assert!(normalize_notice(&anonymous).is_none());
    }

    #[tokio::test]
    async fn fetch_sends_one_request_and_decodes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/notice"))
            .and(query_param("PageSize", "20"))
            .and(query_param("NoticeType", "ContractNotice"))
            .and(query_param("PublicationDateFrom", "2026-01-13"))
            .and(query_param("PublicationDateTo", "2026-01-14"))
            .respond_with(ResponseTemplate::new(200).set_body_string(NOTICES))
            .expect(1)
            .mount(&server)
            .await;

        let notices = adapter(&format!("{}/notice", server.uri()))
            .fetch(day(2026, 1, 13), day(2026, 1, 14))
            .await
            .unwrap();
        assert_eq!(notices.len(), 1);
    }

    #[tokio::test]
    async fn non_success_status_is_terminal_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let err = adapter(&format!("{}/notice", server.uri()))
            .fetch(day(2026, 1, 13), day(2026, 1, 13))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Fetch(_)));
    }

    #[tokio::test]
    async fn malformed_json_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"not\": \"an array\"}"))
            .mount(&server)
            .await;

        let err = adapter(&format!("{}/notice", server.uri()))
            .fetch(day(2026, 1, 13), day(2026, 1, 13))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Decode(_)));
    }

    #[tokio::test]
    async fn reversed_ranges_are_rejected_before_any_request() {
        let err = adapter("http://127.0.0.1:9/notice")
            .fetch(day(2026, 2, 2), day(2026, 2, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::InvalidDateRange { .. }));
    }
}
