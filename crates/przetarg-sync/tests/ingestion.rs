use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use przetarg_core::Source;
use przetarg_storage::{MemoryTenderStore, TenderStore};
use przetarg_sync::{run_sync_once, SourceConfig, SourceRegistry, SyncConfig, SyncPipeline};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fixture(relative: &str) -> Vec<u8> {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures");
    std::fs::read(root.join(relative)).unwrap()
}

fn test_config(download_dir: &Path) -> SyncConfig {
    let mut config = SyncConfig::from_lookup(|_| None);
    config.download_dir = download_dir.to_path_buf();
    config.http_max_retries = 0;
    config
}

async fn mount_platformazakupowa(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/transakcje-ON-eksport.csv"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(fixture("platformazakupowa/sample/export.csv")),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/transakcja/99"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(fixture("platformazakupowa/sample/transakcja-99.html")),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/99/SWZ.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.7 swz".to_vec()))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/99/formularz-ofertowy.docx"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK\x03\x04".to_vec()))
        .mount(server)
        .await;
}

fn csv_source(server: &MockServer) -> SourceConfig {
    let mut source = SourceConfig::new(Source::PlatformaZakupowa);
    source.url = Some(format!("{}/transakcje-ON-eksport.csv", server.uri()));
    source.detail_base_url = Some(server.uri());
    source
}

fn json_source(server: &MockServer) -> SourceConfig {
    let mut source = SourceConfig::new(Source::Ezamowienia);
    source.url = Some(format!("{}/mo-board/api/v1/notice", server.uri()));
    source
}

#[tokio::test]
async fn csv_export_is_ingested_once_and_reingestion_is_a_no_op() {
    let server = MockServer::start().await;
    mount_platformazakupowa(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let store = Arc::new(MemoryTenderStore::new());
    let pipeline = SyncPipeline::from_config(
        &config,
        &csv_source(&server),
        &config.http_fetcher().unwrap(),
        store.clone(),
    );

    let first = pipeline.run_once().await.unwrap();
    assert_eq!(first.source, Source::PlatformaZakupowa);
    assert_eq!(first.fetched, 2);
    assert_eq!(first.applied, 2);
    assert_eq!(first.unchanged, 0);
    assert_eq!(first.skipped_rows, 1);
    assert_eq!(first.documents_downloaded, 2);
    let snapshot = first.snapshot_path.clone().unwrap();
    assert!(Path::new(&snapshot).exists());
    assert!(snapshot.contains("platformazakupowa-"));

    let tender = store.find(Source::PlatformaZakupowa, "99").await.unwrap();
    assert_eq!(tender.title, "Dostawa materiałów biurowych");
    assert_eq!(tender.description, "Papier A4, segregatory\noraz tonery do drukarek");
    assert_eq!(tender.organization_name, "Gmina Przykładowo");
    assert_eq!(tender.content_hash, tender.compute_hash());
    assert!(dir.path().join("99/SWZ.pdf").exists());
    assert!(dir.path().join("99/formularz-ofertowy.docx").exists());

    let late = store.find(Source::PlatformaZakupowa, "101").await.unwrap();
    assert!(late.publication_date.is_some());
    assert_eq!(late.submission_deadline, None);
    assert!(store.find(Source::PlatformaZakupowa, "100").await.is_none());

    let second = pipeline.run_once().await.unwrap();
    assert_eq!(second.applied, 0);
    assert_eq!(second.unchanged, 2);
    assert_eq!(store.len().await, 2);
    assert_eq!(
        store.find(Source::PlatformaZakupowa, "99").await.unwrap(),
        tender
    );

    let attachments = store
        .attachments_for(Source::PlatformaZakupowa, "99")
        .await
        .unwrap();
    assert_eq!(attachments.len(), 2);
    assert_eq!(attachments[0].title, "Specyfikacja warunków zamówienia");
}

#[tokio::test]
async fn json_feed_runs_over_the_lookback_window() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/mo-board/api/v1/notice"))
        .and(query_param("PublicationDateFrom", "2026-01-13"))
        .and(query_param("PublicationDateTo", "2026-01-14"))
        .respond_with(
            ResponseTemplate::new(200).set_body_bytes(fixture("ezamowienia/sample/notices.json")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let store = Arc::new(MemoryTenderStore::new());
    let pipeline = SyncPipeline::from_config(
        &config,
        &json_source(&server),
        &config.http_fetcher().unwrap(),
        store.clone(),
    );

    let today = NaiveDate::from_ymd_opt(2026, 1, 14).unwrap();
    let summary = pipeline.run_for_date(today).await.unwrap();
    assert_eq!(summary.source, Source::Ezamowienia);
    assert_eq!(summary.applied, 2);
    assert_eq!(summary.snapshot_path, None);
    assert_eq!(summary.documents_downloaded, 0);

    let by_object = store
        .find(Source::Ezamowienia, "08dd3a0c-1111-2222-3333-444455556666")
        .await
        .unwrap();
    assert_eq!(by_object.title, "Dostawa oleju opałowego");
    let by_notice = store
        .find(Source::Ezamowienia, "2026/BZP 00012399/01")
        .await
        .unwrap();
    assert_eq!(by_notice.submission_deadline, None);
}

#[tokio::test]
async fn one_failing_source_does_not_stop_the_others() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/transakcje-ON-eksport.csv"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/mo-board/api/v1/notice"))
        .respond_with(
            ResponseTemplate::new(200).set_body_bytes(fixture("ezamowienia/sample/notices.json")),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let registry = SourceRegistry {
        sources: vec![csv_source(&server), json_source(&server)],
    };
    let store: Arc<dyn TenderStore> = Arc::new(MemoryTenderStore::new());

    let summaries = run_sync_once(&config, &registry, store.clone(), None)
        .await
        .unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].source, Source::Ezamowienia);

    let explicit = run_sync_once(&config, &registry, store, Some(Source::PlatformaZakupowa)).await;
    assert!(explicit.is_err());
}
