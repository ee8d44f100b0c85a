use asset_storage::{LocalStorage, StorageBackend};
use collection_fetch::{build_archive, Downloader, FetchConfig, HttpFetcher, UnsplashProvider};
use std::sync::Arc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_search_download_and_archive() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let results: Vec<serde_json::Value> = ["one", "two", "missing"]
        .iter()
        .map(|name| {
            let url = format!("{}/img/{}.jpg", server.uri(), name);
            serde_json::json!({ "urls": { "regular": url } })
        })
        .collect();

    Mock::given(method("GET"))
        .and(path("/search/photos"))
        .and(query_param("query", "alpaca"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "results": results })),
        )
        .mount(&server)
        .await;
    for name in ["one", "two"] {
        Mock::given(method("GET"))
            .and(path(format!("/img/{}.jpg", name)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(name.as_bytes().to_vec()))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/img/missing.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir()?;
    let storage: Arc<dyn StorageBackend> = Arc::new(LocalStorage::new(dir.path())?);
    let config = FetchConfig {
        unsplash_access_key: Some("key".to_string()),
        unsplash_base_url: server.uri(),
        ..FetchConfig::default()
    };
    let downloader = Downloader::new(
        storage.clone(),
        Arc::new(UnsplashProvider::new(&config)?),
        Arc::new(HttpFetcher::new()),
        config.concurrency,
    );

    let report = downloader.download("alpaca").await?;
    assert_eq!(report.saved, vec!["alpaca/alpaca_001.jpg", "alpaca/alpaca_002.jpg"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(storage.read("alpaca/alpaca_002.jpg").await?, b"two");

    let key = build_archive(storage.as_ref(), "alpaca").await?;
    assert_eq!(key, "alpaca.zip");
    assert!(dir.path().join("alpaca.zip").is_file());
    Ok(())
}
