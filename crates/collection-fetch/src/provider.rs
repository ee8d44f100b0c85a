//! Unsplash search API client

use crate::error::{FetchError, FetchResult};
use crate::{FetchConfig, SearchProvider};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<Photo>,
}

#[derive(Debug, Deserialize)]
struct Photo {
    urls: PhotoUrls,
}

#[derive(Debug, Deserialize)]
struct PhotoUrls {
    regular: String,
}

#[derive(Debug, Clone)]
pub struct UnsplashProvider {
    client: Client,
    access_key: String,
    base_url: String,
    per_page: u32,
}

impl UnsplashProvider {
    pub fn new(config: &FetchConfig) -> FetchResult<Self> {
        let access_key = config
            .unsplash_access_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or(FetchError::MissingAccessKey { provider: "unsplash" })?;

        Ok(Self {
            client: Client::new(),
            access_key,
            base_url: config.unsplash_base_url.trim_end_matches('/').to_string(),
            per_page: config.per_page,
        })
    }
}

#[async_trait]
impl SearchProvider for UnsplashProvider {
    #[tracing::instrument(skip(self))]
    async fn search(&self, term: &str) -> FetchResult<Vec<String>> {
        let url = format!("{}/search/photos", self.base_url);
        let per_page = self.per_page.to_string();
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Client-ID {}", self.access_key))
            .query(&[("query", term), ("per_page", per_page.as_str())])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited { provider: "unsplash" });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body: SearchResponse = response.json().await?;
        let urls: Vec<String> = body.results.into_iter().map(|photo| photo.urls.regular).collect();
        tracing::info!(term, count = urls.len(), "Search complete");
        Ok(urls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> FetchConfig {
        FetchConfig {
            unsplash_access_key: Some("test-key".to_string()),
            unsplash_base_url: server.uri(),
            per_page: 3,
            ..FetchConfig::default()
        }
    }

    #[tokio::test]
    async fn test_search_returns_regular_urls_in_order() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/photos"))
            .and(query_param("query", "alpaca"))
            .and(query_param("per_page", "3"))
            .and(header("Authorization", "Client-ID test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "total": 2,
                "results": [
                    {"id": "a", "urls": {"regular": "https://img.test/a.jpg", "small": "x"}},
                    {"id": "b", "urls": {"regular": "https://img.test/b.jpg", "small": "y"}}
                ]
            })))
            .mount(&server)
            .await;

        let provider = UnsplashProvider::new(&config(&server))?;
        let urls = provider.search("alpaca").await?;
        assert_eq!(urls, vec!["https://img.test/a.jpg", "https://img.test/b.jpg"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_rate_limit_is_reported() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let provider = UnsplashProvider::new(&config(&server))?;
        let err = provider.search("alpaca").await.unwrap_err();
        assert!(matches!(err, FetchError::RateLimited { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_error_status_is_reported() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let provider = UnsplashProvider::new(&config(&server))?;
        let err = provider.search("alpaca").await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 401, .. }));
        Ok(())
    }

    #[test]
    fn test_missing_key_rejected() {
        let err = UnsplashProvider::new(&FetchConfig::default()).unwrap_err();
        assert!(matches!(err, FetchError::MissingAccessKey { provider: "unsplash" }));
    }
}
