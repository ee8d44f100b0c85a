//! Filling collections from an image search API
//!
//! A search term becomes a collection: the [`SearchProvider`] turns the term
//! into an ordered list of image URLs, the [`Downloader`] fetches them over a
//! bounded pool and stores each as `<term>/<term>_<NNN>.jpg`, and
//! [`build_archive`] can bundle the collection into `<term>.zip`.

pub mod archive;
pub mod download;
pub mod error;
pub mod fetch;
pub mod provider;

pub use archive::build_archive;
pub use download::{DownloadReport, Downloader};
pub use error::{FetchError, FetchResult};
pub use fetch::HttpFetcher;
pub use provider::UnsplashProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Image search: term to ordered image URLs
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, term: &str) -> FetchResult<Vec<String>>;
}

/// Retrieves the bytes behind one URL
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> FetchResult<Vec<u8>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Simultaneous image downloads
    pub concurrency: usize,
    /// Results requested per search
    pub per_page: u32,
    pub unsplash_access_key: Option<String>,
    pub unsplash_base_url: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            per_page: 30,
            unsplash_access_key: None,
            unsplash_base_url: "https://api.unsplash.com".to_string(),
        }
    }
}

impl FetchConfig {
    /// Fill a missing access key from `UNSPLASH_ACCESS_KEY`
    pub fn with_env_key(mut self) -> Self {
        if self.unsplash_access_key.is_none() {
            self.unsplash_access_key = std::env::var("UNSPLASH_ACCESS_KEY").ok();
        }
        self
    }
}
