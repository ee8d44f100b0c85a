//! Batch download of search results into a collection

use crate::error::{FetchError, FetchResult};
use crate::{Fetcher, SearchProvider};
use asset_storage::layout::validate_collection;
use asset_storage::StorageBackend;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadReport {
    pub collection: String,
    /// Keys written, sorted
    pub saved: Vec<String>,
    /// `(url, reason)` for every image that could not be stored
    pub failed: Vec<(String, String)>,
}

/// Key for the `index`-th (1-based) search result of `term`
pub fn asset_key_for(term: &str, index: usize) -> String {
    format!("{}/{}_{:03}.jpg", term, term, index)
}

pub struct Downloader {
    storage: Arc<dyn StorageBackend>,
    provider: Arc<dyn SearchProvider>,
    fetcher: Arc<dyn Fetcher>,
    concurrency: usize,
}

impl Downloader {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        provider: Arc<dyn SearchProvider>,
        fetcher: Arc<dyn Fetcher>,
        concurrency: usize,
    ) -> Self {
        Self {
            storage,
            provider,
            fetcher,
            concurrency: concurrency.max(1),
        }
    }

    /// Search for `term` and store every result under the `term` collection.
    ///
    /// Search failures are returned; a failing image is recorded in the
    /// report and the rest of the batch continues.
    pub async fn download(&self, term: &str) -> FetchResult<DownloadReport> {
        self.download_with(term, |_| {}).await
    }

    /// [`Downloader::download`], calling `on_saved` with each key as soon as
    /// its image is stored.
    #[tracing::instrument(skip(self, on_saved))]
    pub async fn download_with<F>(&self, term: &str, on_saved: F) -> FetchResult<DownloadReport>
    where
        F: Fn(&str) + Send + Sync,
    {
        validate_collection(term).map_err(|_| FetchError::InvalidTerm(term.to_string()))?;

        let urls = self.provider.search(term).await?;
        let total = urls.len();

        let storage = &self.storage;
        let fetcher = &self.fetcher;
        let on_saved = &on_saved;
        let outcomes: Vec<(String, FetchResult<String>)> =
            stream::iter(urls.into_iter().enumerate())
                .map(|(index, url)| async move {
                    let key = asset_key_for(term, index + 1);
                    let result = async {
                        let bytes = fetcher.fetch(&url).await?;
                        storage.write(&key, &bytes).await?;
                        on_saved(&key);
                        Ok::<_, FetchError>(key)
                    }
                    .await;
                    (url, result)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        let mut report = DownloadReport {
            collection: term.to_string(),
            ..DownloadReport::default()
        };
        for (url, result) in outcomes {
            match result {
                Ok(key) => {
                    tracing::debug!(url = %url, key = %key, "Saved image");
                    report.saved.push(key);
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Failed to download image");
                    report.failed.push((url, e.to_string()));
                }
            }
        }
        report.saved.sort();

        tracing::info!(
            term,
            total,
            saved = report.saved.len(),
            failed = report.failed.len(),
            "Download complete"
        );
        Ok(report)
    }
}
