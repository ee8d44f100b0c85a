//! The [`Gallery`] service object
//!
//! One explicitly constructed value owning the storage backend, the random
//! selector, the derivative cache and the thumbnail pipeline. A presentation
//! layer (web handlers, the CLI) holds a `Gallery` and calls into it; there is
//! no global state.

use crate::error::{GalleryError, GalleryResult};
use crate::selector::{CollectionChoice, RandomSelector, SelectionConfig};
use asset_storage::layout::{
    archive_key, default_image_extensions, list_collection_assets, list_collections,
    list_thumbnails, validate_collection,
};
use asset_storage::StorageBackend;
use collection_fetch::{DownloadReport, Downloader};
use serde::Serialize;
use std::sync::Arc;
use thumbnail_cache::{
    content_digest, DerivativeCache, DerivativeConfig, DerivativeStats, PipelineReport,
    ThumbnailConfig, ThumbnailError, ThumbnailPipeline,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Everything stored for one collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetListing {
    pub collection: String,
    pub asset_keys: Vec<String>,
    pub thumbnail_keys: Vec<String>,
    /// Present once the collection has been archived
    pub archive_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServeMode {
    /// Return the encoded image
    Bytes,
    /// Return only the storage key, for callers that serve storage directly
    Reference,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeRequest {
    pub width: u32,
    pub height: u32,
    pub choice: CollectionChoice,
    pub mode: ServeMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Served {
    Bytes { key: String, bytes: Vec<u8>, etag: String },
    Reference { key: String },
}

impl Served {
    pub fn key(&self) -> &str {
        match self {
            Served::Bytes { key, .. } | Served::Reference { key } => key,
        }
    }
}

/// Outcome of a background refresh
#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub download: DownloadReport,
    pub thumbnails: PipelineReport,
}

pub struct Gallery {
    storage: Arc<dyn StorageBackend>,
    selector: RandomSelector,
    derivatives: Arc<DerivativeCache>,
    pipeline: Arc<ThumbnailPipeline>,
    downloader: Option<Arc<Downloader>>,
    selection: SelectionConfig,
    excluded: Vec<String>,
}

impl Gallery {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        thumbnails: ThumbnailConfig,
        derivatives: DerivativeConfig,
        selection: SelectionConfig,
    ) -> Self {
        let excluded = vec![derivatives.cache_root.trim_matches('/').to_string()];
        let selector =
            RandomSelector::new(storage.clone(), excluded.clone(), default_image_extensions());
        let pipeline =
            ThumbnailPipeline::new(storage.clone(), thumbnails).excluding(excluded.clone());
        let derivatives = DerivativeCache::new(storage.clone(), derivatives);

        Self {
            storage,
            selector,
            derivatives: Arc::new(derivatives),
            pipeline: Arc::new(pipeline),
            downloader: None,
            selection,
            excluded,
        }
    }

    /// Attach the image source used by [`Gallery::spawn_refresh`]
    pub fn with_downloader(mut self, downloader: Downloader) -> Self {
        self.downloader = Some(Arc::new(downloader));
        self
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    pub fn selector(&self) -> &RandomSelector {
        &self.selector
    }

    pub fn pipeline(&self) -> &ThumbnailPipeline {
        &self.pipeline
    }

    pub async fn collections(&self) -> GalleryResult<Vec<String>> {
        Ok(list_collections(self.storage.as_ref(), &self.excluded).await?)
    }

    pub async fn listing(&self, collection: &str) -> GalleryResult<AssetListing> {
        validate_collection(collection)?;
        let storage = self.storage.as_ref();
        let asset_keys =
            list_collection_assets(storage, collection, &default_image_extensions()).await?;
        let thumbnail_keys = list_thumbnails(storage, collection).await?;
        let archive = archive_key(collection);
        let archive_key = storage.exists(&archive).await?.then_some(archive);

        Ok(AssetListing {
            collection: collection.to_string(),
            asset_keys,
            thumbnail_keys,
            archive_key,
        })
    }

    /// Listings for every collection, sorted by name
    pub async fn listings(&self) -> GalleryResult<Vec<AssetListing>> {
        let mut listings = Vec::new();
        for collection in self.collections().await? {
            listings.push(self.listing(&collection).await?);
        }
        Ok(listings)
    }

    /// Thumbnail keys generated so far for a collection.
    ///
    /// Empty, not an error, while a refresh has not written anything yet.
    pub async fn progress(&self, collection: &str) -> GalleryResult<Vec<String>> {
        validate_collection(collection)?;
        Ok(list_thumbnails(self.storage.as_ref(), collection).await?)
    }

    /// Pick an asset and return its `width` x `height` derivative.
    #[tracing::instrument(skip(self))]
    pub async fn serve(&self, request: &ServeRequest) -> GalleryResult<Served> {
        let asset = self
            .selector
            .pick(&request.choice, self.selection.max_retries)
            .await?;

        match request.mode {
            ServeMode::Reference => {
                let key = self.resize(&asset, request.width, request.height).await?;
                Ok(Served::Reference { key })
            }
            ServeMode::Bytes => {
                let (key, bytes) = self
                    .derivatives
                    .get_or_create_bytes(&asset, request.width, request.height)
                    .await?;
                let etag = content_digest(&bytes);
                Ok(Served::Bytes { key, bytes, etag })
            }
        }
    }

    /// Derivative of a specific asset
    pub async fn resize(&self, asset_key: &str, width: u32, height: u32) -> GalleryResult<String> {
        Ok(self.derivatives.get_or_create(asset_key, width, height).await?)
    }

    pub fn derivative_stats(&self) -> DerivativeStats {
        self.derivatives.stats()
    }

    /// Download `term` and build its thumbnails in the background.
    ///
    /// Each image is thumbnailed as soon as it is stored, so polling
    /// [`Gallery::progress`] shows the collection filling in while the batch
    /// is still downloading. Await the handle for the final report.
    pub fn spawn_refresh(&self, term: &str) -> JoinHandle<GalleryResult<RefreshReport>> {
        let downloader = self.downloader.clone();
        let pipeline = self.pipeline.clone();
        let term = term.to_string();

        tokio::spawn(async move {
            let downloader = downloader.ok_or(GalleryError::NoDownloader)?;

            let (saved_tx, saved_rx) = mpsc::unbounded_channel();
            let follower = {
                let pipeline = pipeline.clone();
                let term = term.clone();
                tokio::spawn(async move { pipeline.follow(&term, saved_rx).await })
            };

            let download = downloader
                .download_with(&term, |key| {
                    // Fails only once a cancelled follower has stopped listening
                    let _ = saved_tx.send(key.to_string());
                })
                .await;
            drop(saved_tx);
            let thumbnails = follower.await.map_err(ThumbnailError::from)?;
            let download = download?;

            tracing::info!(
                term = %term,
                saved = download.saved.len(),
                thumbnails = thumbnails.generated.len(),
                "Refresh complete"
            );
            Ok::<_, GalleryError>(RefreshReport {
                download,
                thumbnails,
            })
        })
    }

    /// Generate missing thumbnails for every collection
    pub async fn warm_thumbnails(&self) -> GalleryResult<Vec<PipelineReport>> {
        Ok(self.pipeline.run_all().await?)
    }

    pub async fn build_archive(&self, collection: &str) -> GalleryResult<String> {
        Ok(collection_fetch::build_archive(self.storage.as_ref(), collection).await?)
    }
}
