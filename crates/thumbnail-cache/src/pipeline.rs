//! Bulk thumbnail generation for whole collections
//!
//! Each run lists a collection, skips assets whose thumbnail already exists,
//! and renders the rest in small chunks: sources are read from storage, the
//! chunk is decoded and resized in parallel with rayon on the blocking pool,
//! and the results are written back. A bad asset is logged and recorded; it
//! never stops the rest of the collection.

use crate::error::{ThumbnailError, ThumbnailResult};
use crate::generate::render_thumbnail;
use crate::ThumbnailConfig;
use asset_storage::layout::{
    default_image_extensions, has_extension_in, list_collection_assets, list_collections,
    thumbnail_key, validate_collection, validate_key,
};
use asset_storage::StorageBackend;
use rayon::prelude::*;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

/// Outcome of one pipeline run over a collection
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub collection: String,
    /// Thumbnail keys written by this run
    pub generated: Vec<String>,
    /// Assets whose thumbnail already existed
    pub skipped: usize,
    /// `(asset key, reason)` for every asset that could not be processed
    pub failed: Vec<(String, String)>,
    pub cancelled: bool,
}

impl PipelineReport {
    fn new(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            ..Self::default()
        }
    }

    fn record_failure(&mut self, asset: String, error: &ThumbnailError) {
        tracing::error!(asset = %asset, error = %error, "Failed to create thumbnail");
        self.failed.push((asset, error.to_string()));
    }
}

pub struct ThumbnailPipeline {
    storage: Arc<dyn StorageBackend>,
    config: ThumbnailConfig,
    /// Top-level prefixes that are not collections (e.g. the derivative cache)
    excluded: Vec<String>,
    cancel_flag: Arc<AtomicBool>,
}

impl ThumbnailPipeline {
    pub fn new(storage: Arc<dyn StorageBackend>, config: ThumbnailConfig) -> Self {
        Self {
            storage,
            config,
            excluded: Vec::new(),
            cancel_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Skip these top-level prefixes in [`ThumbnailPipeline::run_all`]
    pub fn excluding(mut self, prefixes: Vec<String>) -> Self {
        self.excluded = prefixes;
        self
    }

    pub fn config(&self) -> &ThumbnailConfig {
        &self.config
    }

    /// Stop running pipelines before their next chunk.
    ///
    /// Stays set until [`ThumbnailPipeline::resume`].
    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.cancel_flag.store(false, Ordering::Relaxed);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::Relaxed)
    }

    /// Generate missing thumbnails for one collection.
    ///
    /// Only a failure to list the collection is returned as an error.
    #[tracing::instrument(skip(self))]
    pub async fn run(&self, collection: &str) -> ThumbnailResult<PipelineReport> {
        validate_collection(collection)?;
        let assets =
            list_collection_assets(self.storage.as_ref(), collection, &default_image_extensions())
                .await?;

        let mut report = PipelineReport::new(collection);
        let mut pending = Vec::new();
        for asset in assets {
            let Some(thumbnail) = thumbnail_key(&asset) else {
                continue;
            };
            match self.storage.exists(&thumbnail).await {
                Ok(true) => {
                    tracing::debug!(thumbnail = %thumbnail, "Thumbnail exists, skipping");
                    report.skipped += 1;
                }
                Ok(false) => pending.push((asset, thumbnail)),
                Err(e) => report.record_failure(asset, &e.into()),
            }
        }

        for chunk in pending.chunks(self.config.chunk_size.max(1)) {
            if self.is_cancelled() {
                tracing::warn!(collection, "Thumbnail generation cancelled");
                report.cancelled = true;
                break;
            }
            self.process_chunk(chunk, &mut report).await;
        }

        tracing::info!(
            collection,
            generated = report.generated.len(),
            skipped = report.skipped,
            failed = report.failed.len(),
            "Thumbnail pipeline finished"
        );
        Ok(report)
    }

    async fn process_chunk(&self, chunk: &[(String, String)], report: &mut PipelineReport) {
        let mut sources = Vec::with_capacity(chunk.len());
        for (asset, thumbnail) in chunk {
            match self.storage.read(asset).await {
                Ok(bytes) => sources.push((asset.clone(), thumbnail.clone(), bytes)),
                Err(e) => report.record_failure(asset.clone(), &e.into()),
            }
        }
        if sources.is_empty() {
            return;
        }

        let in_flight: Vec<String> = sources.iter().map(|(asset, _, _)| asset.clone()).collect();
        let config = self.config.clone();
        let rendered = tokio::task::spawn_blocking(move || {
            sources
                .into_par_iter()
                .map(|(asset, thumbnail, bytes)| {
                    let result = render_thumbnail(&bytes, &config);
                    (asset, thumbnail, result)
                })
                .collect::<Vec<_>>()
        })
        .await;

        let rendered = match rendered {
            Ok(rendered) => rendered,
            Err(e) => {
                let error = ThumbnailError::from(e);
                for asset in in_flight {
                    report.record_failure(asset, &error);
                }
                return;
            }
        };

        for (asset, thumbnail, result) in rendered {
            let written = match result {
                Ok(encoded) => self
                    .storage
                    .write(&thumbnail, &encoded)
                    .await
                    .map_err(ThumbnailError::from),
                Err(e) => Err(e),
            };
            match written {
                Ok(()) => {
                    tracing::info!(thumbnail = %thumbnail, "Created thumbnail");
                    report.generated.push(thumbnail);
                }
                Err(e) => report.record_failure(asset, &e),
            }
        }
    }

    /// Thumbnail a single asset unless its thumbnail already exists.
    ///
    /// Returns the key written, or `None` when there was nothing to do.
    pub async fn generate_one(&self, asset_key: &str) -> ThumbnailResult<Option<String>> {
        validate_key(asset_key)?;
        let Some(thumbnail) = thumbnail_key(asset_key) else {
            return Ok(None);
        };
        if self.storage.exists(&thumbnail).await? {
            return Ok(None);
        }

        let source = self.storage.read(asset_key).await?;
        let config = self.config.clone();
        let encoded =
            tokio::task::spawn_blocking(move || render_thumbnail(&source, &config)).await??;
        self.storage.write(&thumbnail, &encoded).await?;
        tracing::info!(thumbnail = %thumbnail, "Created thumbnail");
        Ok(Some(thumbnail))
    }

    /// Thumbnail assets of `collection` as their keys arrive, until every
    /// sender is gone. A cancelled pipeline stops taking keys; whatever is
    /// left is picked up by the next [`ThumbnailPipeline::run`].
    #[tracing::instrument(skip(self, assets))]
    pub async fn follow(
        &self,
        collection: &str,
        mut assets: UnboundedReceiver<String>,
    ) -> PipelineReport {
        let extensions = default_image_extensions();
        let mut report = PipelineReport::new(collection);
        while let Some(asset) = assets.recv().await {
            if self.is_cancelled() {
                tracing::warn!(collection, "Thumbnail generation cancelled");
                report.cancelled = true;
                break;
            }
            if !has_extension_in(&asset, &extensions) {
                continue;
            }
            match self.generate_one(&asset).await {
                Ok(Some(thumbnail)) => report.generated.push(thumbnail),
                Ok(None) => report.skipped += 1,
                Err(e) => report.record_failure(asset, &e),
            }
        }
        report
    }

    /// Run the pipeline over every collection in the backend.
    ///
    /// A collection that cannot be listed is logged and skipped.
    pub async fn run_all(&self) -> ThumbnailResult<Vec<PipelineReport>> {
        let collections = list_collections(self.storage.as_ref(), &self.excluded).await?;
        let mut reports = Vec::with_capacity(collections.len());
        for collection in collections {
            if self.is_cancelled() {
                break;
            }
            match self.run(&collection).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    tracing::error!(collection = %collection, error = %e, "Skipping collection");
                }
            }
        }
        Ok(reports)
    }
}
