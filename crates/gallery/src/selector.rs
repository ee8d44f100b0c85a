//! Random asset selection with a bounded number of attempts

use crate::error::{SelectionError, SelectionResult};
use asset_storage::layout::{list_collection_assets, list_collections};
use asset_storage::StorageBackend;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which collection to draw from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionChoice {
    /// A random collection on every attempt
    Random,
    Pinned(String),
}

impl From<Option<String>> for CollectionChoice {
    fn from(collection: Option<String>) -> Self {
        match collection {
            Some(name) => CollectionChoice::Pinned(name),
            None => CollectionChoice::Random,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub max_retries: u32,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self { max_retries: 5 }
    }
}

pub struct RandomSelector {
    storage: Arc<dyn StorageBackend>,
    /// Top-level prefixes that are not collections
    excluded: Vec<String>,
    extensions: Vec<String>,
}

impl RandomSelector {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        excluded: Vec<String>,
        extensions: Vec<String>,
    ) -> Self {
        Self {
            storage,
            excluded,
            extensions,
        }
    }

    pub async fn collections(&self) -> SelectionResult<Vec<String>> {
        Ok(list_collections(self.storage.as_ref(), &self.excluded).await?)
    }

    pub async fn pick(
        &self,
        choice: &CollectionChoice,
        max_retries: u32,
    ) -> SelectionResult<String> {
        let mut rng = StdRng::from_entropy();
        self.pick_with_rng(choice, max_retries, &mut rng).await
    }

    /// Draw one asset, giving up after `max_retries` empty draws.
    pub async fn pick_with_rng<R: Rng + Send>(
        &self,
        choice: &CollectionChoice,
        max_retries: u32,
        rng: &mut R,
    ) -> SelectionResult<String> {
        let collections = self.collections().await?;
        if let CollectionChoice::Pinned(name) = choice {
            if !collections.contains(name) {
                return Err(SelectionError::CollectionNotFound(name.clone()));
            }
        }

        for attempt in 1..=max_retries {
            let collection = match choice {
                CollectionChoice::Pinned(name) => name,
                CollectionChoice::Random => match collections.choose(rng) {
                    Some(name) => name,
                    None => {
                        tracing::debug!(attempt, "No collections to choose from");
                        continue;
                    }
                },
            };

            let assets =
                list_collection_assets(self.storage.as_ref(), collection, &self.extensions).await?;
            if let Some(asset) = assets.choose(rng) {
                tracing::debug!(attempt, asset = %asset, "Picked asset");
                return Ok(asset.clone());
            }
            tracing::debug!(attempt, collection = %collection, "Collection has no images");
        }

        tracing::warn!(attempts = max_retries, "No images available");
        Err(SelectionError::NoImagesAvailable { attempts: max_retries })
    }
}
