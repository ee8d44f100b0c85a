//! On-demand crop-to-fill derivatives
//!
//! The [`DerivativeCache`] maps `(asset, width, height)` to the storage key of
//! an exactly sized JPEG. Lookups go through a bounded LRU index first; a miss
//! takes a gate on the derivative's storage path so concurrent requests for the
//! same derivative render it once, while other paths keep running in parallel.

use crate::error::{ThumbnailError, ThumbnailResult};
use crate::generate::render_crop_to_fill;
use crate::DerivativeConfig;
use asset_storage::layout::{derivative_key, validate_key};
use asset_storage::{StorageBackend, StorageError};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identity of one derivative
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DerivativeKey {
    pub asset_key: String,
    pub width: u32,
    pub height: u32,
}

impl DerivativeKey {
    pub fn new(asset_key: &str, width: u32, height: u32) -> Self {
        Self {
            asset_key: asset_key.to_string(),
            width,
            height,
        }
    }
}

/// Counters for monitoring the cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DerivativeStats {
    pub hits: u64,
    pub computations: u64,
    /// Derivatives found in storage on an index miss and reused as-is
    pub adoptions: u64,
    pub evictions: u64,
    pub entries: usize,
}

type Gate = Arc<tokio::sync::Mutex<()>>;

/// A caller's share of the gate for one derivative path.
///
/// Dropping the last share removes the gate from the in-flight map, so a
/// future cancelled while waiting or rendering leaves nothing behind.
struct GateShare<'a> {
    cache: &'a DerivativeCache,
    path: String,
    gate: Gate,
}

impl Drop for GateShare<'_> {
    fn drop(&mut self) {
        let mut inflight = self.cache.inflight.lock();
        if let Some(current) = inflight.get(&self.path) {
            // Only the map and this share hold it, nobody is waiting
            if Arc::ptr_eq(current, &self.gate) && Arc::strong_count(&self.gate) <= 2 {
                inflight.remove(&self.path);
            }
        }
    }
}

pub struct DerivativeCache {
    storage: Arc<dyn StorageBackend>,
    config: DerivativeConfig,
    /// Each storage path is owned by at most one key
    index: Mutex<LruCache<DerivativeKey, String>>,
    /// Gates keyed by storage path, so keys that share a path also serialize
    inflight: Mutex<HashMap<String, Gate>>,
    hits: AtomicU64,
    computations: AtomicU64,
    adoptions: AtomicU64,
    evictions: AtomicU64,
}

impl DerivativeCache {
    pub fn new(storage: Arc<dyn StorageBackend>, config: DerivativeConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            storage,
            config,
            index: Mutex::new(LruCache::new(capacity)),
            inflight: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            computations: AtomicU64::new(0),
            adoptions: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn cache_root(&self) -> &str {
        &self.config.cache_root
    }

    /// Storage key of the `width` x `height` derivative of `asset_key`,
    /// rendering and persisting it on first request.
    #[tracing::instrument(skip(self))]
    pub async fn get_or_create(
        &self,
        asset_key: &str,
        width: u32,
        height: u32,
    ) -> ThumbnailResult<String> {
        if width == 0 || height == 0 {
            return Err(ThumbnailError::InvalidDimensions { width, height });
        }
        validate_key(asset_key)?;

        let key = DerivativeKey::new(asset_key, width, height);
        if let Some(path) = self.lookup(&key) {
            return Ok(path);
        }

        let path = derivative_key(&self.config.cache_root, asset_key, width, height);
        let share = self.gate(&path);
        let _locked = share.gate.lock().await;
        // Another caller may have finished while we waited
        if let Some(path) = self.lookup(&key) {
            return Ok(path);
        }
        self.create(&key, path).await
    }

    /// [`DerivativeCache::get_or_create`] followed by a read of the object.
    ///
    /// An object that disappears between the two steps, e.g. evicted by a
    /// concurrent request, is rendered once more.
    pub async fn get_or_create_bytes(
        &self,
        asset_key: &str,
        width: u32,
        height: u32,
    ) -> ThumbnailResult<(String, Vec<u8>)> {
        let path = self.get_or_create(asset_key, width, height).await?;
        match self.storage.read(&path).await {
            Ok(bytes) => return Ok((path, bytes)),
            Err(StorageError::NotFound(_)) => {
                tracing::debug!(path = %path, "Derivative vanished before it was read, recreating");
                self.forget(&DerivativeKey::new(asset_key, width, height), &path);
            }
            Err(e) => return Err(e.into()),
        }

        let path = self.get_or_create(asset_key, width, height).await?;
        let bytes = self.storage.read(&path).await?;
        Ok((path, bytes))
    }

    /// Index lookup that counts hits and refreshes recency
    fn lookup(&self, key: &DerivativeKey) -> Option<String> {
        let path = self.index.lock().get(key).cloned()?;
        self.hits.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(path = %path, "Derivative cache hit");
        Some(path)
    }

    fn forget(&self, key: &DerivativeKey, path: &str) {
        let mut index = self.index.lock();
        if index.peek(key).is_some_and(|indexed| indexed == path) {
            index.pop(key);
        }
    }

    /// Key currently indexed at `path`, other than `key`
    fn owner_of(&self, path: &str, key: &DerivativeKey) -> Option<DerivativeKey> {
        self.index
            .lock()
            .iter()
            .find(|(owner, indexed)| indexed.as_str() == path && *owner != key)
            .map(|(owner, _)| owner.clone())
    }

    fn gate(&self, path: &str) -> GateShare<'_> {
        let gate = self.inflight.lock().entry(path.to_string()).or_default().clone();
        GateShare {
            cache: self,
            path: path.to_string(),
            gate,
        }
    }

    async fn create(&self, key: &DerivativeKey, path: String) -> ThumbnailResult<String> {
        if let Some(owner) = self.owner_of(&path, key) {
            // Same stem in another collection: the object holds the owner's pixels
            tracing::warn!(
                path = %path,
                asset = %key.asset_key,
                owner = %owner.asset_key,
                "Derivative path shared with another asset, re-rendering"
            );
            self.index.lock().pop(&owner);
        } else if self.storage.exists(&path).await? {
            tracing::info!(path = %path, "Adopting existing derivative");
            self.adoptions.fetch_add(1, Ordering::Relaxed);
            self.remember(key.clone(), path.clone()).await;
            return Ok(path);
        }

        let source = self.storage.read(&key.asset_key).await?;
        let (width, height, quality) = (key.width, key.height, self.config.quality);
        let encoded = tokio::task::spawn_blocking(move || {
            render_crop_to_fill(&source, width, height, quality)
        })
        .await??;

        self.storage.write(&path, &encoded).await?;
        self.computations.fetch_add(1, Ordering::Relaxed);
        tracing::info!(path = %path, size = encoded.len(), "Created derivative");

        self.remember(key.clone(), path.clone()).await;
        Ok(path)
    }

    /// Insert into the index and delete whatever the LRU pushed out
    async fn remember(&self, key: DerivativeKey, path: String) {
        let evicted = match self.index.lock().push(key.clone(), path) {
            Some((old_key, old_path)) if old_key != key => Some((old_key, old_path)),
            _ => None,
        };

        let Some((old_key, old_path)) = evicted else {
            return;
        };
        self.evictions.fetch_add(1, Ordering::Relaxed);
        match self.storage.delete(&old_path).await {
            Ok(()) => {
                tracing::info!(asset = %old_key.asset_key, path = %old_path, "Evicted derivative")
            }
            Err(e) => {
                tracing::warn!(path = %old_path, error = %e, "Failed to delete evicted derivative")
            }
        }
    }

    pub fn stats(&self) -> DerivativeStats {
        DerivativeStats {
            hits: self.hits.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
            adoptions: self.adoptions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.index.lock().len(),
        }
    }
}
