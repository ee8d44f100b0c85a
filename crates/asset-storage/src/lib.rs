//! Storage backends for imagehoard collections
//!
//! Every backend exposes the same key/bytes interface so the thumbnail
//! pipeline, the derivative cache and the random selector never need to know
//! whether images live in a local directory or in a bucket.
//!
//! # Backends
//!
//! - **Local**: a directory on disk, written through temp files that are
//!   renamed into place
//! - **Object store**: an S3 bucket, or a Backblaze B2 bucket through its
//!   S3-compatible endpoint
//!
//! Backends are selected once from a [`StorageConfig`] with [`open_backend`]
//! and shared as `Arc<dyn StorageBackend>`.

pub mod config;
pub mod error;
pub mod layout;
pub mod local;
pub mod migrate;
pub mod remote;

pub use config::{open_backend, RemoteSettings, StorageConfig};
pub use error::{StorageError, StorageResult};
pub use local::LocalStorage;
pub use migrate::{MigrationCoordinator, MigrationError, MigrationFailure, MigrationReport};
pub use remote::{ObjectStorage, RemoteProvider};

use async_trait::async_trait;
use futures::stream::BoxStream;

/// Lazy stream of keys produced by [`StorageBackend::list`]
pub type KeyStream<'a> = BoxStream<'a, StorageResult<String>>;

/// Uniform key/bytes interface over a storage location.
///
/// Keys are relative, `/`-separated paths (see [`layout`]).
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Backend tag used in logs and reports (`local`, `s3`, `b2`)
    fn name(&self) -> &str;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Read the whole object. Fails with [`StorageError::NotFound`] if absent.
    async fn read(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Create or overwrite an object, creating any missing parent prefixes.
    async fn write(&self, key: &str, data: &[u8]) -> StorageResult<()>;

    /// Every key starting with `prefix`. The stream is finite; it is not
    /// restartable, call `list` again to walk the keys a second time.
    fn list<'a>(&'a self, prefix: &'a str) -> KeyStream<'a>;

    async fn delete(&self, key: &str) -> StorageResult<()>;
}
