//! Filesystem backend rooted at a local directory.

use crate::layout::{validate_key, validate_prefix};
use crate::{KeyStream, StorageBackend, StorageError, StorageResult};
use async_stream::stream;
use async_trait::async_trait;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use tokio::fs;

/// Prefix of in-progress temp files; such files never appear in listings.
const TEMP_FILE_PREFIX: &str = ".imagehoard-";

/// Local directory backend.
///
/// Keys map onto paths below `root`. Writes go to a temp file in the target
/// directory which is renamed over the destination once fully written, so a
/// concurrent reader sees either the old object or the new one. The temp file
/// is removed when the write fails at any step.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Open a local backend, creating `root` if it does not exist yet.
    #[tracing::instrument(skip(root))]
    pub fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| StorageError::io(root.display().to_string(), e))?;

        tracing::info!(root = %root.display(), "Opened local storage");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        key.split('/').fold(self.root.clone(), |path, segment| path.join(segment))
    }

    /// Inverse of `path_for`; `None` for paths outside the root or non UTF-8 names.
    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(segment) => segments.push(segment.to_str()?),
                _ => return None,
            }
        }
        Some(segments.join("/"))
    }
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with(TEMP_FILE_PREFIX))
        .unwrap_or(false)
}

/// Write `data` to `path` through a temp file in the same directory.
///
/// `NamedTempFile` deletes itself on drop, which covers every early return.
fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "key has no parent directory")
    })?;
    std::fs::create_dir_all(parent)?;

    let mut temp = tempfile::Builder::new()
        .prefix(TEMP_FILE_PREFIX)
        .tempfile_in(parent)?;
    temp.write_all(data)?;
    temp.flush()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl StorageBackend for LocalStorage {
    fn name(&self) -> &str {
        "local"
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        match fs::metadata(self.path_for(key)).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io(key, e)),
        }
    }

    #[tracing::instrument(skip(self), fields(backend = "local"))]
    async fn read(&self, key: &str) -> StorageResult<Vec<u8>> {
        validate_key(key)?;
        fs::read(self.path_for(key)).await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::io(key, e)
            }
        })
    }

    #[tracing::instrument(skip(self, data), fields(backend = "local", size = data.len()))]
    async fn write(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        let path = self.path_for(key);
        let data = data.to_vec();

        tokio::task::spawn_blocking(move || write_atomic(&path, &data))
            .await
            .map_err(|e| StorageError::io(key, io::Error::other(e)))?
            .map_err(|e| StorageError::io(key, e))?;

        tracing::debug!(key, "Wrote local object");
        Ok(())
    }

    fn list<'a>(&'a self, prefix: &'a str) -> KeyStream<'a> {
        Box::pin(stream! {
            if let Err(e) = validate_prefix(prefix) {
                yield Err(e);
                return;
            }

            // Walk only the deepest directory the prefix fully names.
            let base = match prefix.rfind('/') {
                Some(end) => &prefix[..end],
                None => "",
            };
            let start = if base.is_empty() { self.root.clone() } else { self.path_for(base) };
            let mut pending = vec![start];

            while let Some(dir) = pending.pop() {
                let mut entries = match fs::read_dir(&dir).await {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                    Err(e) => {
                        yield Err(StorageError::io(self.key_for(&dir).unwrap_or_default(), e));
                        continue;
                    }
                };

                let mut files = Vec::new();
                let mut dirs = Vec::new();
                loop {
                    match entries.next_entry().await {
                        Ok(Some(entry)) => match entry.file_type().await {
                            Ok(file_type) if file_type.is_dir() => dirs.push(entry.path()),
                            Ok(file_type) if file_type.is_file() => files.push(entry.path()),
                            Ok(_) => {}
                            Err(e) => {
                                let key = self.key_for(&entry.path()).unwrap_or_default();
                                yield Err(StorageError::io(key, e));
                            }
                        },
                        Ok(None) => break,
                        Err(e) => {
                            yield Err(StorageError::io(self.key_for(&dir).unwrap_or_default(), e));
                            break;
                        }
                    }
                }

                files.sort();
                for path in files {
                    if is_temp_file(&path) {
                        continue;
                    }
                    if let Some(key) = self.key_for(&path) {
                        if key.starts_with(prefix) {
                            yield Ok(key);
                        }
                    }
                }

                // Reverse so the stack pops sub-directories in name order.
                dirs.sort();
                pending.extend(dirs.into_iter().rev());
            }
        })
    }

    #[tracing::instrument(skip(self), fields(backend = "local"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        fs::remove_file(self.path_for(key)).await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::io(key, e)
            }
        })?;

        tracing::debug!(key, "Deleted local object");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{StreamExt, TryStreamExt};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_write_creates_parents_and_overwrites() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let storage = LocalStorage::new(dir.path().join("root"))?;

        storage.write("alpaca/thumbnails/a.jpg", b"first").await?;
        assert!(dir.path().join("root/alpaca/thumbnails/a.jpg").is_file());
        assert_eq!(storage.read("alpaca/thumbnails/a.jpg").await?, b"first");

        storage.write("alpaca/thumbnails/a.jpg", b"second").await?;
        assert_eq!(storage.read("alpaca/thumbnails/a.jpg").await?, b"second");
        Ok(())
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let storage = LocalStorage::new(dir.path())?;

        let err = storage.read("alpaca/missing.jpg").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!storage.exists("alpaca/missing.jpg").await?);

        let err = storage.delete("alpaca/missing.jpg").await.unwrap_err();
        assert!(err.is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn test_exists_and_delete() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let storage = LocalStorage::new(dir.path())?;

        storage.write("alpaca/a.jpg", b"x").await?;
        assert!(storage.exists("alpaca/a.jpg").await?);
        // A directory is not an object
        assert!(!storage.exists("alpaca").await?);

        storage.delete("alpaca/a.jpg").await?;
        assert!(!storage.exists("alpaca/a.jpg").await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_list_walks_prefix_in_order() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let storage = LocalStorage::new(dir.path())?;

        for key in [
            "alpaca/b.jpg",
            "alpaca/a.jpg",
            "alpaca/thumbnails/a.jpg",
            "alpine/x.png",
            "cache/a_10x10.jpg",
            "alpaca.zip",
        ] {
            storage.write(key, b"data").await?;
        }

        let keys: Vec<String> = storage.list("alpaca/").try_collect().await?;
        assert_eq!(keys, vec!["alpaca/a.jpg", "alpaca/b.jpg", "alpaca/thumbnails/a.jpg"]);

        let keys: Vec<String> = storage.list("alp").try_collect().await?;
        assert_eq!(keys.len(), 5);
        assert!(keys.contains(&"alpaca.zip".to_string()));
        assert!(keys.contains(&"alpine/x.png".to_string()));

        let all: Vec<String> = storage.list("").try_collect().await?;
        assert_eq!(all.len(), 6);

        let none: Vec<String> = storage.list("missing/").try_collect().await?;
        assert!(none.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_list_skips_temp_files() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let storage = LocalStorage::new(dir.path())?;
        storage.write("alpaca/a.jpg", b"x").await?;
        std::fs::write(dir.path().join("alpaca").join(".imagehoard-abc123"), b"partial")?;

        let keys: Vec<String> = storage.list("").try_collect().await?;
        assert_eq!(keys, vec!["alpaca/a.jpg"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let storage = LocalStorage::new(dir.path().join("root"))?;

        let err = storage.write("../outside.jpg", b"x").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey { .. }));
        assert!(!dir.path().join("outside.jpg").exists());

        let listed: Vec<_> = storage.list("../").collect::<Vec<_>>().await;
        assert_eq!(listed.len(), 1);
        assert!(listed[0].is_err());
        Ok(())
    }
}
