//! Key layout shared by every backend
//!
//! ```text
//! <collection>/<asset files>
//! <collection>/thumbnails/<asset-stem>.jpg
//! <collection>.zip
//! <cache-root>/<asset-stem>_<width>x<height>.jpg
//! ```
//!
//! Keys are always `/`-separated and relative to the backend root, so the
//! same tree can be copied between a local directory and a bucket unchanged.

use crate::{StorageBackend, StorageError, StorageResult};
use futures::StreamExt;
use std::collections::BTreeSet;

/// Extensions recognized as source images (compared case-insensitively)
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp"];

/// Sub-directory of a collection holding its thumbnails
pub const THUMBNAIL_DIR: &str = "thumbnails";

/// Extension used for every generated image (thumbnails and derivatives)
pub const GENERATED_EXTENSION: &str = "jpg";

/// Reject keys that could escape the backend root or produce ambiguous paths.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let reason = if key.is_empty() {
        Some("key is empty")
    } else if key.starts_with('/') || key.contains('\\') {
        Some("key must be relative and `/`-separated")
    } else if key.ends_with('/') {
        Some("key must name an object, not a prefix")
    } else if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        Some("key contains an empty or relative segment")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StorageError::InvalidKey {
            key: key.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Same rules as [`validate_key`], but an empty prefix or a trailing `/` is allowed.
pub fn validate_prefix(prefix: &str) -> StorageResult<()> {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        if prefix.is_empty() {
            return Ok(());
        }
        return Err(StorageError::InvalidKey {
            key: prefix.to_string(),
            reason: "prefix must be relative",
        });
    }
    validate_key(trimmed)
}

/// Collection names become directory names, so they must be a single segment.
pub fn validate_collection(name: &str) -> StorageResult<()> {
    validate_key(name)?;
    if name.contains('/') || name == THUMBNAIL_DIR || name.ends_with(".zip") {
        return Err(StorageError::InvalidKey {
            key: name.to_string(),
            reason: "collection name must be a single plain segment",
        });
    }
    Ok(())
}

pub fn has_image_extension(key: &str) -> bool {
    extension(key)
        .map(|ext| IMAGE_EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

pub fn has_extension_in(key: &str, extensions: &[String]) -> bool {
    extension(key)
        .map(|ext| extensions.iter().any(|known| known.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

fn extension(key: &str) -> Option<&str> {
    let name = file_name(key);
    name.rsplit_once('.')
        .filter(|(stem, _)| !stem.is_empty())
        .map(|(_, ext)| ext)
}

pub fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// File name without its final extension (`alpaca/alpaca_001.jpg` -> `alpaca_001`)
pub fn file_stem(key: &str) -> &str {
    let name = file_name(key);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

pub fn collection_prefix(collection: &str) -> String {
    format!("{}/", collection)
}

/// Split a key into `(collection, file)` when it names a file directly inside a collection.
pub fn split_collection_asset(key: &str) -> Option<(&str, &str)> {
    let (collection, file) = key.split_once('/')?;
    if collection.is_empty() || file.is_empty() || file.contains('/') {
        return None;
    }
    Some((collection, file))
}

/// Thumbnail key for an asset stored directly inside a collection.
pub fn thumbnail_key(asset_key: &str) -> Option<String> {
    let (collection, _) = split_collection_asset(asset_key)?;
    Some(format!(
        "{}/{}/{}.{}",
        collection,
        THUMBNAIL_DIR,
        file_stem(asset_key),
        GENERATED_EXTENSION
    ))
}

pub fn thumbnail_prefix(collection: &str) -> String {
    format!("{}/{}/", collection, THUMBNAIL_DIR)
}

pub fn archive_key(collection: &str) -> String {
    format!("{}.zip", collection)
}

pub fn derivative_key(cache_root: &str, asset_key: &str, width: u32, height: u32) -> String {
    let cache_root = cache_root.trim_matches('/');
    let name = format!(
        "{}_{}x{}.{}",
        file_stem(asset_key),
        width,
        height,
        GENERATED_EXTENSION
    );
    if cache_root.is_empty() {
        name
    } else {
        format!("{}/{}", cache_root, name)
    }
}

/// Names of every collection, i.e. every top-level directory except `excluded` ones.
pub async fn list_collections(
    storage: &dyn StorageBackend,
    excluded: &[String],
) -> StorageResult<Vec<String>> {
    let mut collections = BTreeSet::new();
    let mut keys = storage.list("");
    while let Some(key) = keys.next().await {
        let key = key?;
        if let Some((top, _)) = key.split_once('/') {
            if !excluded.iter().any(|skip| skip.trim_matches('/') == top) {
                collections.insert(top.to_string());
            }
        }
    }
    Ok(collections.into_iter().collect())
}

/// Source assets stored directly inside a collection (thumbnails excluded), sorted.
pub async fn list_collection_assets(
    storage: &dyn StorageBackend,
    collection: &str,
    extensions: &[String],
) -> StorageResult<Vec<String>> {
    let prefix = collection_prefix(collection);
    let mut assets = Vec::new();
    let mut keys = storage.list(&prefix);
    while let Some(key) = keys.next().await {
        let key = key?;
        if split_collection_asset(&key).is_some() && has_extension_in(&key, extensions) {
            assets.push(key);
        }
    }
    assets.sort();
    Ok(assets)
}

pub async fn list_thumbnails(
    storage: &dyn StorageBackend,
    collection: &str,
) -> StorageResult<Vec<String>> {
    let prefix = thumbnail_prefix(collection);
    let mut thumbnails = Vec::new();
    let mut keys = storage.list(&prefix);
    while let Some(key) = keys.next().await {
        let key = key?;
        if key[prefix.len()..].contains('/') {
            continue;
        }
        thumbnails.push(key);
    }
    thumbnails.sort();
    Ok(thumbnails)
}

/// Default extension list as owned strings, for configs that allow overriding it
pub fn default_image_extensions() -> Vec<String> {
    IMAGE_EXTENSIONS.iter().map(|ext| ext.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_validation() {
        assert!(validate_key("alpaca/alpaca_001.jpg").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("alpaca/../secrets").is_err());
        assert!(validate_key("alpaca//x.jpg").is_err());
        assert!(validate_key("alpaca/").is_err());
        assert!(validate_key("a\\b.jpg").is_err());

        assert!(validate_prefix("").is_ok());
        assert!(validate_prefix("alpaca/").is_ok());
        assert!(validate_prefix("/").is_err());
        assert!(validate_prefix("../").is_err());
    }

    #[test]
    fn test_collection_names() {
        assert!(validate_collection("alpaca").is_ok());
        assert!(validate_collection("red panda").is_ok());
        assert!(validate_collection("a/b").is_err());
        assert!(validate_collection("thumbnails").is_err());
        assert!(validate_collection("..").is_err());
    }

    #[test]
    fn test_extension_matching() {
        assert!(has_image_extension("alpaca/alpaca_001.jpg"));
        assert!(has_image_extension("alpaca/IMG.JPEG"));
        assert!(has_image_extension("alpaca/x.webp"));
        assert!(!has_image_extension("alpaca/notes.txt"));
        assert!(!has_image_extension("alpaca/.jpg"));
        assert!(!has_image_extension("alpaca/noext"));

        let only_png = vec!["png".to_string()];
        assert!(has_extension_in("a/b.PNG", &only_png));
        assert!(!has_extension_in("a/b.jpg", &only_png));
    }

    #[test]
    fn test_layout_keys() {
        assert_eq!(file_stem("alpaca/alpaca_001.jpg"), "alpaca_001");
        assert_eq!(file_stem("alpaca/archive.tar.gz"), "archive.tar");
        assert_eq!(
            thumbnail_key("alpaca/alpaca_001.png").as_deref(),
            Some("alpaca/thumbnails/alpaca_001.jpg")
        );
        assert_eq!(thumbnail_key("alpaca/thumbnails/alpaca_001.jpg"), None);
        assert_eq!(thumbnail_key("loose.jpg"), None);
        assert_eq!(archive_key("alpaca"), "alpaca.zip");
        assert_eq!(
            derivative_key("cache", "alpaca/alpaca_001.jpg", 120, 80),
            "cache/alpaca_001_120x80.jpg"
        );
        assert_eq!(
            derivative_key("/cache/", "alpaca/alpaca_001.jpg", 1, 2),
            "cache/alpaca_001_1x2.jpg"
        );
        assert_eq!(derivative_key("", "a/b.png", 3, 4), "b_3x4.jpg");
    }

    #[test]
    fn test_split_collection_asset() {
        assert_eq!(
            split_collection_asset("alpaca/alpaca_001.jpg"),
            Some(("alpaca", "alpaca_001.jpg"))
        );
        assert_eq!(split_collection_asset("alpaca/thumbnails/x.jpg"), None);
        assert_eq!(split_collection_asset("alpaca.zip"), None);
    }
}
