//! Zip archives of whole collections

use crate::error::FetchResult;
use asset_storage::layout::{
    archive_key, default_image_extensions, file_name, list_collection_assets, validate_collection,
};
use asset_storage::StorageBackend;
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Bundle every asset of `collection` (thumbnails excluded) into
/// `<collection>.zip` at the storage root, returning the archive key.
#[tracing::instrument(skip(storage))]
pub async fn build_archive(storage: &dyn StorageBackend, collection: &str) -> FetchResult<String> {
    validate_collection(collection)?;
    let assets = list_collection_assets(storage, collection, &default_image_extensions()).await?;

    let mut entries = Vec::with_capacity(assets.len());
    for key in &assets {
        let bytes = storage.read(key).await?;
        entries.push((file_name(key).to_string(), bytes));
    }

    // JPEGs don't shrink under deflate, store them as-is
    let archive = tokio::task::spawn_blocking(move || -> FetchResult<Vec<u8>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for (name, bytes) in entries {
            writer.start_file(name, options)?;
            writer.write_all(&bytes).map_err(zip::result::ZipError::from)?;
        }
        Ok(writer.finish()?.into_inner())
    })
    .await??;

    let key = archive_key(collection);
    storage.write(&key, &archive).await?;
    tracing::info!(
        collection,
        key = %key,
        files = assets.len(),
        size = archive.len(),
        "Created archive"
    );
    Ok(key)
}
