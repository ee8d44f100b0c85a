use asset_storage::{LocalStorage, StorageBackend};
use async_trait::async_trait;
use collection_fetch::{Downloader, FetchResult, Fetcher, SearchProvider};
use gallery::{
    CollectionChoice, Gallery, GalleryError, SelectionConfig, SelectionError, ServeMode,
    ServeRequest, Served,
};
use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use thumbnail_cache::{content_digest, DerivativeConfig, ThumbnailConfig};
use tokio::sync::Notify;

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, 60, (y % 256) as u8]));
    let mut buffer = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .unwrap();
    buffer
}

async fn gallery_with(files: &[(&str, Vec<u8>)]) -> anyhow::Result<(TempDir, Gallery)> {
    let dir = tempfile::tempdir()?;
    let storage: Arc<dyn StorageBackend> = Arc::new(LocalStorage::new(dir.path())?);
    for (key, bytes) in files {
        storage.write(key, bytes).await?;
    }
    let gallery = Gallery::new(
        storage,
        ThumbnailConfig::default(),
        DerivativeConfig::default(),
        SelectionConfig { max_retries: 3 },
    );
    Ok((dir, gallery))
}

#[tokio::test]
async fn test_serve_bytes_and_reference() -> anyhow::Result<()> {
    let (_dir, gallery) = gallery_with(&[("alpaca/alpaca_001.png", png(400, 300))]).await?;

    let request = ServeRequest {
        width: 120,
        height: 80,
        choice: CollectionChoice::Pinned("alpaca".to_string()),
        mode: ServeMode::Bytes,
    };
    let Served::Bytes { key, bytes, etag } = gallery.serve(&request).await? else {
        panic!("expected bytes");
    };
    assert_eq!(key, "cache/alpaca_001_120x80.jpg");
    assert_eq!(etag, content_digest(&bytes));
    assert_eq!(image::load_from_memory(&bytes)?.dimensions(), (120, 80));

    let reference = gallery
        .serve(&ServeRequest {
            mode: ServeMode::Reference,
            choice: CollectionChoice::Random,
            ..request
        })
        .await?;
    assert_eq!(reference, Served::Reference { key });

    let stats = gallery.derivative_stats();
    assert_eq!(stats.computations, 1);
    assert_eq!(stats.hits, 1);
    Ok(())
}

#[tokio::test]
async fn test_serve_bytes_after_object_removed() -> anyhow::Result<()> {
    let (_dir, gallery) = gallery_with(&[("alpaca/alpaca_001.png", png(400, 300))]).await?;
    let request = ServeRequest {
        width: 64,
        height: 64,
        choice: CollectionChoice::Pinned("alpaca".to_string()),
        mode: ServeMode::Bytes,
    };

    let first = gallery.serve(&request).await?;
    // Evicted or cleaned up behind the index
    gallery.storage().delete(first.key()).await?;

    let Served::Bytes { key, bytes, .. } = gallery.serve(&request).await? else {
        panic!("expected bytes");
    };
    assert_eq!(key, first.key());
    assert_eq!(image::load_from_memory(&bytes)?.dimensions(), (64, 64));
    assert_eq!(gallery.derivative_stats().computations, 2);
    Ok(())
}

#[tokio::test]
async fn test_serve_errors() -> anyhow::Result<()> {
    let (_dir, gallery) = gallery_with(&[("alpaca/notes.txt", b"no images".to_vec())]).await?;

    let mut request = ServeRequest {
        width: 10,
        height: 10,
        choice: CollectionChoice::Random,
        mode: ServeMode::Reference,
    };
    let err = gallery.serve(&request).await.unwrap_err();
    assert!(matches!(
        err,
        GalleryError::Selection(SelectionError::NoImagesAvailable { attempts: 3 })
    ));

    request.choice = CollectionChoice::Pinned("zebra".to_string());
    let err = gallery.serve(&request).await.unwrap_err();
    assert!(matches!(err, GalleryError::Selection(SelectionError::CollectionNotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_listing_progress_and_archive() -> anyhow::Result<()> {
    let (_dir, gallery) = gallery_with(&[
        ("alpaca/alpaca_001.png", png(300, 200)),
        ("alpaca/alpaca_002.png", png(200, 300)),
        ("llama/llama_001.png", png(50, 50)),
    ])
    .await?;

    assert!(gallery.progress("alpaca").await?.is_empty());
    assert!(gallery.progress("unknown").await?.is_empty());

    let reports = gallery.warm_thumbnails().await?;
    assert_eq!(reports.len(), 2);
    // Serving a derivative must not turn the cache root into a collection
    gallery.resize("llama/llama_001.png", 20, 20).await?;

    assert_eq!(
        gallery.progress("alpaca").await?,
        vec!["alpaca/thumbnails/alpaca_001.jpg", "alpaca/thumbnails/alpaca_002.jpg"]
    );

    let listing = gallery.listing("alpaca").await?;
    assert_eq!(listing.asset_keys, vec!["alpaca/alpaca_001.png", "alpaca/alpaca_002.png"]);
    assert_eq!(listing.thumbnail_keys.len(), 2);
    assert_eq!(listing.archive_key, None);

    assert_eq!(gallery.build_archive("alpaca").await?, "alpaca.zip");
    assert_eq!(gallery.listing("alpaca").await?.archive_key.as_deref(), Some("alpaca.zip"));

    let names: Vec<String> = gallery
        .listings()
        .await?
        .into_iter()
        .map(|listing| listing.collection)
        .collect();
    assert_eq!(names, vec!["alpaca", "llama"]);
    Ok(())
}

struct FakeSearch;

#[async_trait]
impl SearchProvider for FakeSearch {
    async fn search(&self, _term: &str) -> FetchResult<Vec<String>> {
        Ok(vec!["wide".to_string(), "tall".to_string()])
    }
}

struct FakeFetcher;

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> FetchResult<Vec<u8>> {
        Ok(match url {
            "wide" => png(320, 160),
            _ => png(160, 320),
        })
    }
}

#[tokio::test]
async fn test_spawn_refresh_downloads_and_thumbnails() -> anyhow::Result<()> {
    let (_dir, gallery) = gallery_with(&[]).await?;
    let downloader = Downloader::new(
        gallery.storage().clone(),
        Arc::new(FakeSearch),
        Arc::new(FakeFetcher),
        2,
    );
    let gallery = gallery.with_downloader(downloader);

    let report = gallery.spawn_refresh("alpaca").await??;
    assert_eq!(report.download.saved.len(), 2);
    assert_eq!(report.thumbnails.generated.len(), 2);
    assert_eq!(gallery.progress("alpaca").await?.len(), 2);
    Ok(())
}

/// Serves every URL at once except "last", which waits for `release`
struct HeldFetcher {
    release: Arc<Notify>,
}

#[async_trait]
impl Fetcher for HeldFetcher {
    async fn fetch(&self, url: &str) -> FetchResult<Vec<u8>> {
        if url == "last" {
            self.release.notified().await;
        }
        Ok(png(200, 120))
    }
}

struct ThreeResults;

#[async_trait]
impl SearchProvider for ThreeResults {
    async fn search(&self, _term: &str) -> FetchResult<Vec<String>> {
        Ok(vec!["first".to_string(), "second".to_string(), "last".to_string()])
    }
}

#[tokio::test]
async fn test_thumbnails_visible_before_refresh_finishes() -> anyhow::Result<()> {
    let (_dir, gallery) = gallery_with(&[]).await?;
    let release = Arc::new(Notify::new());
    let downloader = Downloader::new(
        gallery.storage().clone(),
        Arc::new(ThreeResults),
        Arc::new(HeldFetcher {
            release: release.clone(),
        }),
        3,
    );
    let gallery = gallery.with_downloader(downloader);

    let handle = gallery.spawn_refresh("alpaca");

    let mut progress = Vec::new();
    for _ in 0..500 {
        progress = gallery.progress("alpaca").await?;
        if progress.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        progress,
        vec!["alpaca/thumbnails/alpaca_001.jpg", "alpaca/thumbnails/alpaca_002.jpg"]
    );
    assert!(!handle.is_finished());

    release.notify_one();
    let report = handle.await??;
    assert_eq!(report.download.saved.len(), 3);
    assert_eq!(report.thumbnails.generated.len(), 3);
    assert!(report.thumbnails.failed.is_empty());
    assert_eq!(gallery.progress("alpaca").await?.len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_refresh_without_downloader_fails() -> anyhow::Result<()> {
    let (_dir, gallery) = gallery_with(&[]).await?;
    let result = gallery.spawn_refresh("alpaca").await?;
    assert!(matches!(result, Err(GalleryError::NoDownloader)));
    Ok(())
}
