use asset_storage::StorageError;
use collection_fetch::FetchError;
use thiserror::Error;
use thumbnail_cache::ThumbnailError;

pub type SelectionResult<T> = Result<T, SelectionError>;
pub type GalleryResult<T> = Result<T, GalleryError>;

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("collection {0:?} not found")]
    CollectionNotFound(String),

    #[error("no images available after {attempts} attempts")]
    NoImagesAvailable { attempts: u32 },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum GalleryError {
    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Thumbnail(#[from] ThumbnailError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Refresh requested on a gallery built without a downloader
    #[error("no image source configured")]
    NoDownloader,
}
