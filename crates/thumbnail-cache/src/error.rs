use asset_storage::StorageError;
use thiserror::Error;

pub type ThumbnailResult<T> = Result<T, ThumbnailError>;

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Source bytes are corrupt or in an unsupported format
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("failed to encode image: {0}")]
    Encode(#[source] image::ImageError),

    #[error("invalid target dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// A blocking image task panicked or was cancelled
    #[error("image task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
