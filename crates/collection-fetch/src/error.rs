use asset_storage::StorageError;
use thiserror::Error;

pub type FetchResult<T> = Result<T, FetchError>;

#[derive(Debug, Error)]
pub enum FetchError {
    /// The search API refused the request for exceeding its quota
    #[error("rate limited by {provider}")]
    RateLimited { provider: &'static str },

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("no access key configured for {provider}")]
    MissingAccessKey { provider: &'static str },

    #[error("search term {0:?} is not a valid collection name")]
    InvalidTerm(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to build archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("archive task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
