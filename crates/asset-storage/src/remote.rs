//! Object-store backend (S3, or Backblaze B2 through its S3-compatible API)

use crate::config::RemoteSettings;
use crate::layout::{validate_key, validate_prefix};
use crate::{KeyStream, StorageBackend, StorageError, StorageResult};
use async_stream::stream;
use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes providers return when the access key or signature is rejected
const CREDENTIAL_ERROR_CODES: &[&str] = &[
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
    "AccessDenied",
    "InvalidToken",
    "ExpiredToken",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteProvider {
    S3,
    B2,
}

impl RemoteProvider {
    /// Endpoint to use when the settings do not name one explicitly
    fn default_endpoint(&self, region: &str) -> Option<String> {
        match self {
            RemoteProvider::S3 => None,
            RemoteProvider::B2 => Some(format!("https://s3.{}.backblazeb2.com", region)),
        }
    }
}

impl fmt::Display for RemoteProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteProvider::S3 => write!(f, "s3"),
            RemoteProvider::B2 => write!(f, "b2"),
        }
    }
}

/// Bucket-backed storage.
///
/// Construction never fails: without an access key and secret the backend is
/// still created, and every operation reports [`StorageError::Credentials`].
pub struct ObjectStorage {
    provider: RemoteProvider,
    bucket: String,
    client: Option<Client>,
}

impl ObjectStorage {
    pub fn new(provider: RemoteProvider, settings: &RemoteSettings) -> Self {
        let client = match (settings.access_key.as_deref(), settings.secret_key.as_deref()) {
            (Some(access_key), Some(secret_key))
                if !access_key.is_empty() && !secret_key.is_empty() =>
            {
                let credentials =
                    Credentials::new(access_key, secret_key, None, None, "imagehoard");
                let mut builder = aws_sdk_s3::config::Builder::new()
                    .behavior_version(BehaviorVersion::latest())
                    .region(Region::new(settings.region.clone()))
                    .credentials_provider(credentials);

                let endpoint = settings
                    .endpoint
                    .clone()
                    .or_else(|| provider.default_endpoint(&settings.region));
                if let Some(endpoint) = endpoint {
                    builder = builder.endpoint_url(endpoint).force_path_style(true);
                }
                Some(Client::from_conf(builder.build()))
            }
            _ => {
                tracing::warn!(
                    provider = %provider,
                    bucket = %settings.bucket,
                    "No credentials configured; every request to this bucket will fail"
                );
                None
            }
        };

        Self {
            provider,
            bucket: settings.bucket.clone(),
            client,
        }
    }

    pub fn provider(&self) -> RemoteProvider {
        self.provider
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn client(&self) -> StorageResult<&Client> {
        self.client.as_ref().ok_or_else(|| StorageError::Credentials {
            backend: self.provider.to_string(),
            message: "access key and secret are not configured".to_string(),
        })
    }

    /// Map an SDK failure onto the storage taxonomy.
    fn classify<E>(&self, key: &str, err: SdkError<E, HttpResponse>) -> StorageError
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    {
        let status = err.raw_response().map(|response| response.status().as_u16());
        let code = err.as_service_error().and_then(|service| service.code()).map(str::to_string);
        let message = describe(&err, status);

        let rejected_credentials = matches!(status, Some(401) | Some(403))
            || code
                .as_deref()
                .map(|code| CREDENTIAL_ERROR_CODES.contains(&code))
                .unwrap_or(false);

        if rejected_credentials {
            StorageError::Credentials {
                backend: self.provider.to_string(),
                message,
            }
        } else if status == Some(404)
            || matches!(code.as_deref(), Some("NoSuchKey") | Some("NotFound"))
        {
            StorageError::NotFound(key.to_string())
        } else {
            StorageError::Remote {
                backend: self.provider.to_string(),
                key: key.to_string(),
                message,
            }
        }
    }
}

/// Short error text: the service's code and message, never the raw response
fn describe<E>(err: &SdkError<E, HttpResponse>, status: Option<u16>) -> String
where
    E: ProvideErrorMetadata,
{
    let service = err.as_service_error();
    match (
        service.and_then(|e| e.code()),
        service.and_then(|e| e.message()),
    ) {
        (Some(code), Some(message)) => format!("{}: {}", code, message),
        (Some(code), None) => code.to_string(),
        _ => match status {
            Some(status) => format!("HTTP {}", status),
            None => err.to_string(),
        },
    }
}

impl fmt::Debug for ObjectStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStorage")
            .field("provider", &self.provider)
            .field("bucket", &self.bucket)
            .field("has_credentials", &self.client.is_some())
            .finish()
    }
}

#[async_trait]
impl StorageBackend for ObjectStorage {
    fn name(&self) -> &str {
        match self.provider {
            RemoteProvider::S3 => "s3",
            RemoteProvider::B2 => "b2",
        }
    }

    #[tracing::instrument(skip(self))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        let client = self.client()?;
        match client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                if err.as_service_error().map(|e| e.is_not_found()).unwrap_or(false) {
                    return Ok(false);
                }
                match self.classify(key, err) {
                    StorageError::NotFound(_) => Ok(false),
                    other => Err(other),
                }
            }
        }
    }

    #[tracing::instrument(skip(self))]
    async fn read(&self, key: &str) -> StorageResult<Vec<u8>> {
        validate_key(key)?;
        let client = self.client()?;
        let response = client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if err.as_service_error().map(|e| e.is_no_such_key()).unwrap_or(false) {
                    StorageError::NotFound(key.to_string())
                } else {
                    self.classify(key, err)
                }
            })?;

        let body = response.body.collect().await.map_err(|e| StorageError::Remote {
            backend: self.provider.to_string(),
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(body.into_bytes().to_vec())
    }

    #[tracing::instrument(skip(self, data), fields(size = data.len()))]
    async fn write(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        let client = self.client()?;
        client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|err| self.classify(key, err))?;

        tracing::debug!(key, "Uploaded object");
        Ok(())
    }

    fn list<'a>(&'a self, prefix: &'a str) -> KeyStream<'a> {
        Box::pin(stream! {
            if let Err(e) = validate_prefix(prefix) {
                yield Err(e);
                return;
            }
            let client = match self.client() {
                Ok(client) => client,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            // One page is requested each time the previous one is drained.
            let mut continuation: Option<String> = None;
            loop {
                let page = client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .prefix(prefix)
                    .set_continuation_token(continuation.take())
                    .send()
                    .await;
                let page = match page {
                    Ok(page) => page,
                    Err(err) => {
                        yield Err(self.classify(prefix, err));
                        return;
                    }
                };

                for object in page.contents() {
                    if let Some(key) = object.key() {
                        yield Ok(key.to_string());
                    }
                }

                match page.next_continuation_token() {
                    Some(token) if page.is_truncated().unwrap_or(false) => {
                        continuation = Some(token.to_string());
                    }
                    _ => break,
                }
            }
        })
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        let client = self.client()?;
        client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| self.classify(key, err))?;

        tracing::debug!(key, "Deleted object");
        Ok(())
    }
}
