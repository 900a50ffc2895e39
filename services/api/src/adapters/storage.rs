//! services/api/src/adapters/storage.rs
//!
//! S3-compatible implementation of the `ArtifactStore` port. Page images,
//! synthesized audio, and alignment JSON all live in one bucket under the
//! key prefixes defined in `readalong_core::content`.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::SdkError,
    operation::get_object::GetObjectError,
    primitives::ByteStream as S3ByteStream,
    Client,
};
use futures::StreamExt;
use readalong_core::content;
use readalong_core::ports::{ArtifactStore, ByteStream, PortError, PortResult};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::config::StorageConfig;
use crate::retry;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An artifact store backed by any S3-compatible endpoint (MinIO included).
#[derive(Clone)]
pub struct S3ArtifactStore {
    client: Client,
    bucket: String,
    /// Origin prepended to `/objects/<key>` when minting URIs.
    public_base_url: String,
}

impl S3ArtifactStore {
    /// Creates a new store from configuration and verifies the bucket.
    pub async fn new(config: &StorageConfig, public_base_url: &str) -> PortResult<Self> {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "readalong",
        );

        let region = config
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint)
            .region(Region::new(region))
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO and other S3-compatible services
            .build();

        let client = Client::from_conf(s3_config);

        let bucket = config.bucket.clone();
        match client.head_bucket().bucket(&bucket).send().await {
            Ok(_) => {
                info!("Connected to S3 bucket: {}", bucket);
            }
            Err(e) => {
                warn!(
                    "Could not verify bucket {}: {}. Will attempt operations anyway.",
                    bucket, e
                );
            }
        }

        Ok(Self {
            client,
            bucket,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn uri_for_key(&self, key: &str) -> String {
        format!("{}{}{}", self.public_base_url, content::OBJECTS_MOUNT, key)
    }

    /// Missing keys surface as `NotFound`; everything else (network
    /// hiccups, 5xx from the backend) is retryable from the caller's
    /// point of view.
    fn classify_get(key: &str, err: SdkError<GetObjectError>) -> PortError {
        let service_err = err.into_service_error();
        if service_err.is_no_such_key() {
            PortError::NotFound(format!("Object {} not found", key))
        } else {
            PortError::Transient(format!("Storage error for {}: {}", key, service_err))
        }
    }
}

//=========================================================================================
// `ArtifactStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    fn uri_for(&self, key: &str) -> String {
        self.uri_for_key(key)
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> PortResult<String> {
        retry::with_backoff("storage put", || {
            let body = S3ByteStream::from(bytes.clone());
            async move {
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .content_type(content_type)
                    .body(body)
                    .send()
                    .await
                    .map_err(|e| {
                        PortError::Transient(format!("Failed to store {}: {}", key, e))
                    })?;
                Ok(())
            }
        })
        .await?;
        Ok(self.uri_for_key(key))
    }

    async fn get_bytes(&self, key: &str) -> PortResult<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Self::classify_get(key, e))?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| PortError::Transient(format!("Failed to read object body: {}", e)))?
            .into_bytes()
            .to_vec();
        Ok(data)
    }

    async fn exists(&self, key: &str) -> PortResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_err = e.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(PortError::Transient(format!(
                        "Storage error for {}: {}",
                        key, service_err
                    )))
                }
            }
        }
    }

    async fn open_stream(&self, key: &str) -> PortResult<ByteStream> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Self::classify_get(key, e))?;

        let reader = response.body.into_async_read();
        let stream = ReaderStream::new(reader)
            .map(|chunk| chunk.map_err(|e| PortError::Transient(e.to_string())));
        Ok(Box::pin(stream))
    }

    async fn delete(&self, key: &str) -> PortResult<()> {
        if let Err(e) = self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            // Deletions are best-effort; the caller never sees the failure.
            warn!("Best-effort delete of {} failed: {}", key, e);
        }
        Ok(())
    }
}
