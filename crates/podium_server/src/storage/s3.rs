//! S3 (or S3-compatible) primary storage.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_smithy_types::byte_stream::ByteStream;
use tracing::{debug, info, warn};

use super::{Body, Storage, content_type_for};
use crate::config::S3Config;

/// Objects in one S3 bucket.
#[derive(Clone)]
pub struct S3Disk {
    client: Client,
    config: S3Config,
}

impl S3Disk {
    /// Build a client from the configuration.
    ///
    /// Explicit credentials win over the default provider chain.
    pub async fn connect(config: S3Config) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(config.region.clone()));

        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            loader = loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
                access_key, secret_key, None, None, "podium",
            ));
        }

        let sdk_config = loader.load().await;
        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config);

        // Use custom endpoint if provided (for MinIO, etc.)
        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder
                .endpoint_url(endpoint)
                .force_path_style(true);
        }

        info!(
            "S3 storage: bucket {} in {}{}",
            config.bucket,
            config.region,
            config
                .endpoint
                .as_deref()
                .map(|e| format!(" via {}", e))
                .unwrap_or_default()
        );

        Self {
            client: Client::from_conf(s3_config_builder.build()),
            config,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }
}

#[async_trait]
impl Storage for S3Disk {
    fn name(&self) -> &str {
        "s3"
    }

    async fn exists(&self, path: &str) -> bool {
        self.client
            .head_object()
            .bucket(self.bucket())
            .key(path)
            .send()
            .await
            .is_ok()
    }

    async fn put(&self, path: &str, body: Body) -> bool {
        let stream = match body {
            Body::Bytes(bytes) => ByteStream::from(bytes),
            Body::File(source) => match ByteStream::from_path(&source).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to open {:?} for S3 upload: {}", source, e);
                    return false;
                }
            },
        };

        let content_type = content_type_for(path);
        let mut request = self
            .client
            .put_object()
            .bucket(self.bucket())
            .key(path)
            .body(stream);
        if let Some(content_type) = content_type {
            request = request.content_type(content_type);
        }

        match request.send().await {
            Ok(_) => {
                debug!("Stored {} in bucket {}", path, self.bucket());
                true
            }
            Err(e) => {
                warn!("S3 upload of {} failed: {}", path, e);
                false
            }
        }
    }

    async fn delete(&self, path: &str) -> bool {
        match self
            .client
            .delete_object()
            .bucket(self.bucket())
            .key(path)
            .send()
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!("S3 delete of {} failed: {}", path, e);
                false
            }
        }
    }

    fn url(&self, path: &str) -> String {
        self.config.object_url(path)
    }
}
