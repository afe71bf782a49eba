//! S3 upload/download operations using static credentials.

use crate::config::CloudConfig;
use crate::error::{CloudError, CloudResult};
use crate::transport::{BlobTransport, RemoteBlob};
use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::primitives::ByteStream;
use tracing::debug;
use uuid::Uuid;

/// S3 transport for encrypted backup blobs.
pub struct S3Transport {
    client: S3Client,
    config: CloudConfig,
}

impl S3Transport {
    pub fn new(config: CloudConfig) -> CloudResult<Self> {
        config.validate()?;
        let client = Self::build_client(&config);
        Ok(Self { client, config })
    }

    fn build_client(config: &CloudConfig) -> S3Client {
        let credentials = aws_credential_types::Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "docvault-static",
        );

        let mut config_builder = aws_sdk_s3::Config::builder()
            .region(aws_types::region::Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .behavior_version_latest();

        if let Some(ref endpoint) = config.endpoint_override {
            config_builder = config_builder
                .endpoint_url(endpoint)
                .force_path_style(true);
        }

        S3Client::from_conf(config_builder.build())
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }
}

#[async_trait]
impl BlobTransport for S3Transport {
    async fn upload(&self, data: Vec<u8>) -> CloudResult<String> {
        let remote_id = Uuid::new_v4().to_string();
        let key = self.config.object_key(&remote_id);
        let size = data.len();

        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| CloudError::S3(format!("upload failed for {key}: {e}")))?;

        debug!("uploaded {size} bytes to s3://{}/{key}", self.config.bucket);
        Ok(remote_id)
    }

    async fn download(&self, remote_id: &str) -> CloudResult<Vec<u8>> {
        let key = self.config.object_key(remote_id);

        let resp = match self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                let service_err = e.into_service_error();
                if service_err.is_no_such_key() {
                    return Err(CloudError::NotFound(remote_id.to_string()));
                }
                return Err(CloudError::S3(format!("download failed for {key}: {service_err}")));
            }
        };

        let body = resp
            .body
            .collect()
            .await
            .map_err(|e| CloudError::S3(format!("failed to read body for {key}: {e}")))?;

        let bytes = body.into_bytes().to_vec();
        debug!(
            "downloaded {} bytes from s3://{}/{key}",
            bytes.len(),
            self.config.bucket
        );
        Ok(bytes)
    }

    async fn list(&self) -> CloudResult<Vec<RemoteBlob>> {
        let prefix = self.config.list_prefix();
        let mut blobs = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(&self.config.bucket)
                .prefix(&prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| CloudError::S3(format!("list failed for prefix {prefix}: {e}")))?;

            blobs.extend(resp.contents().iter().filter_map(|obj| {
                let remote_id = obj.key()?.strip_prefix(&prefix)?.to_string();
                Some(RemoteBlob {
                    remote_id,
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    last_modified: obj.last_modified().and_then(|t| t.to_millis().ok()),
                })
            }));

            match resp.next_continuation_token() {
                Some(token) if resp.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(blobs)
    }

    async fn delete(&self, remote_id: &str) -> CloudResult<()> {
        let key = self.config.object_key(remote_id);
        self.client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| CloudError::S3(format!("delete failed for {key}: {e}")))?;

        debug!("deleted s3://{}/{key}", self.config.bucket);
        Ok(())
    }
}
