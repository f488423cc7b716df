use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::{PipelineError, Result};

/// Thin wrapper around the S3 client, pointed at the MinIO endpoint.
///
/// All stages talk to the lake through this type; the bucket/key layout is
/// decided by the callers.
pub struct LakeStore {
    client: Client,
}

impl LakeStore {
    pub async fn connect(config: &StoreConfig) -> Self {
        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "pipeline-config",
        );
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint)
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;
        // MinIO requires path-style addressing
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();
        Self {
            client: Client::from_conf(s3_config),
        }
    }

    /// Create the bucket if it does not exist yet (idempotent).
    pub async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => {
                debug!(bucket, "bucket present");
                Ok(())
            }
            Err(err) => {
                let not_found = err
                    .as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false);
                if not_found {
                    info!(bucket, "bucket absent, creating");
                    self.client
                        .create_bucket()
                        .bucket(bucket)
                        .send()
                        .await
                        .map_err(|e| {
                            PipelineError::store("create_bucket", DisplayErrorContext(&e))
                        })?;
                    Ok(())
                } else {
                    Err(PipelineError::store(
                        "head_bucket",
                        DisplayErrorContext(&err),
                    ))
                }
            }
        }
    }

    pub async fn put_object(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| {
                PipelineError::store(
                    &format!("put_object s3://{bucket}/{key}"),
                    DisplayErrorContext(&e),
                )
            })?;
        debug!(bucket, key, "object written");
        Ok(())
    }

    pub async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                PipelineError::store(
                    &format!("get_object s3://{bucket}/{key}"),
                    DisplayErrorContext(&e),
                )
            })?;
        let data = resp.body.collect().await.map_err(|e| {
            PipelineError::store(&format!("read body s3://{bucket}/{key}"), e)
        })?;
        Ok(data.into_bytes().to_vec())
    }

    /// List every key under a prefix, following continuation tokens.
    pub async fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| {
                    PipelineError::store(
                        &format!("list_objects_v2 s3://{bucket}/{prefix}"),
                        DisplayErrorContext(&e),
                    )
                })?;
            for object in resp.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }
            match resp.next_continuation_token() {
                Some(t) => token = Some(t.to_string()),
                None => break,
            }
        }
        Ok(keys)
    }

    /// Keys plus sizes, for the verification report.
    pub async fn list_entries(&self, bucket: &str, prefix: &str) -> Result<Vec<(String, i64)>> {
        let mut entries = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| {
                    PipelineError::store(
                        &format!("list_objects_v2 s3://{bucket}/{prefix}"),
                        DisplayErrorContext(&e),
                    )
                })?;
            for object in resp.contents() {
                if let Some(key) = object.key() {
                    entries.push((key.to_string(), object.size().unwrap_or(0)));
                }
            }
            match resp.next_continuation_token() {
                Some(t) => token = Some(t.to_string()),
                None => break,
            }
        }
        Ok(entries)
    }
}
