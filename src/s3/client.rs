use anyhow::Result;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use std::path::Path;
use std::time::Duration;

use super::{
    MultipartOptions, ObjectStore, StoreLimits, UploadError, upload_file, upload_multipart,
    wait_for_object,
};
use crate::config::WatchConfig;

/// AWS S3 backed [`ObjectStore`]
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    limits: StoreLimits,
}

impl S3Client {
    pub async fn new(config: &WatchConfig) -> Result<Self> {
        let mut aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));

        if let Some(profile) = &config.profile {
            aws_config = aws_config.profile_name(profile);
        }

        let sdk_config = aws_config.load().await;

        let mut s3_config = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.endpoint {
            // S3-compatible stores generally want path-style addressing
            s3_config = s3_config.endpoint_url(endpoint).force_path_style(true);
        }
        let client = Client::from_conf(s3_config.build());

        Ok(Self {
            client,
            limits: config.limits,
        })
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        size: u64,
    ) -> Result<(), UploadError> {
        upload_file(&self.client, bucket, key, source, size, &self.limits).await
    }

    async fn multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        size: u64,
        options: MultipartOptions,
    ) -> Result<(), UploadError> {
        upload_multipart(&self.client, bucket, key, source, size, options, &self.limits).await
    }

    async fn object_exists(
        &self,
        bucket: &str,
        key: &str,
        timeout: Duration,
    ) -> Result<bool, UploadError> {
        wait_for_object(&self.client, bucket, key, timeout).await
    }
}
