use aws_sdk_s3::{
    Client,
    primitives::{ByteStream, Length},
    types::{CompletedMultipartUpload, CompletedPart},
};
use futures::{StreamExt, TryStreamExt, stream};
use std::path::Path;
use tracing::{debug, info, warn};

use super::{MultipartOptions, StoreLimits, UploadError, UploadStrategy};

/// One open multipart session on S3
struct PartSession<'a> {
    client: &'a Client,
    bucket: &'a str,
    s3_key: &'a str,
    upload_id: &'a str,
    local_path: &'a Path,
    file_size: u64,
    limits: &'a StoreLimits,
}

/// Upload a large file using S3 multipart upload
///
/// The file is cut into `options.part_size` parts (grown when the part-count
/// limit would be exceeded) and at most `options.concurrency` parts are in
/// flight at once. Each part reads its own byte range straight from disk.
///
/// On any failure the multipart session is aborted so no orphaned parts stay
/// billed on the bucket.
pub async fn upload_multipart(
    client: &Client,
    bucket: &str,
    s3_key: &str,
    local_path: &Path,
    file_size: u64,
    options: MultipartOptions,
    limits: &StoreLimits,
) -> Result<(), UploadError> {
    if file_size > limits.multipart_max {
        return Err(UploadError::ObjectTooLarge {
            strategy: UploadStrategy::Multipart,
            size: file_size,
            max: limits.multipart_max,
        });
    }

    let options = options.fit(file_size, limits.max_parts);

    info!(
        "Starting multipart upload for {} ({} bytes, {} parts of {} bytes, concurrency {})",
        local_path.display(),
        file_size,
        options.part_count(file_size),
        options.part_size,
        options.concurrency
    );

    let multipart = client
        .create_multipart_upload()
        .bucket(bucket)
        .key(s3_key)
        .send()
        .await
        .map_err(|e| sdk_error(bucket, s3_key, e, file_size, limits))?;

    let upload_id = multipart
        .upload_id()
        .ok_or_else(|| UploadError::transfer(bucket, s3_key, "No upload ID returned from S3", false))?;

    debug!("Multipart upload initiated with ID: {}", upload_id);

    let session = PartSession {
        client,
        bucket,
        s3_key,
        upload_id,
        local_path,
        file_size,
        limits,
    };

    let result = match session.upload_parts(options).await {
        Ok(parts) => session.complete(parts).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        if let Err(abort_err) = abort_multipart_upload(client, bucket, s3_key, upload_id).await {
            warn!(
                "Failed to abort multipart upload {} for s3://{}/{}: {}",
                upload_id, bucket, s3_key, abort_err
            );
        }
        return Err(e);
    }

    info!(
        "Successfully completed multipart upload: {} -> s3://{}/{}",
        local_path.display(),
        bucket,
        s3_key
    );

    Ok(())
}

impl PartSession<'_> {
    async fn upload_parts(&self, options: MultipartOptions) -> Result<Vec<CompletedPart>, UploadError> {
        let mut parts: Vec<CompletedPart> = stream::iter(0..options.part_count(self.file_size))
            .map(|index| {
                let offset = index * options.part_size;
                let length = options.part_size.min(self.file_size - offset);
                self.upload_part(index as i32 + 1, offset, length)
            })
            .buffer_unordered(options.concurrency)
            .try_collect()
            .await?;

        parts.sort_by_key(|p| p.part_number());

        debug!(
            "All {} parts uploaded, completing multipart upload",
            parts.len()
        );

        Ok(parts)
    }

    async fn upload_part(
        &self,
        part_number: i32,
        offset: u64,
        length: u64,
    ) -> Result<CompletedPart, UploadError> {
        let body = ByteStream::read_from()
            .path(self.local_path)
            .offset(offset)
            .length(Length::Exact(length))
            .build()
            .await
            .map_err(|e| UploadError::from_io_error(std::io::Error::other(e), self.local_path))?;

        debug!("Uploading part {} ({} bytes)", part_number, length);

        let part_result = self
            .client
            .upload_part()
            .bucket(self.bucket)
            .key(self.s3_key)
            .upload_id(self.upload_id)
            .part_number(part_number)
            .body(body)
            .send()
            .await
            .map_err(|e| sdk_error(self.bucket, self.s3_key, e, self.file_size, self.limits))?;

        Ok(CompletedPart::builder()
            .part_number(part_number)
            .e_tag(part_result.e_tag().unwrap_or(""))
            .build())
    }

    async fn complete(&self, parts: Vec<CompletedPart>) -> Result<(), UploadError> {
        let completed_multipart = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(self.bucket)
            .key(self.s3_key)
            .upload_id(self.upload_id)
            .multipart_upload(completed_multipart)
            .send()
            .await
            .map_err(|e| sdk_error(self.bucket, self.s3_key, e, self.file_size, self.limits))?;

        Ok(())
    }
}

fn sdk_error<E, R>(
    bucket: &str,
    s3_key: &str,
    error: aws_sdk_s3::error::SdkError<E, R>,
    file_size: u64,
    limits: &StoreLimits,
) -> UploadError
where
    E: aws_sdk_s3::error::ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    UploadError::from_sdk_error(
        bucket,
        s3_key,
        error,
        UploadStrategy::Multipart,
        file_size,
        limits.multipart_max,
    )
}

/// Abort a multipart upload (for cleanup on error)
async fn abort_multipart_upload(
    client: &Client,
    bucket: &str,
    s3_key: &str,
    upload_id: &str,
) -> Result<(), UploadError> {
    client
        .abort_multipart_upload()
        .bucket(bucket)
        .key(s3_key)
        .upload_id(upload_id)
        .send()
        .await
        .map_err(|e| sdk_error(bucket, s3_key, e, 0, &StoreLimits::default()))?;

    debug!("Aborted multipart upload {}", upload_id);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::config::{BehaviorVersion, Region};

    fn offline_client() -> Client {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .build();
        Client::from_conf(config)
    }

    #[tokio::test]
    async fn test_multipart_ceiling_checked_before_session() {
        let limits = StoreLimits {
            multipart_max: 100,
            ..StoreLimits::default()
        };

        let err = upload_multipart(
            &offline_client(),
            "my-bucket",
            "data/big.bin",
            Path::new("/nonexistent/big.bin"),
            101,
            MultipartOptions::default(),
            &limits,
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            UploadError::ObjectTooLarge {
                strategy: UploadStrategy::Multipart,
                size: 101,
                max: 100
            }
        ));
        assert!(!err.is_transient());
    }
}
