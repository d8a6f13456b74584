use aws_sdk_s3::{Client, primitives::ByteStream};
use std::path::Path;
use tracing::debug;

use super::{StoreLimits, UploadError, UploadStrategy};

/// Upload a file to S3 as a single PUT
///
/// The body is streamed from disk, never buffered whole in memory.
pub async fn upload_file(
    client: &Client,
    bucket: &str,
    s3_key: &str,
    local_path: &Path,
    file_size: u64,
    limits: &StoreLimits,
) -> Result<(), UploadError> {
    if file_size > limits.single_put_max {
        return Err(UploadError::ObjectTooLarge {
            strategy: UploadStrategy::Single,
            size: file_size,
            max: limits.single_put_max,
        });
    }

    let body = ByteStream::from_path(local_path)
        .await
        .map_err(|e| UploadError::from_io_error(std::io::Error::other(e), local_path))?;

    debug!(
        "PUT s3://{}/{} ({} bytes) from {}",
        bucket,
        s3_key,
        file_size,
        local_path.display()
    );

    client
        .put_object()
        .bucket(bucket)
        .key(s3_key)
        .body(body)
        .send()
        .await
        .map_err(|e| {
            UploadError::from_sdk_error(
                bucket,
                s3_key,
                e,
                UploadStrategy::Single,
                file_size,
                limits.single_put_max,
            )
        })?;

    Ok(())
}
