use aws_sdk_s3::Client;
use std::time::Duration;
use tracing::debug;

use super::UploadError;

const FIRST_POLL_DELAY: Duration = Duration::from_millis(250);
const MAX_POLL_DELAY: Duration = Duration::from_secs(5);

/// Poll HEAD on `s3_key` until it is visible or `timeout` elapses
///
/// A missing object keeps the poll going; any other error ends it.
pub async fn wait_for_object(
    client: &Client,
    bucket: &str,
    s3_key: &str,
    timeout: Duration,
) -> Result<bool, UploadError> {
    let poll = async {
        let mut delay = FIRST_POLL_DELAY;
        loop {
            match client.head_object().bucket(bucket).key(s3_key).send().await {
                Ok(_) => return Ok(()),
                Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => {
                    debug!("s3://{}/{} not visible yet, retrying in {:?}", bucket, s3_key, delay);
                }
                Err(e) => {
                    return Err(UploadError::transfer(
                        bucket,
                        s3_key,
                        aws_sdk_s3::error::DisplayErrorContext(&e).to_string(),
                        false,
                    ));
                }
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(MAX_POLL_DELAY);
        }
    };

    match tokio::time::timeout(timeout, poll).await {
        Ok(Ok(())) => Ok(true),
        Ok(Err(e)) => Err(e),
        Err(_) => Ok(false),
    }
}
