use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::WatchConfig;
use crate::dispatch::UploadTask;
use crate::s3::{MultipartOptions, ObjectStore, UploadError, UploadErrorKind, UploadStrategy};

/// Retry schedule for transient transfer errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based), doubling each time
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Result of the post-upload visibility check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    /// Not visible within the timeout; the upload still counts as successful
    TimedOut(Duration),
    /// The check itself failed
    Failed(String),
    /// Upload failed or was cancelled before a check could run
    NotChecked,
}

/// Kind and message of a failed upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetail {
    pub kind: UploadErrorKind,
    pub message: String,
}

impl From<&UploadError> for ErrorDetail {
    fn from(err: &UploadError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// What happened to one upload task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub source: PathBuf,
    /// `None` when the task failed before a key could be derived
    pub key: Option<String>,
    pub size: u64,
    pub strategy: Option<UploadStrategy>,
    pub attempts: u32,
    pub confirmation: Confirmation,
    pub error: Option<ErrorDetail>,
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn error_kind(&self) -> Option<UploadErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Outcome for an event that never became a task
    pub(crate) fn rejected(source: PathBuf, error: &UploadError) -> Self {
        Self {
            source,
            key: None,
            size: 0,
            strategy: None,
            attempts: 0,
            confirmation: Confirmation::NotChecked,
            error: Some(error.into()),
        }
    }
}

pub struct UploadExecutor<S> {
    store: Arc<S>,
    bucket: String,
    multipart: MultipartOptions,
    confirm_timeout: Duration,
    retry: RetryPolicy,
    token: CancellationToken,
}

impl<S: ObjectStore> UploadExecutor<S> {
    /// `token` is shared by every upload; cancelling it stops them all.
    pub fn new(store: Arc<S>, config: &WatchConfig, token: CancellationToken) -> Self {
        Self {
            store,
            bucket: config.bucket.clone(),
            multipart: config.multipart,
            confirm_timeout: config.confirm_timeout,
            retry: config.retry,
            token,
        }
    }

    pub async fn execute(&self, task: UploadTask) -> UploadOutcome {
        info!(
            "Uploading {} ({} bytes, {}) to s3://{}/{}",
            task.source_path.display(),
            task.size_bytes,
            task.strategy,
            self.bucket,
            task.destination_key
        );

        let (result, attempts) = self.transfer_with_retry(&task).await;

        let (confirmation, error) = match result {
            Ok(()) => {
                let confirmation = self.confirm(&task.destination_key).await;
                info!(
                    "Successfully uploaded {} to s3://{}/{}",
                    task.source_path.display(),
                    self.bucket,
                    task.destination_key
                );
                (confirmation, None)
            }
            Err(e) => {
                error!(
                    "Upload failed for {} after {} attempt(s): {}",
                    task.source_path.display(),
                    attempts,
                    e
                );
                (Confirmation::NotChecked, Some(ErrorDetail::from(&e)))
            }
        };

        UploadOutcome {
            source: task.source_path,
            key: Some(task.destination_key),
            size: task.size_bytes,
            strategy: Some(task.strategy),
            attempts,
            confirmation,
            error,
        }
    }

    async fn transfer_with_retry(&self, task: &UploadTask) -> (Result<(), UploadError>, u32) {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let result = tokio::select! {
                _ = self.token.cancelled() => Err(UploadError::Cancelled),
                result = self.transfer(task) => result,
            };

            match result {
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        "Transient failure uploading {} (attempt {}/{}), retrying in {:?}: {}",
                        task.destination_key, attempt, self.retry.max_attempts, delay, e
                    );
                    tokio::select! {
                        _ = self.token.cancelled() => return (Err(UploadError::Cancelled), attempt),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                other => return (other, attempt),
            }
        }
    }

    async fn transfer(&self, task: &UploadTask) -> Result<(), UploadError> {
        match task.strategy {
            UploadStrategy::Single => {
                self.store
                    .put_object(
                        &self.bucket,
                        &task.destination_key,
                        &task.source_path,
                        task.size_bytes,
                    )
                    .await
            }
            UploadStrategy::Multipart => {
                self.store
                    .multipart_upload(
                        &self.bucket,
                        &task.destination_key,
                        &task.source_path,
                        task.size_bytes,
                        self.multipart,
                    )
                    .await
            }
        }
    }

    async fn confirm(&self, key: &str) -> Confirmation {
        let check = self
            .store
            .object_exists(&self.bucket, key, self.confirm_timeout);

        let result = tokio::select! {
            _ = self.token.cancelled() => return Confirmation::NotChecked,
            result = check => result,
        };

        match result {
            Ok(true) => Confirmation::Confirmed,
            Ok(false) => {
                warn!(
                    "Failed attempt to wait for s3://{}/{} to exist within {:?}",
                    self.bucket, key, self.confirm_timeout
                );
                Confirmation::TimedOut(self.confirm_timeout)
            }
            Err(e) => {
                warn!("Could not confirm s3://{}/{}: {}", self.bucket, key, e);
                Confirmation::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingStore, StoreCall};

    const MIB: u64 = 1024 * 1024;

    fn config() -> WatchConfig {
        let mut config = WatchConfig::new("/watch", "my-bucket");
        config.retry = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };
        config
    }

    fn task(strategy: UploadStrategy, size: u64) -> UploadTask {
        UploadTask {
            source_path: PathBuf::from("/watch/a.txt"),
            destination_key: "data/a.txt".to_string(),
            size_bytes: size,
            strategy,
        }
    }

    fn executor(store: &Arc<RecordingStore>) -> UploadExecutor<RecordingStore> {
        UploadExecutor::new(Arc::clone(store), &config(), CancellationToken::new())
    }

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(300));
        assert_eq!(policy.delay_after(30), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_single_upload_is_confirmed() {
        let store = Arc::new(RecordingStore::new());
        let outcome = executor(&store).execute(task(UploadStrategy::Single, 10)).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.confirmation, Confirmation::Confirmed);
        assert_eq!(
            store.calls(),
            vec![
                StoreCall::Put {
                    key: "data/a.txt".to_string(),
                    size: 10
                },
                StoreCall::Exists {
                    key: "data/a.txt".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_multipart_uses_configured_parts() {
        let store = Arc::new(RecordingStore::new());
        let outcome = executor(&store)
            .execute(task(UploadStrategy::Multipart, 80 * MIB))
            .await;

        assert!(outcome.is_success());
        assert_eq!(
            store.transfer_calls(),
            vec![StoreCall::Multipart {
                key: "data/a.txt".to_string(),
                size: 80 * MIB,
                options: MultipartOptions {
                    part_size: 50 * MIB,
                    concurrency: 5
                },
            }]
        );
    }

    #[tokio::test]
    async fn test_confirmation_timeout_is_only_a_warning() {
        let store = Arc::new(RecordingStore::invisible());
        let outcome = executor(&store).execute(task(UploadStrategy::Single, 10)).await;

        assert!(outcome.is_success());
        assert_eq!(
            outcome.confirmation,
            Confirmation::TimedOut(Duration::from_secs(60))
        );
    }

    #[tokio::test]
    async fn test_transient_error_is_retried() {
        let store = Arc::new(RecordingStore::new());
        store.push_failure(UploadError::transfer("my-bucket", "data/a.txt", "reset", true));

        let outcome = executor(&store).execute(task(UploadStrategy::Single, 10)).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts, 2);
        assert_eq!(store.transfer_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let store = Arc::new(RecordingStore::new());
        for _ in 0..5 {
            store.push_failure(UploadError::transfer("my-bucket", "data/a.txt", "reset", true));
        }

        let outcome = executor(&store).execute(task(UploadStrategy::Single, 10)).await;

        assert!(!outcome.is_success());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.error_kind(), Some(UploadErrorKind::Transfer));
        assert_eq!(outcome.confirmation, Confirmation::NotChecked);
    }

    #[tokio::test]
    async fn test_object_too_large_is_not_retried() {
        let store = Arc::new(RecordingStore::new());
        store.push_failure(UploadError::ObjectTooLarge {
            strategy: UploadStrategy::Single,
            size: 10,
            max: 5,
        });

        let outcome = executor(&store).execute(task(UploadStrategy::Single, 10)).await;

        assert_eq!(outcome.error_kind(), Some(UploadErrorKind::ObjectTooLarge));
        assert_eq!(outcome.attempts, 1);
        assert_eq!(store.transfer_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_upload() {
        let store = Arc::new(RecordingStore::new());
        store.push_delay(Duration::from_secs(30));
        let token = CancellationToken::new();
        let executor = UploadExecutor::new(Arc::clone(&store), &config(), token.clone());

        let handle = tokio::spawn(async move { executor.execute(task(UploadStrategy::Single, 10)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("cancelled upload must finish promptly")
            .unwrap();
        assert_eq!(outcome.error_kind(), Some(UploadErrorKind::Cancelled));
        assert!(store.completion_order().is_empty());
    }
}
