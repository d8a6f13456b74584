use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use crate::s3::{MultipartOptions, ObjectStore, UploadError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StoreCall {
    Put {
        key: String,
        size: u64,
    },
    Multipart {
        key: String,
        size: u64,
        options: MultipartOptions,
    },
    Exists {
        key: String,
    },
}

/// Records every call; transfer delays and failures are scripted per call, in order.
#[derive(Default)]
pub(crate) struct RecordingStore {
    calls: Mutex<Vec<StoreCall>>,
    delays: Mutex<VecDeque<Duration>>,
    failures: Mutex<VecDeque<UploadError>>,
    completed: Mutex<Vec<usize>>,
    started: Mutex<usize>,
    invisible: bool,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Objects never become visible, so confirmation always times out.
    pub fn invisible() -> Self {
        Self {
            invisible: true,
            ..Self::default()
        }
    }

    /// Delay for the next transfer call
    pub fn push_delay(&self, delay: Duration) {
        self.delays.lock().unwrap().push_back(delay);
    }

    /// Failure for the next transfer call
    pub fn push_failure(&self, error: UploadError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn transfer_calls(&self) -> Vec<StoreCall> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, StoreCall::Exists { .. }))
            .collect()
    }

    /// Transfer call indices in completion order
    pub fn completion_order(&self) -> Vec<usize> {
        self.completed.lock().unwrap().clone()
    }

    async fn transfer(&self, call: StoreCall) -> Result<(), UploadError> {
        let (seq, delay, failure) = {
            let mut started = self.started.lock().unwrap();
            let seq = *started;
            *started += 1;
            self.calls.lock().unwrap().push(call);
            (
                seq,
                self.delays.lock().unwrap().pop_front(),
                self.failures.lock().unwrap().pop_front(),
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = failure {
            return Err(err);
        }

        self.completed.lock().unwrap().push(seq);
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for RecordingStore {
    async fn put_object(
        &self,
        _bucket: &str,
        key: &str,
        _source: &Path,
        size: u64,
    ) -> Result<(), UploadError> {
        self.transfer(StoreCall::Put {
            key: key.to_string(),
            size,
        })
        .await
    }

    async fn multipart_upload(
        &self,
        _bucket: &str,
        key: &str,
        _source: &Path,
        size: u64,
        options: MultipartOptions,
    ) -> Result<(), UploadError> {
        self.transfer(StoreCall::Multipart {
            key: key.to_string(),
            size,
            options,
        })
        .await
    }

    async fn object_exists(
        &self,
        _bucket: &str,
        key: &str,
        _timeout: Duration,
    ) -> Result<bool, UploadError> {
        self.calls.lock().unwrap().push(StoreCall::Exists {
            key: key.to_string(),
        });
        Ok(!self.invisible)
    }
}
