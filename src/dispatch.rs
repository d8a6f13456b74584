use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::WatchConfig;
use crate::event::ChangeEvent;
use crate::executor::{UploadExecutor, UploadOutcome};
use crate::s3::{ObjectStore, UploadError, UploadStrategy};
use crate::session::Stats;

/// One file headed for the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTask {
    pub source_path: PathBuf,
    pub destination_key: String,
    pub size_bytes: u64,
    pub strategy: UploadStrategy,
}

/// Pick an upload strategy by size; `None` means nothing to upload
///
/// A file exactly at the threshold still goes up in a single request.
pub fn classify(size_bytes: u64, threshold: u64) -> Option<UploadStrategy> {
    if size_bytes == 0 {
        None
    } else if size_bytes > threshold {
        Some(UploadStrategy::Multipart)
    } else {
        Some(UploadStrategy::Single)
    }
}

/// What the dispatcher did with one event
#[derive(Debug)]
pub enum Dispatch {
    /// Empty file or not a regular file
    Skipped(PathBuf),
    /// Event could not become a task (file gone, unresolvable path)
    Failed(UploadOutcome),
    /// Upload running in the background
    Launched(JoinHandle<UploadOutcome>),
}

pub struct Dispatcher<S> {
    config: Arc<WatchConfig>,
    executor: Arc<UploadExecutor<S>>,
    tracker: TaskTracker,
    stats: Arc<Stats>,
    outcomes: Option<mpsc::UnboundedSender<UploadOutcome>>,
}

impl<S: ObjectStore> Dispatcher<S> {
    pub fn new(
        config: Arc<WatchConfig>,
        executor: Arc<UploadExecutor<S>>,
        tracker: TaskTracker,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            config,
            executor,
            tracker,
            stats,
            outcomes: None,
        }
    }

    /// Also publish every outcome on `tx`
    pub fn with_outcomes(mut self, tx: Option<mpsc::UnboundedSender<UploadOutcome>>) -> Self {
        self.outcomes = tx;
        self
    }

    /// Dispatch events until the channel closes
    pub async fn run(&self, mut rx: mpsc::Receiver<ChangeEvent>) {
        while let Some(event) = rx.recv().await {
            // Launched uploads stay tracked; the handle is not needed here.
            let _ = self.dispatch(event).await;
        }
        debug!("Event channel closed, dispatcher stopping");
    }

    /// Resolve, stat and classify `event` into a task
    pub async fn prepare(&self, event: &ChangeEvent) -> Result<Option<UploadTask>, UploadError> {
        let path = std::path::absolute(&event.path)
            .map_err(|e| UploadError::from_io_error(e, &event.path))?;

        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| UploadError::from_io_error(e, &path))?;

        if !metadata.is_file() {
            debug!("Ignoring {} (not a regular file)", path.display());
            return Ok(None);
        }

        let size = metadata.len();
        let Some(strategy) = classify(size, self.config.size_threshold) else {
            info!("Skipping empty file {}", path.display());
            return Ok(None);
        };

        let destination_key = self.config.build_key(&path).ok_or_else(|| {
            UploadError::from_io_error(
                io::Error::new(io::ErrorKind::InvalidInput, "file name is missing or not valid UTF-8"),
                &path,
            )
        })?;

        Ok(Some(UploadTask {
            source_path: path,
            destination_key,
            size_bytes: size,
            strategy,
        }))
    }

    /// Handle one event without waiting for its upload
    pub async fn dispatch(&self, event: ChangeEvent) -> Dispatch {
        let task = match self.prepare(&event).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                self.stats.record_skipped();
                return Dispatch::Skipped(event.path);
            }
            Err(e) => {
                warn!("Dropping {} event for {}: {}", event.kind, event.path.display(), e);
                let outcome = UploadOutcome::rejected(event.path, &e);
                self.stats.record(&outcome);
                self.publish(&outcome);
                return Dispatch::Failed(outcome);
            }
        };

        self.stats.record_dispatched();

        let executor = Arc::clone(&self.executor);
        let stats = Arc::clone(&self.stats);
        let outcomes = self.outcomes.clone();

        Dispatch::Launched(self.tracker.spawn(async move {
            let outcome = executor.execute(task).await;
            stats.record(&outcome);
            if let Some(tx) = outcomes {
                let _ = tx.send(outcome.clone());
            }
            outcome
        }))
    }

    fn publish(&self, outcome: &UploadOutcome) {
        if let Some(tx) = &self.outcomes {
            let _ = tx.send(outcome.clone());
        }
    }
}
