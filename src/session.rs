use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::config::WatchConfig;
use crate::dispatch::Dispatcher;
use crate::error::WatchError;
use crate::event::OperationKind;
use crate::executor::{Confirmation, UploadExecutor, UploadOutcome};
use crate::filter::{self, RouteStats};
use crate::s3::ObjectStore;
use crate::watcher::{DEFAULT_EVENT_CAPACITY, EventSource, ReconnectPolicy};

/// Running counters, shared by the dispatcher and every upload task
#[derive(Debug, Default)]
pub struct Stats {
    dispatched: AtomicUsize,
    skipped: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    unconfirmed: AtomicUsize,
    bytes_uploaded: AtomicU64,
}

impl Stats {
    pub fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record(&self, outcome: &UploadOutcome) {
        if !outcome.is_success() {
            self.failed.fetch_add(1, Ordering::Relaxed);
            return;
        }

        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.bytes_uploaded
            .fetch_add(outcome.size, Ordering::Relaxed);
        if outcome.confirmation != Confirmation::Confirmed {
            self.unconfirmed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            unconfirmed: self.unconfirmed.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            ..Default::default()
        }
    }
}

/// Final tally of a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub events_received: u64,
    pub events_forwarded: u64,
    pub dispatched: usize,
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub unconfirmed: usize,
    pub bytes_uploaded: u64,
}

/// Cloneable way to stop a running session from elsewhere
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    intake: CancellationToken,
    uploads: CancellationToken,
}

impl ShutdownHandle {
    /// Stop taking new events; in-flight uploads get the grace period.
    pub fn shutdown(&self) {
        self.intake.cancel();
    }

    /// Stop taking new events and cancel in-flight uploads right away.
    pub fn abort(&self) {
        self.intake.cancel();
        self.uploads.cancel();
    }
}

pub struct WatchSession<S> {
    config: Arc<WatchConfig>,
    store: Arc<S>,
    allowed: HashSet<OperationKind>,
    reconnect: ReconnectPolicy,
    intake: CancellationToken,
    uploads: CancellationToken,
    tracker: TaskTracker,
    outcomes: Option<mpsc::UnboundedSender<UploadOutcome>>,
}

impl<S: ObjectStore> WatchSession<S> {
    pub fn new(config: WatchConfig, store: Arc<S>) -> Self {
        Self {
            config: Arc::new(config),
            store,
            allowed: filter::default_allowed_kinds(),
            reconnect: ReconnectPolicy::default(),
            intake: CancellationToken::new(),
            uploads: CancellationToken::new(),
            tracker: TaskTracker::new(),
            outcomes: None,
        }
    }

    pub fn with_allowed_kinds(mut self, allowed: HashSet<OperationKind>) -> Self {
        self.allowed = allowed;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Publish every upload outcome on `tx`
    pub fn with_outcomes(mut self, tx: mpsc::UnboundedSender<UploadOutcome>) -> Self {
        self.outcomes = Some(tx);
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            intake: self.intake.clone(),
            uploads: self.uploads.clone(),
        }
    }

    /// Watch until shut down or the watcher fails for good
    ///
    /// Returns once every in-flight upload has finished or been cancelled.
    /// Setup and unrecoverable watch errors are returned; upload failures
    /// never are.
    pub async fn run(self) -> Result<SessionSummary, WatchError> {
        let config = Arc::clone(&self.config);

        info!(
            "Starting S3 file watcher on {} -> s3://{}/{} (multipart above {} bytes)",
            config.watch_dir.display(),
            config.bucket,
            config.key_prefix,
            config.size_threshold
        );

        let source = EventSource::new(&config.watch_dir)
            .with_reconnect(self.reconnect)
            .start(self.intake.clone())?;

        let (filtered_tx, filtered_rx) = mpsc::channel(DEFAULT_EVENT_CAPACITY);
        let router = tokio::spawn(filter::route(
            source.events,
            filtered_tx,
            self.allowed.clone(),
        ));

        let stats = Arc::new(Stats::default());
        let executor = Arc::new(UploadExecutor::new(
            Arc::clone(&self.store),
            &config,
            self.uploads.clone(),
        ));
        let dispatcher = Dispatcher::new(
            Arc::clone(&config),
            executor,
            self.tracker.clone(),
            Arc::clone(&stats),
        )
        .with_outcomes(self.outcomes.clone());

        // Ends once the source stops and the router has forwarded everything.
        dispatcher.run(filtered_rx).await;

        self.drain().await;

        let route_stats: RouteStats = router.await.unwrap_or_default();
        let source_result = source
            .handle
            .await
            .unwrap_or_else(|e| {
                Err(WatchError::Runtime {
                    path: config.watch_dir.clone(),
                    attempts: 0,
                    reason: e.to_string(),
                })
            });

        let summary = SessionSummary {
            events_received: route_stats.received,
            events_forwarded: route_stats.forwarded,
            ..stats.summary()
        };
        info!(
            "Watch session finished: {} uploaded, {} failed, {} skipped, {} unconfirmed",
            summary.succeeded, summary.failed, summary.skipped, summary.unconfirmed
        );

        source_result.map(|()| summary)
    }

    async fn drain(&self) {
        self.tracker.close();
        if self.tracker.is_empty() {
            return;
        }

        info!("Waiting for {} in-flight upload(s)", self.tracker.len());
        let grace = self.config.shutdown_grace;
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(
                "Uploads still running after {:?}, cancelling them",
                grace
            );
            self.uploads.cancel();
            self.tracker.wait().await;
        }
    }
}
