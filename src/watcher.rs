use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::WatchError;
use crate::event::ChangeEvent;

/// Capacity of the raw and change channels
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

type RawEvent = notify::Result<notify::Event>;

/// How hard to try re-establishing a watch after a runtime error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(1),
        }
    }
}

/// Live handle on the OS watch; dropping it releases the watch.
struct Watch {
    // Receiver goes first so a blocked notify thread is released before the watcher drops.
    raw_rx: mpsc::Receiver<RawEvent>,
    _watcher: RecommendedWatcher,
}

/// Running event source
///
/// `events` ends (yields `None`) exactly once, when the source stops.
/// `handle` resolves to the reason it stopped.
pub struct EventStream {
    pub events: mpsc::Receiver<ChangeEvent>,
    pub handle: JoinHandle<Result<(), WatchError>>,
}

/// Non-recursive watch on one directory
///
/// Delivery blocks instead of dropping events when consumers fall behind.
#[derive(Debug, Clone)]
pub struct EventSource {
    dir: PathBuf,
    reconnect: ReconnectPolicy,
    capacity: usize,
}

impl EventSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            reconnect: ReconnectPolicy::default(),
            capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Start watching
    ///
    /// Fails with [`WatchError::Setup`] when the directory is missing or
    /// cannot be watched. Otherwise the watch runs on its own task until
    /// `token` is cancelled, the consumer goes away, or reconnecting fails.
    pub fn start(self, token: CancellationToken) -> Result<EventStream, WatchError> {
        let watch = open_watch(&self.dir, self.capacity)?;
        info!("Watching {} for changes", self.dir.display());

        let (tx, events) = mpsc::channel(self.capacity);
        let handle = tokio::spawn(self.run(watch, tx, token));

        Ok(EventStream { events, handle })
    }

    async fn run(
        self,
        mut watch: Watch,
        tx: mpsc::Sender<ChangeEvent>,
        token: CancellationToken,
    ) -> Result<(), WatchError> {
        loop {
            let raw = tokio::select! {
                _ = token.cancelled() => break,
                raw = watch.raw_rx.recv() => raw,
            };

            match raw {
                Some(Ok(event)) => {
                    for change in ChangeEvent::from_notify(event) {
                        debug!("{} {}", change.kind, change.path.display());
                        tokio::select! {
                            _ = token.cancelled() => return Ok(()),
                            sent = tx.send(change) => {
                                if sent.is_err() {
                                    debug!("Change consumer gone, stopping watcher");
                                    return Ok(());
                                }
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!("Watch error on {}: {}", self.dir.display(), e);
                    drop(watch);
                    watch = match self.reconnect(&token, e.to_string()).await? {
                        Some(watch) => watch,
                        None => break,
                    };
                }
                None => {
                    warn!("Watcher channel closed for {}", self.dir.display());
                    break;
                }
            }
        }

        info!("Stopped watching {}", self.dir.display());
        Ok(())
    }

    /// Try to re-open the watch; `Ok(None)` means cancellation won the race.
    async fn reconnect(
        &self,
        token: &CancellationToken,
        mut reason: String,
    ) -> Result<Option<Watch>, WatchError> {
        for attempt in 1..=self.reconnect.max_attempts {
            tokio::select! {
                _ = token.cancelled() => return Ok(None),
                _ = tokio::time::sleep(self.reconnect.delay) => {}
            }

            match open_watch(&self.dir, self.capacity) {
                Ok(watch) => {
                    info!(
                        "Re-established watch on {} (attempt {})",
                        self.dir.display(),
                        attempt
                    );
                    return Ok(Some(watch));
                }
                Err(e) => {
                    warn!(
                        "Reconnect attempt {}/{} failed: {}",
                        attempt, self.reconnect.max_attempts, e
                    );
                    reason = e.to_string();
                }
            }
        }

        Err(WatchError::Runtime {
            path: self.dir.clone(),
            attempts: self.reconnect.max_attempts,
            reason,
        })
    }
}

fn open_watch(dir: &Path, capacity: usize) -> Result<Watch, WatchError> {
    let setup_error = |reason: String| WatchError::Setup {
        path: dir.to_path_buf(),
        reason,
    };

    if !dir.is_dir() {
        return Err(setup_error(
            "directory does not exist or is not a directory".to_string(),
        ));
    }

    let (raw_tx, raw_rx) = mpsc::channel::<RawEvent>(capacity);
    // Runs on notify's own thread, so blocking here is what applies backpressure.
    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = raw_tx.blocking_send(res);
    })
    .map_err(|e| setup_error(e.to_string()))?;

    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(|e| setup_error(e.to_string()))?;

    Ok(Watch {
        raw_rx,
        _watcher: watcher,
    })
}
