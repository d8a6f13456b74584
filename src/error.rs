use std::path::PathBuf;
use thiserror::Error;

/// Errors that end a whole watch session
#[derive(Error, Debug)]
pub enum WatchError {
    /// Directory missing or the OS refused to watch it
    #[error("watcher: cannot watch {}: {reason}", path.display())]
    Setup { path: PathBuf, reason: String },

    /// Notification channel kept failing after every reconnect attempt
    #[error("watcher: lost watch on {} after {attempts} reconnect attempts: {reason}", path.display())]
    Runtime {
        path: PathBuf,
        attempts: u32,
        reason: String,
    },
}
