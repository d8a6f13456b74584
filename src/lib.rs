//! Watch a local directory and mirror finished file writes into an S3 bucket.
//!
//! The pipeline is [`watcher::EventSource`] → [`filter::route`] →
//! [`dispatch::Dispatcher`] → [`executor::UploadExecutor`], assembled and
//! shut down by [`session::WatchSession`].

pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod executor;
pub mod filter;
pub mod s3;
pub mod session;
pub mod watcher;

#[cfg(test)]
mod testing;

pub use config::{ConfigOverrides, WatchConfig};
pub use dispatch::{UploadTask, classify};
pub use error::WatchError;
pub use event::{ChangeEvent, OperationKind};
pub use executor::{Confirmation, UploadOutcome};
pub use s3::{ObjectStore, S3Client, UploadError, UploadStrategy};
pub use session::{SessionSummary, ShutdownHandle, WatchSession};
