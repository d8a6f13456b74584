pub mod client;
pub mod error;
pub mod exists;
pub mod multipart;
pub mod upload;

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

pub use client::S3Client;
pub use error::{UploadError, UploadErrorKind};
pub use exists::wait_for_object;
pub use multipart::upload_multipart;
pub use upload::upload_file;

const MIB: u64 = 1024 * 1024;

/// Default size of each multipart part (50 MiB)
pub const DEFAULT_PART_SIZE: u64 = 50 * MIB;

/// Default number of parts in flight per multipart session
pub const DEFAULT_PART_CONCURRENCY: usize = 5;

/// AWS minimum part size (5 MiB), last part excepted
pub const MIN_PART_SIZE: u64 = 5 * MIB;

/// How an individual file is transferred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadStrategy {
    /// One PUT carrying the whole body
    Single,
    /// Chunked upload aggregated server-side
    Multipart,
}

impl fmt::Display for UploadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => f.write_str("single-request"),
            Self::Multipart => f.write_str("multipart"),
        }
    }
}

/// Ceilings imposed by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    /// Largest body a single PUT accepts (5 GiB on S3)
    pub single_put_max: u64,
    /// Largest object a multipart session can assemble (5 TiB on S3)
    pub multipart_max: u64,
    /// Maximum number of parts in one session
    pub max_parts: u64,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            single_put_max: 5 * 1024 * MIB,
            multipart_max: 5 * 1024 * 1024 * MIB,
            max_parts: 10_000,
        }
    }
}

impl StoreLimits {
    pub fn max_for(&self, strategy: UploadStrategy) -> u64 {
        match strategy {
            UploadStrategy::Single => self.single_put_max,
            UploadStrategy::Multipart => self.multipart_max,
        }
    }
}

/// Part layout for a multipart session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultipartOptions {
    pub part_size: u64,
    pub concurrency: usize,
}

impl Default for MultipartOptions {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            concurrency: DEFAULT_PART_CONCURRENCY,
        }
    }
}

impl MultipartOptions {
    /// Grow the part size when `size` would need more than `max_parts` parts.
    pub fn fit(self, size: u64, max_parts: u64) -> Self {
        let needed = size.div_ceil(max_parts.max(1));
        Self {
            part_size: self.part_size.max(needed).max(MIN_PART_SIZE),
            concurrency: self.concurrency.max(1),
        }
    }

    pub fn part_count(&self, size: u64) -> u64 {
        size.div_ceil(self.part_size.max(1))
    }
}

/// Remote object store capability used by the upload executor
///
/// Implementations open and stream the local file themselves so each upload
/// owns its own file handle.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Upload `source` as the body of one PUT.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        size: u64,
    ) -> Result<(), UploadError>;

    /// Upload `source` in parts under one multipart session.
    async fn multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        size: u64,
        options: MultipartOptions,
    ) -> Result<(), UploadError>;

    /// Wait up to `timeout` for the object to become visible.
    ///
    /// Returns `Ok(false)` when the deadline passes without seeing it.
    async fn object_exists(
        &self,
        bucket: &str,
        key: &str,
        timeout: Duration,
    ) -> Result<bool, UploadError>;
}
