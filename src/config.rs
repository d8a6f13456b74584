use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::executor::RetryPolicy;
use crate::s3::{MIN_PART_SIZE, MultipartOptions, StoreLimits};

/// Files larger than this go through multipart upload (50 MiB)
pub const DEFAULT_SIZE_THRESHOLD: u64 = 50 * 1024 * 1024;

/// How long to wait for an uploaded object to become visible
pub const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(60);

/// How long in-flight uploads may keep running after shutdown is requested
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Values supplied on the command line; each one wins over its environment variable
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub watch_dir: Option<PathBuf>,
    pub bucket: Option<String>,
    pub prefix: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub size_threshold: Option<u64>,
    pub part_size: Option<u64>,
    pub part_concurrency: Option<usize>,
    pub confirm_timeout: Option<Duration>,
    pub retry_attempts: Option<u32>,
    pub shutdown_grace: Option<Duration>,
}

/// Configuration for one watch session
///
/// Built once at startup and shared read-only afterwards.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub watch_dir: PathBuf,
    pub bucket: String,
    pub key_prefix: String,
    pub region: String,
    pub profile: Option<String>,
    pub endpoint: Option<String>,
    pub size_threshold: u64,
    pub multipart: MultipartOptions,
    pub confirm_timeout: Duration,
    pub retry: RetryPolicy,
    pub shutdown_grace: Duration,
    pub limits: StoreLimits,
}

impl WatchConfig {
    /// Minimal configuration with every tunable at its default
    pub fn new(watch_dir: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            watch_dir: watch_dir.into(),
            bucket: bucket.into(),
            key_prefix: String::new(),
            region: String::new(),
            profile: None,
            endpoint: None,
            size_threshold: DEFAULT_SIZE_THRESHOLD,
            multipart: MultipartOptions::default(),
            confirm_timeout: DEFAULT_CONFIRM_TIMEOUT,
            retry: RetryPolicy::default(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            limits: StoreLimits::default(),
        }
    }

    /// Load configuration from CLI overrides, environment variables and .env file
    ///
    /// # Errors
    ///
    /// Returns an error listing every missing or invalid value
    pub fn from_env(overrides: ConfigOverrides) -> Result<Self> {
        dotenv::dotenv().ok(); // Load .env file if it exists

        Self::load(overrides, |name| env::var(name).ok())
    }

    /// Load configuration with an explicit variable lookup
    pub fn load(overrides: ConfigOverrides, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());
        let mut problems = Vec::new();

        let watch_dir = overrides
            .watch_dir
            .or_else(|| var("WATCH_DIR").map(PathBuf::from))
            .unwrap_or_default();
        if let Err(e) = Self::validate_watch_dir(&watch_dir) {
            problems.push(e.to_string());
        }

        let bucket = overrides
            .bucket
            .or_else(|| var("S3_BUCKET_NAME"))
            .unwrap_or_default();
        if let Err(e) = Self::validate_bucket_name(&bucket) {
            problems.push(e.to_string());
        }

        let key_prefix = overrides
            .prefix
            .or_else(|| var("S3_BUCKET_PREFIX"))
            .unwrap_or_default();
        if let Err(e) = Self::validate_key_prefix(&key_prefix) {
            problems.push(e.to_string());
        }

        // AWS_REGION wins over AWS_DEFAULT_REGION, as in the AWS CLI
        let region = overrides
            .region
            .or_else(|| var("AWS_REGION"))
            .or_else(|| var("AWS_DEFAULT_REGION"))
            .unwrap_or_default();
        if let Err(e) = Self::validate_region(&region) {
            problems.push(e.to_string());
        }

        let size_threshold = match overrides.size_threshold {
            Some(v) => v,
            None => match var("UPLOAD_SIZE_THRESHOLD").map(|v| v.parse::<u64>()) {
                Some(Ok(v)) => v,
                Some(Err(e)) => {
                    problems.push(format!("UPLOAD_SIZE_THRESHOLD is not a byte count: {}", e));
                    DEFAULT_SIZE_THRESHOLD
                }
                None => DEFAULT_SIZE_THRESHOLD,
            },
        };

        let multipart = MultipartOptions {
            part_size: overrides
                .part_size
                .unwrap_or(MultipartOptions::default().part_size),
            concurrency: overrides
                .part_concurrency
                .unwrap_or(MultipartOptions::default().concurrency),
        };
        if multipart.part_size < MIN_PART_SIZE {
            problems.push(format!(
                "Part size {} is below the S3 minimum of {} bytes",
                multipart.part_size, MIN_PART_SIZE
            ));
        }
        if multipart.concurrency == 0 {
            problems.push("Part concurrency must be at least 1".to_string());
        }

        let mut retry = RetryPolicy::default();
        if let Some(attempts) = overrides.retry_attempts {
            retry.max_attempts = attempts.max(1);
        }

        if !problems.is_empty() {
            anyhow::bail!("Invalid configuration:\n  - {}", problems.join("\n  - "));
        }

        Ok(Self {
            watch_dir,
            bucket,
            key_prefix,
            region,
            profile: var("AWS_PROFILE"),
            endpoint: overrides.endpoint.or_else(|| var("S3_ENDPOINT_URL")),
            size_threshold,
            multipart,
            confirm_timeout: overrides.confirm_timeout.unwrap_or(DEFAULT_CONFIRM_TIMEOUT),
            retry,
            shutdown_grace: overrides.shutdown_grace.unwrap_or(DEFAULT_SHUTDOWN_GRACE),
            limits: StoreLimits::default(),
        })
    }

    fn validate_watch_dir(dir: &Path) -> Result<()> {
        if dir.as_os_str().is_empty() {
            anyhow::bail!(
                "Invalid source directory. Please provide a valid directory path. Example: /path/to/source"
            );
        }

        let metadata = std::fs::metadata(dir)
            .with_context(|| format!("Invalid source directory '{}'", dir.display()))?;
        if !metadata.is_dir() {
            anyhow::bail!("Source '{}' is not a directory", dir.display());
        }

        Ok(())
    }

    /// Validate AWS region format
    fn validate_region(region: &str) -> Result<()> {
        if region.is_empty() {
            anyhow::bail!("Invalid AWS region. Please provide a valid AWS region. Example: us-west-2");
        }

        // Basic validation - ensure it looks like a region (contains a dash)
        if !region.contains('-') {
            anyhow::bail!(
                "AWS region '{}' doesn't look like a valid region (e.g., us-west-2, eu-west-1)",
                region
            );
        }

        Ok(())
    }

    /// Validate S3 bucket name according to AWS rules
    fn validate_bucket_name(bucket: &str) -> Result<()> {
        if bucket.is_empty() {
            anyhow::bail!(
                "Invalid S3 bucket name. Please provide a valid bucket name. Example: my-s3-bucket"
            );
        }

        if bucket.len() < 3 || bucket.len() > 63 {
            anyhow::bail!(
                "S3 bucket '{}' must be between 3 and 63 characters (got {})",
                bucket,
                bucket.len()
            );
        }

        let edge_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
        if !edge_ok(bucket.chars().next()) {
            anyhow::bail!(
                "S3 bucket '{}' must start with a lowercase letter or number",
                bucket
            );
        }
        if !edge_ok(bucket.chars().last()) {
            anyhow::bail!(
                "S3 bucket '{}' must end with a lowercase letter or number",
                bucket
            );
        }

        if let Some(c) = bucket
            .chars()
            .find(|c| !c.is_ascii_lowercase() && !c.is_ascii_digit() && *c != '-' && *c != '.')
        {
            anyhow::bail!(
                "S3 bucket '{}' contains invalid character '{}'. Only lowercase letters, numbers, hyphens, and periods are allowed",
                bucket,
                c
            );
        }

        if bucket.contains("..") {
            anyhow::bail!("S3 bucket '{}' cannot contain consecutive periods", bucket);
        }

        if bucket
            .split('.')
            .all(|part| part.parse::<u8>().is_ok() && !part.is_empty())
        {
            anyhow::bail!("S3 bucket '{}' cannot be formatted as an IP address", bucket);
        }

        Ok(())
    }

    /// Validate the key prefix; empty is allowed
    fn validate_key_prefix(prefix: &str) -> Result<()> {
        if prefix.is_empty() {
            return Ok(());
        }

        if prefix.contains("//") {
            anyhow::bail!(
                "S3 prefix '{}' contains consecutive slashes (not allowed)",
                prefix
            );
        }

        if prefix.contains("..") {
            anyhow::bail!(
                "S3 prefix '{}' contains '..' (not allowed for security)",
                prefix
            );
        }

        if prefix.starts_with('/') {
            anyhow::bail!(
                "S3 prefix '{}' should not start with '/' (use relative path)",
                prefix
            );
        }

        Ok(())
    }

    /// Destination key for a watched file: the prefix joined with its base name
    ///
    /// Only the file name is used, so relative and absolute spellings of the
    /// same file map to the same key. Returns `None` for paths without a file
    /// name (e.g. `/` or `..`) and for names that are not valid UTF-8, which
    /// have no exact key spelling.
    pub fn build_key(&self, source: &Path) -> Option<String> {
        let name = source.file_name()?.to_str()?;
        let prefix = self.key_prefix.trim_end_matches('/');
        if prefix.is_empty() {
            Some(name.to_string())
        } else {
            Some(format!("{}/{}", prefix, name))
        }
    }
}
