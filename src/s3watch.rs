use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

use s3_fswatcher::executor::Confirmation;
use s3_fswatcher::{ConfigOverrides, S3Client, SessionSummary, UploadOutcome, WatchConfig, WatchSession};

#[derive(Parser, Debug)]
#[command(
    name = "s3watch",
    version = env!("CARGO_PKG_VERSION"),
    about = "Watch a directory and upload every finished write to AWS S3",
    long_about = "Watches a single directory (non-recursively) and uploads each file that is written to it. \
                  Small files go up in one request, large files through multipart upload. \
                  Each upload is confirmed by polling until the object is visible. \
                  Configure via flags, environment variables or a .env file.",
    after_help = "Examples:\n  \
                  s3watch -s ./incoming -b my-bucket           # Watch ./incoming\n  \
                  s3watch -s ./incoming -b my-bucket -p data/  # Upload under data/\n  \
                  s3watch -t 104857600                         # 100 MiB multipart threshold\n\n\
                  Configuration (.env):\n  \
                  WATCH_DIR=./incoming\n  \
                  S3_BUCKET_NAME=my-bucket\n  \
                  S3_BUCKET_PREFIX=data/\n  \
                  AWS_REGION=us-west-2\n  \
                  UPLOAD_SIZE_THRESHOLD=52428800"
)]
struct Cli {
    /// Directory to watch (overrides WATCH_DIR)
    #[arg(long, short = 's')]
    source: Option<PathBuf>,

    /// Destination bucket (overrides S3_BUCKET_NAME)
    #[arg(long, short = 'b')]
    bucket: Option<String>,

    /// Key prefix (overrides S3_BUCKET_PREFIX)
    #[arg(long, short = 'p')]
    prefix: Option<String>,

    /// AWS region (overrides AWS_REGION)
    #[arg(long, short = 'r')]
    region: Option<String>,

    /// Custom S3 endpoint, e.g. for MinIO (overrides S3_ENDPOINT_URL)
    #[arg(long)]
    endpoint: Option<String>,

    /// Files larger than this many bytes use multipart upload (overrides UPLOAD_SIZE_THRESHOLD)
    #[arg(long, short = 't')]
    threshold: Option<u64>,

    /// Multipart part size in bytes (minimum 5 MiB)
    #[arg(long)]
    part_size: Option<u64>,

    /// Parts uploaded concurrently per multipart upload
    #[arg(long, short = 'c')]
    concurrency: Option<usize>,

    /// Seconds to wait for an uploaded object to become visible
    #[arg(long)]
    confirm_timeout: Option<u64>,

    /// Attempts per upload for transient failures
    #[arg(long)]
    retries: Option<u32>,

    /// Seconds in-flight uploads may run after Ctrl-C
    #[arg(long)]
    grace: Option<u64>,
}

impl From<Cli> for ConfigOverrides {
    fn from(cli: Cli) -> Self {
        Self {
            watch_dir: cli.source,
            bucket: cli.bucket,
            prefix: cli.prefix,
            region: cli.region,
            endpoint: cli.endpoint,
            size_threshold: cli.threshold,
            part_size: cli.part_size,
            part_concurrency: cli.concurrency,
            confirm_timeout: cli.confirm_timeout.map(Duration::from_secs),
            retry_attempts: cli.retries,
            shutdown_grace: cli.grace.map(Duration::from_secs),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file early to get LOG_LEVEL
    dotenv::dotenv().ok();

    let log_level = std::env::var("LOG_LEVEL")
        .ok()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(&log_level))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    info!("S3 Watch v{}", env!("CARGO_PKG_VERSION"));

    let config = WatchConfig::from_env(cli.into())?;
    let client = S3Client::new(&config)
        .await
        .context("Failed to create S3 client")?;

    println!(
        "{}",
        style(format!(
            "👀 Watching {} → s3://{}/{}",
            config.watch_dir.display(),
            config.bucket,
            config.key_prefix
        ))
        .cyan()
        .bold()
    );

    let (tx, rx) = mpsc::unbounded_channel();
    let session = WatchSession::new(config, Arc::new(client)).with_outcomes(tx);
    let handle = session.shutdown_handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, finishing in-flight uploads");
            handle.shutdown();
            // A second Ctrl-C skips the grace period.
            if tokio::signal::ctrl_c().await.is_ok() {
                handle.abort();
            }
        }
    });

    let printer = tokio::spawn(print_outcomes(rx));
    let started = std::time::Instant::now();
    let result = session.run().await;
    let _ = printer.await;

    match result {
        Ok(summary) => {
            print_summary(&summary, started.elapsed());
            Ok(())
        }
        Err(e) => {
            error!("Watch session ended: {}", e);
            Err(e).context("Directory watch failed")
        }
    }
}

/// Print one line per finished upload until the session drops its sender
async fn print_outcomes(mut rx: mpsc::UnboundedReceiver<UploadOutcome>) {
    while let Some(outcome) = rx.recv().await {
        let filename = outcome.source.display().to_string();
        match (&outcome.error, &outcome.confirmation) {
            (Some(err), _) => println!(
                "{} {} - {}",
                style("✗").red(),
                style(&filename).red(),
                style(&err.message).red()
            ),
            (None, Confirmation::Confirmed) => println!(
                "{} {} ({})",
                style("✓").green(),
                style(&filename).green(),
                style(format_size(outcome.size)).dim()
            ),
            (None, _) => println!(
                "{} {} ({})",
                style("⚠").yellow(),
                style(&filename).yellow(),
                style(format!("{}, not yet visible", format_size(outcome.size))).dim()
            ),
        }
    }
}

fn print_summary(summary: &SessionSummary, elapsed: Duration) {
    println!("\n{}", style("═".repeat(70)).dim());
    println!(
        "{}",
        style(format!(
            "Summary: {} uploaded, {} failed, {} skipped, {} unconfirmed",
            summary.succeeded, summary.failed, summary.skipped, summary.unconfirmed
        ))
        .bold()
    );

    if summary.bytes_uploaded > 0 {
        println!(
            "{}",
            style(format!(
                "Total uploaded: {} ({} bytes)",
                format_size(summary.bytes_uploaded),
                summary.bytes_uploaded
            ))
            .dim()
        );
    }

    println!(
        "{}",
        style(format!(
            "Events: {} received, {} forwarded, watched for {:.0}s",
            summary.events_received,
            summary.events_forwarded,
            elapsed.as_secs_f64()
        ))
        .dim()
    );
}

/// Format file size for display
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
    }

    #[test]
    fn test_cli_maps_to_overrides() {
        let cli = Cli::parse_from([
            "s3watch", "--source", "./in", "-b", "bucket", "-t", "100", "--grace", "5",
        ]);
        let overrides = ConfigOverrides::from(cli);
        assert_eq!(overrides.watch_dir, Some(PathBuf::from("./in")));
        assert_eq!(overrides.bucket.as_deref(), Some("bucket"));
        assert_eq!(overrides.size_threshold, Some(100));
        assert_eq!(overrides.shutdown_grace, Some(Duration::from_secs(5)));
        assert_eq!(overrides.prefix, None);
    }

    #[test]
    fn test_source_is_a_flag() {
        let cli = Cli::parse_from(["s3watch", "-s", "./in"]);
        assert_eq!(cli.source, Some(PathBuf::from("./in")));

        assert!(Cli::try_parse_from(["s3watch", "./in"]).is_err());
    }
}
