use std::fmt;
use std::path::{Path, PathBuf};

use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use thiserror::Error;

use super::UploadStrategy;

/// Service error codes worth another attempt.
const TRANSIENT_CODES: &[&str] = &[
    "SlowDown",
    "InternalError",
    "ServiceUnavailable",
    "RequestTimeout",
    "RequestTimeTooSkewed",
];

/// Errors that can occur while uploading a single file
///
/// Every variant is local to the upload task that produced it.
#[derive(Error, Debug)]
pub enum UploadError {
    /// File vanished or could not be read before the transfer started
    #[error("Source unavailable: {path}: {source}")]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// I/O or transport failure while talking to the store
    #[error("Transfer to s3://{bucket}/{key} failed: {message}")]
    Transfer {
        bucket: String,
        key: String,
        message: String,
        transient: bool,
    },

    /// Store ceiling exceeded for the chosen strategy
    #[error("Object too large for {strategy} upload: {size} bytes (max: {max} bytes)")]
    ObjectTooLarge {
        strategy: UploadStrategy,
        size: u64,
        max: u64,
    },

    /// Session asked in-flight uploads to stop
    #[error("Upload cancelled")]
    Cancelled,
}

/// Flat classification of [`UploadError`], handy for logs and assertions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadErrorKind {
    SourceUnavailable,
    Transfer,
    ObjectTooLarge,
    Cancelled,
}

impl fmt::Display for UploadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SourceUnavailable => "source_unavailable",
            Self::Transfer => "transfer",
            Self::ObjectTooLarge => "object_too_large",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

impl UploadError {
    pub fn kind(&self) -> UploadErrorKind {
        match self {
            Self::SourceUnavailable { .. } => UploadErrorKind::SourceUnavailable,
            Self::Transfer { .. } => UploadErrorKind::Transfer,
            Self::ObjectTooLarge { .. } => UploadErrorKind::ObjectTooLarge,
            Self::Cancelled => UploadErrorKind::Cancelled,
        }
    }

    /// Only transport hiccups are retried; size and source errors are permanent.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transfer { transient: true, .. })
    }

    /// Create an error from an IO error on the local source file
    pub fn from_io_error(error: std::io::Error, path: &Path) -> Self {
        Self::SourceUnavailable {
            path: path.to_path_buf(),
            source: error,
        }
    }

    /// Create a transfer error with a plain message
    pub fn transfer(bucket: &str, key: &str, message: impl Into<String>, transient: bool) -> Self {
        Self::Transfer {
            bucket: bucket.to_string(),
            key: key.to_string(),
            message: message.into(),
            transient,
        }
    }

    /// Classify an AWS SDK error
    ///
    /// `EntityTooLarge` becomes [`UploadError::ObjectTooLarge`] using the
    /// ceiling of the strategy in use. Timeouts, dispatch failures and
    /// throttling/5xx service codes are marked transient.
    pub fn from_sdk_error<E, R>(
        bucket: &str,
        key: &str,
        error: SdkError<E, R>,
        strategy: UploadStrategy,
        size: u64,
        max: u64,
    ) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error + 'static,
        R: fmt::Debug,
    {
        let code = error.as_service_error().and_then(|e| e.code());
        if code == Some("EntityTooLarge") {
            return Self::ObjectTooLarge {
                strategy,
                size,
                max,
            };
        }

        let transient = match &error {
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
                true
            }
            SdkError::ServiceError(_) => code.is_some_and(|c| TRANSIENT_CODES.contains(&c)),
            _ => false,
        };

        Self::transfer(
            bucket,
            key,
            DisplayErrorContext(&error).to_string(),
            transient,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_transience() {
        let err = UploadError::transfer("b", "k", "connection reset", true);
        assert_eq!(err.kind(), UploadErrorKind::Transfer);
        assert!(err.is_transient());

        let err = UploadError::transfer("b", "k", "access denied", false);
        assert!(!err.is_transient());

        let err = UploadError::ObjectTooLarge {
            strategy: UploadStrategy::Single,
            size: 10,
            max: 5,
        };
        assert_eq!(err.kind(), UploadErrorKind::ObjectTooLarge);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_from_io_error_keeps_path() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = UploadError::from_io_error(io, Path::new("/watch/a.txt"));
        assert_eq!(err.kind(), UploadErrorKind::SourceUnavailable);
        assert!(err.to_string().contains("/watch/a.txt"));
    }

    use aws_sdk_s3::error::{ConnectorError, ErrorMetadata};
    use aws_sdk_s3::operation::put_object::PutObjectError;

    fn service_error(code: &str) -> SdkError<PutObjectError, ()> {
        SdkError::service_error(
            PutObjectError::generic(ErrorMetadata::builder().code(code).message("boom").build()),
            (),
        )
    }

    fn classify(error: SdkError<PutObjectError, ()>) -> UploadError {
        UploadError::from_sdk_error("b", "k", error, UploadStrategy::Single, 10, 5)
    }

    #[test]
    fn test_entity_too_large_becomes_object_too_large() {
        let err = classify(service_error("EntityTooLarge"));
        assert!(matches!(
            err,
            UploadError::ObjectTooLarge {
                strategy: UploadStrategy::Single,
                size: 10,
                max: 5
            }
        ));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transient_sdk_errors() {
        for code in ["SlowDown", "InternalError", "ServiceUnavailable", "RequestTimeout"] {
            let err = classify(service_error(code));
            assert_eq!(err.kind(), UploadErrorKind::Transfer, "{}", code);
            assert!(err.is_transient(), "{} should be retried", code);
        }

        let err = classify(SdkError::timeout_error("read timed out"));
        assert!(err.is_transient());

        let err = classify(SdkError::dispatch_failure(ConnectorError::io(
            "connection reset".into(),
        )));
        assert!(err.is_transient());
    }

    #[test]
    fn test_other_service_codes_are_permanent() {
        for code in ["AccessDenied", "NoSuchBucket", "InvalidArgument"] {
            let err = classify(service_error(code));
            assert_eq!(err.kind(), UploadErrorKind::Transfer, "{}", code);
            assert!(!err.is_transient(), "{} should not be retried", code);
        }

        let err = classify(SdkError::construction_failure("bad request"));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_object_too_large_message() {
        let err = UploadError::ObjectTooLarge {
            strategy: UploadStrategy::Multipart,
            size: 20,
            max: 10,
        };
        assert_eq!(
            err.to_string(),
            "Object too large for multipart upload: 20 bytes (max: 10 bytes)"
        );
    }
}
