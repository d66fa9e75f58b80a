use std::path::PathBuf;
use thiserror::Error;

/// Conditions that abort a scan run without producing a report.
///
/// Everything recoverable (an unreadable manifest, a missing global package
/// directory) is reported through the scan report or the log instead.
#[derive(Debug, Error)]
pub enum ScanFailure {
    #[error("scan root does not exist: {}", .0.display())]
    RootNotFound(PathBuf),
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to fetch IOC feed from {url}: {message}")]
    IocFeed { url: String, message: String },
    #[error("failed to parse IOC records: {0}")]
    IocParse(String),
    #[error("IOC feed contained no compromised packages")]
    IocEmpty,
    #[error("failed to persist report: {0}")]
    Sink(String),
}

pub type Result<T> = std::result::Result<T, ScanFailure>;
