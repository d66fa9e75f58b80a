pub mod config;
pub mod display;
pub mod environment;
pub mod error;
pub mod indicators;
pub mod install;
pub mod ioc_feed;
pub mod matcher;
pub mod orchestrator;
pub mod report;
pub mod signature;
pub mod sink;

/// Build version stamped by build.rs (release tag, or `dev-<commit>`).
pub const VERSION: &str = env!("HULUD_VERSION");

pub use config::{Config, ReportFormat};
pub use environment::{EnvironmentProbe, SystemProbe};
pub use error::{Result, ScanFailure};
pub use indicators::{CompromisedPackageRecord, IndicatorSet, IocRecord};
pub use ioc_feed::{load_indicators, CsvFileSupplier, HttpFeedSupplier, IocSupplier};
pub use matcher::{FileDescriptor, FileMatcher};
pub use orchestrator::{scan_project, ScanOptions, ScanOrchestrator, ScanProgress};
pub use report::{Finding, ReportAggregator, ScanReport, Verdict, VersionMatch};
pub use signature::SignatureScanner;
pub use sink::{CsvReportSink, JsonReportSink, ReportSink};
