use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, ScanFailure};
use crate::indicators::{IndicatorSet, IocRecord};

/// Consolidated Shai-Hulud 2.0 package list maintained by Datadog Security Labs.
pub const DEFAULT_IOC_URL: &str = "https://raw.githubusercontent.com/DataDog/indicators-of-compromise/main/shai-hulud-2.0/consolidated_iocs.csv";

/// Source of compromised package rows. A failing supplier is fatal to the run.
pub trait IocSupplier {
    fn fetch(&self) -> Result<Vec<IocRecord>>;

    /// Human readable origin, used in logs and report metadata.
    fn describe(&self) -> String;
}

/// Parse a CSV feed with at least `package_name` and `package_versions`
/// columns. Unknown columns are ignored.
pub fn parse_ioc_csv<R: Read>(reader: R) -> Result<Vec<IocRecord>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    csv_reader
        .deserialize()
        .collect::<std::result::Result<Vec<IocRecord>, _>>()
        .map_err(|e| ScanFailure::IocParse(e.to_string()))
}

pub struct CsvFileSupplier {
    path: PathBuf,
}

impl CsvFileSupplier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl IocSupplier for CsvFileSupplier {
    fn fetch(&self) -> Result<Vec<IocRecord>> {
        let file = File::open(&self.path).map_err(|source| ScanFailure::Io {
            path: self.path.clone(),
            source,
        })?;
        parse_ioc_csv(file)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

const FEED_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpFeedSupplier {
    url: String,
}

impl HttpFeedSupplier {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    fn feed_error(&self, message: impl ToString) -> ScanFailure {
        ScanFailure::IocFeed {
            url: self.url.clone(),
            message: message.to_string(),
        }
    }
}

impl IocSupplier for HttpFeedSupplier {
    fn fetch(&self) -> Result<Vec<IocRecord>> {
        let client = reqwest::blocking::Client::builder()
            .timeout(FEED_TIMEOUT)
            .user_agent(concat!("hulud-scan/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| self.feed_error(e))?;

        let response = client.get(&self.url).send().map_err(|e| self.feed_error(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(self.feed_error(format!("HTTP status {status}")));
        }

        let body = response.text().map_err(|e| self.feed_error(e))?;
        parse_ioc_csv(body.as_bytes())
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Fixed in-memory rows; handy for embedding callers and tests.
pub struct StaticSupplier {
    records: Vec<IocRecord>,
}

impl StaticSupplier {
    pub fn new(records: Vec<IocRecord>) -> Self {
        Self { records }
    }
}

impl IocSupplier for StaticSupplier {
    fn fetch(&self) -> Result<Vec<IocRecord>> {
        Ok(self.records.clone())
    }

    fn describe(&self) -> String {
        format!("{} static records", self.records.len())
    }
}

pub fn load_indicators(supplier: &dyn IocSupplier) -> Result<IndicatorSet> {
    let records = supplier.fetch()?;
    tracing::info!(
        source = %supplier.describe(),
        rows = records.len(),
        "loaded IOC feed"
    );
    IndicatorSet::from_ioc_records(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const FEED: &str = "package_name,package_versions,sources\n\
        @zapier/zapier-sdk,\"0.15.5, 0.15.6, 0.15.7\",datadog\n\
        posthog-node,4.18.1,\"koi, wiz\"\n";

    #[test]
    fn test_parse_ioc_csv_reads_known_columns() {
        let records = parse_ioc_csv(FEED.as_bytes()).expect("feed should parse");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].package_name, "@zapier/zapier-sdk");
        assert_eq!(records[0].package_versions, "0.15.5, 0.15.6, 0.15.7");
        assert_eq!(records[1].package_name, "posthog-node");
    }

    #[test]
    fn test_parse_ioc_csv_missing_column_is_error() {
        let result = parse_ioc_csv("name,version\nfoo,1.0.0\n".as_bytes());
        assert!(matches!(result, Err(ScanFailure::IocParse(_))));
    }

    #[test]
    fn test_csv_file_supplier_loads_indicators() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("iocs.csv");
        fs::write(&path, FEED).unwrap();

        let indicators = load_indicators(&CsvFileSupplier::new(&path)).expect("should load");
        assert_eq!(indicators.package_count(), 2);
        assert!(indicators
            .package("@zapier/zapier-sdk")
            .unwrap()
            .is_malicious_version("0.15.6"));
    }

    #[test]
    fn test_csv_file_supplier_missing_file_is_fatal() {
        let supplier = CsvFileSupplier::new("/definitely/not/here/iocs.csv");
        assert!(matches!(supplier.fetch(), Err(ScanFailure::Io { .. })));
    }
}
