use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, ScanFailure};
use crate::report::ScanReport;

pub trait ReportSink {
    /// Write the report, returning every file created.
    fn persist(&self, report: &ScanReport) -> Result<Vec<PathBuf>>;
}

fn sink_error(path: &Path, err: impl std::fmt::Display) -> ScanFailure {
    ScanFailure::Sink(format!("{}: {err}", path.display()))
}

/// File name stem shared by every artifact of one run.
pub fn report_stem(report: &ScanReport) -> String {
    format!(
        "shai-hulud-scan-{}",
        report.information.started_at.format("%Y%m%d-%H%M%S")
    )
}

pub struct JsonReportSink {
    path: PathBuf,
}

impl JsonReportSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ReportSink for JsonReportSink {
    fn persist(&self, report: &ScanReport) -> Result<Vec<PathBuf>> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| sink_error(parent, e))?;
        }
        let content =
            serde_json::to_string_pretty(report).map_err(|e| sink_error(&self.path, e))?;
        fs::write(&self.path, content).map_err(|e| sink_error(&self.path, e))?;
        Ok(vec![self.path.clone()])
    }
}

pub struct CsvReportSink {
    dir: PathBuf,
    stem: Option<String>,
}

impl CsvReportSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            stem: None,
        }
    }

    pub fn with_stem(mut self, stem: impl Into<String>) -> Self {
        self.stem = Some(stem.into());
        self
    }

    fn write_rows<T: Serialize>(&self, path: &Path, header: &[&str], rows: &[T]) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path)
            .map_err(|e| sink_error(path, e))?;
        writer.write_record(header).map_err(|e| sink_error(path, e))?;
        for row in rows {
            writer.serialize(row).map_err(|e| sink_error(path, e))?;
        }
        writer.flush().map_err(|e| sink_error(path, e))?;
        Ok(())
    }
}

#[derive(Serialize)]
struct InfectedRow {
    path: String,
    matched_pattern: String,
}

#[derive(Serialize)]
struct PathRow {
    path: String,
}

#[derive(Serialize)]
struct WarningRow {
    path: String,
    package_name: String,
    installed_version: String,
    known_malicious_versions: String,
    version_match: String,
    reason: String,
}

#[derive(Serialize)]
struct ErrorRow {
    path: String,
    message: String,
}

#[derive(Serialize)]
struct MetadataRow {
    key: &'static str,
    value: String,
}

fn lossy(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn metadata_rows(report: &ScanReport) -> Vec<MetadataRow> {
    let info = &report.information;
    let env = &info.environment;
    let roots = info
        .scanned_roots
        .iter()
        .map(|r| format!("{} ({})", r.path.display(), r.kind))
        .collect::<Vec<_>>()
        .join("; ");

    let rows = vec![
        ("scan_id", info.scan_id.to_string()),
        ("started_at", info.started_at.to_rfc3339()),
        (
            "finished_at",
            info.finished_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
        ),
        (
            "duration_ms",
            info.duration_ms.map(|d| d.to_string()).unwrap_or_default(),
        ),
        ("files_scanned", info.files_scanned.to_string()),
        (
            "package_json_files_scanned",
            info.package_json_files_scanned.to_string(),
        ),
        ("infected_files", info.infected_files_count.to_string()),
        ("suspected_files", info.suspected_files_count.to_string()),
        ("npm_package_warnings", info.npm_package_warnings_count.to_string()),
        ("scan_errors", info.scan_errors_count.to_string()),
        (
            "credential_harvester_detected",
            info.credential_harvester_detected.to_string(),
        ),
        ("interrupted", info.interrupted.to_string()),
        ("may_be_safe", report.may_be_safe().to_string()),
        ("scanned_roots", roots),
        ("ioc_source", info.ioc_source.clone()),
        ("ioc_package_count", info.ioc_package_count.to_string()),
        ("hostname", env.hostname.clone().unwrap_or_default()),
        ("username", env.username.clone().unwrap_or_default()),
        ("os", env.os.clone()),
        ("arch", env.arch.clone()),
        (
            "working_directory",
            env.working_directory.as_deref().map(lossy).unwrap_or_default(),
        ),
        ("scanner_version", env.scanner_version.clone()),
    ];

    rows.into_iter()
        .map(|(key, value)| MetadataRow { key, value })
        .collect()
}

impl ReportSink for CsvReportSink {
    fn persist(&self, report: &ScanReport) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.dir).map_err(|e| sink_error(&self.dir, e))?;
        let stem = self.stem.clone().unwrap_or_else(|| report_stem(report));
        let file = |suffix: &str| self.dir.join(format!("{stem}-{suffix}.csv"));

        let infected: Vec<_> = report
            .infected_files
            .iter()
            .map(|f| InfectedRow {
                path: lossy(&f.path),
                matched_pattern: f.matched_pattern.clone(),
            })
            .collect();
        let suspected: Vec<_> = report
            .suspected_files
            .iter()
            .map(|f| PathRow { path: lossy(&f.path) })
            .collect();
        let warnings: Vec<_> = report
            .npm_package_warnings
            .iter()
            .map(|w| WarningRow {
                path: lossy(&w.path),
                package_name: w.package_name.clone(),
                installed_version: w.installed_version.clone().unwrap_or_default(),
                known_malicious_versions: w.known_malicious_versions.join(", "),
                version_match: w.version_match.to_string(),
                reason: w.reason.to_string(),
            })
            .collect();
        let errors: Vec<_> = report
            .scan_errors
            .iter()
            .map(|e| ErrorRow {
                path: lossy(&e.path),
                message: e.message.clone(),
            })
            .collect();

        let outputs = [
            file("infected-files"),
            file("suspected-files"),
            file("npm-package-warnings"),
            file("scan-errors"),
            file("metadata"),
        ];
        self.write_rows(&outputs[0], &["path", "matched_pattern"], &infected)?;
        self.write_rows(&outputs[1], &["path"], &suspected)?;
        self.write_rows(
            &outputs[2],
            &[
                "path",
                "package_name",
                "installed_version",
                "known_malicious_versions",
                "version_match",
                "reason",
            ],
            &warnings,
        )?;
        self.write_rows(&outputs[3], &["path", "message"], &errors)?;
        self.write_rows(&outputs[4], &["key", "value"], &metadata_rows(report))?;

        Ok(outputs.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{
        EnvironmentInfo, Finding, NpmPackageWarning, ReportAggregator, VersionMatch,
        WarningReason,
    };
    use tempfile::TempDir;

    fn sample_report() -> ScanReport {
        let agg = ReportAggregator::new(EnvironmentInfo::default(), "test feed".to_string(), 3);
        agg.record_file(true);
        agg.accumulate(Finding::NpmPackageWarning(NpmPackageWarning {
            path: PathBuf::from("/p/node_modules/x/package.json"),
            package_name: "x".to_string(),
            installed_version: None,
            known_malicious_versions: vec!["1.0.0".to_string(), "1.0.1".to_string()],
            version_match: VersionMatch::Unknown,
            reason: WarningReason::DirectoryNameMatch,
        }));
        agg.finalize()
    }

    #[test]
    fn test_json_sink_round_trips_report() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("out/report.json");
        let report = sample_report();

        let written = JsonReportSink::new(&path).persist(&report).unwrap();
        assert_eq!(written, vec![path.clone()]);

        let loaded: ScanReport = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded, report);
    }

    #[test]
    fn test_csv_sink_writes_one_file_per_kind() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let report = sample_report();

        let written = CsvReportSink::new(temp_dir.path())
            .with_stem("run")
            .persist(&report)
            .unwrap();
        assert_eq!(written.len(), 5);
        assert!(written.iter().all(|p| p.exists()));

        let warnings = fs::read_to_string(temp_dir.path().join("run-npm-package-warnings.csv")).unwrap();
        let mut lines = warnings.lines();
        assert_eq!(
            lines.next().unwrap(),
            "path,package_name,installed_version,known_malicious_versions,version_match,reason"
        );
        assert_eq!(
            lines.next().unwrap(),
            "/p/node_modules/x/package.json,x,,\"1.0.0, 1.0.1\",unknown,directory name matches package name"
        );

        let infected = fs::read_to_string(temp_dir.path().join("run-infected-files.csv")).unwrap();
        assert_eq!(infected.trim(), "path,matched_pattern");

        let metadata = fs::read_to_string(temp_dir.path().join("run-metadata.csv")).unwrap();
        assert!(metadata.contains("npm_package_warnings,1"));
        assert!(metadata.contains("ioc_source,test feed"));
    }
}
