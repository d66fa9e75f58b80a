use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanRootKind {
    ProjectPath,
    GlobalPackages,
    VersionManagerPackages,
}

impl fmt::Display for ScanRootKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ScanRootKind::ProjectPath => "project",
            ScanRootKind::GlobalPackages => "global packages",
            ScanRootKind::VersionManagerPackages => "version manager packages",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRoot {
    pub path: PathBuf,
    pub kind: ScanRootKind,
}

impl ScanRoot {
    pub fn new(path: impl Into<PathBuf>, kind: ScanRootKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// A manifest containing a known infection signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfectedFile {
    pub path: PathBuf,
    pub matched_pattern: String,
}

/// A file named like a known worm payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspectedFile {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionMatch {
    Malicious,
    Safe,
    Unknown,
}

impl fmt::Display for VersionMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            VersionMatch::Malicious => "malicious",
            VersionMatch::Safe => "safe",
            VersionMatch::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningReason {
    ReferenceFound,
    DirectoryNameMatch,
}

impl fmt::Display for WarningReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WarningReason::ReferenceFound => "reference found",
            WarningReason::DirectoryNameMatch => "directory name matches package name",
        };
        f.write_str(label)
    }
}

/// A manifest that references, or lives in a directory named after, a
/// package from the IOC feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NpmPackageWarning {
    pub path: PathBuf,
    pub package_name: String,
    pub installed_version: Option<String>,
    pub known_malicious_versions: Vec<String>,
    pub version_match: VersionMatch,
    pub reason: WarningReason,
}

/// A file or directory entry that could not be read. Never aborts a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanError {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    InfectedFile(InfectedFile),
    SuspectedFile(SuspectedFile),
    NpmPackageWarning(NpmPackageWarning),
    ScanError(ScanError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    pub hostname: Option<String>,
    pub username: Option<String>,
    pub os: String,
    pub arch: String,
    pub working_directory: Option<PathBuf>,
    pub scanner_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanInformation {
    pub scan_id: Uuid,
    pub files_scanned: usize,
    pub package_json_files_scanned: usize,
    pub infected_files_count: usize,
    pub suspected_files_count: usize,
    pub npm_package_warnings_count: usize,
    pub scan_errors_count: usize,
    pub scanned_roots: Vec<ScanRoot>,
    pub environment: EnvironmentInfo,
    pub ioc_source: String,
    pub ioc_package_count: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub credential_harvester_detected: bool,
    pub interrupted: bool,
}

/// Exit code of a run cut short by Ctrl+C before it found anything blocking.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Overall outcome, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verdict {
    Clean,
    Warnings,
    CredentialHarvester,
    Suspected,
    Infected,
}

impl Verdict {
    /// Process exit code shared by the CLI and the install wrapper.
    pub fn exit_code(self) -> i32 {
        match self {
            Verdict::Clean => 0,
            Verdict::Warnings => 1,
            Verdict::Infected => 2,
            Verdict::Suspected => 3,
            Verdict::CredentialHarvester => 4,
        }
    }

    /// Verdicts that must stop an install.
    pub fn blocks_install(self) -> bool {
        self > Verdict::Warnings
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub infected_files: Vec<InfectedFile>,
    pub suspected_files: Vec<SuspectedFile>,
    pub npm_package_warnings: Vec<NpmPackageWarning>,
    pub scan_errors: Vec<ScanError>,
    pub information: ScanInformation,
}

impl ScanReport {
    pub fn verdict(&self) -> Verdict {
        let info = &self.information;
        if info.infected_files_count > 0 {
            Verdict::Infected
        } else if info.suspected_files_count > 0 {
            Verdict::Suspected
        } else if info.credential_harvester_detected {
            Verdict::CredentialHarvester
        } else if info.npm_package_warnings_count > 0 {
            Verdict::Warnings
        } else {
            Verdict::Clean
        }
    }

    /// A partial walk never counts as safe, whatever it found so far.
    pub fn may_be_safe(&self) -> bool {
        !self.information.interrupted && self.verdict() == Verdict::Clean
    }

    /// Interrupted runs keep a blocking verdict's code; otherwise they exit
    /// with [`INTERRUPTED_EXIT_CODE`] so a partial clean result is never 0.
    pub fn exit_code(&self) -> i32 {
        let verdict = self.verdict();
        if self.information.interrupted && !verdict.blocks_install() {
            INTERRUPTED_EXIT_CODE
        } else {
            verdict.exit_code()
        }
    }

    pub fn blocks_install(&self) -> bool {
        self.information.interrupted || self.verdict().blocks_install()
    }

    /// Whether every counter matches the length of its finding list.
    pub fn counts_are_consistent(&self) -> bool {
        let info = &self.information;
        info.infected_files_count == self.infected_files.len()
            && info.suspected_files_count == self.suspected_files.len()
            && info.npm_package_warnings_count == self.npm_package_warnings.len()
            && info.scan_errors_count == self.scan_errors.len()
    }
}

#[derive(Debug, Default)]
struct Accumulated {
    infected_files: Vec<InfectedFile>,
    suspected_files: Vec<SuspectedFile>,
    npm_package_warnings: Vec<NpmPackageWarning>,
    scan_errors: Vec<ScanError>,
    files_scanned: usize,
    package_json_files_scanned: usize,
    scanned_roots: Vec<ScanRoot>,
    credential_harvester_detected: bool,
    interrupted: bool,
}

/// Append-only collector shared by every scan root and worker of one run.
/// All methods take `&self` and are safe to call from several threads.
pub struct ReportAggregator {
    scan_id: Uuid,
    started_at: DateTime<Utc>,
    environment: EnvironmentInfo,
    ioc_source: String,
    ioc_package_count: usize,
    state: Mutex<Accumulated>,
}

impl ReportAggregator {
    pub fn new(environment: EnvironmentInfo, ioc_source: String, ioc_package_count: usize) -> Self {
        Self {
            scan_id: Uuid::new_v4(),
            started_at: Utc::now(),
            environment,
            ioc_source,
            ioc_package_count,
            state: Mutex::new(Accumulated::default()),
        }
    }

    pub fn accumulate(&self, finding: Finding) {
        let mut state = self.state.lock();
        match finding {
            Finding::InfectedFile(f) => state.infected_files.push(f),
            Finding::SuspectedFile(f) => state.suspected_files.push(f),
            Finding::NpmPackageWarning(f) => state.npm_package_warnings.push(f),
            Finding::ScanError(f) => state.scan_errors.push(f),
        }
    }

    pub fn accumulate_all(&self, findings: impl IntoIterator<Item = Finding>) {
        for finding in findings {
            self.accumulate(finding);
        }
    }

    /// Count one visited file. Called once per file, regardless of how many
    /// findings it produced.
    pub fn record_file(&self, is_manifest: bool) {
        let mut state = self.state.lock();
        state.files_scanned += 1;
        if is_manifest {
            state.package_json_files_scanned += 1;
        }
    }

    pub fn record_root(&self, root: ScanRoot) {
        self.state.lock().scanned_roots.push(root);
    }

    pub fn set_credential_harvester_detected(&self, detected: bool) {
        self.state.lock().credential_harvester_detected = detected;
    }

    pub fn mark_interrupted(&self) {
        self.state.lock().interrupted = true;
    }

    pub fn files_scanned(&self) -> usize {
        self.state.lock().files_scanned
    }

    /// Freeze the report: counts are derived from the collected lists and the
    /// end time and duration are stamped.
    pub fn finalize(self) -> ScanReport {
        let state = self.state.into_inner();
        let finished_at = Utc::now();
        let duration_ms = (finished_at - self.started_at).num_milliseconds().max(0) as u64;

        let information = ScanInformation {
            scan_id: self.scan_id,
            files_scanned: state.files_scanned,
            package_json_files_scanned: state.package_json_files_scanned,
            infected_files_count: state.infected_files.len(),
            suspected_files_count: state.suspected_files.len(),
            npm_package_warnings_count: state.npm_package_warnings.len(),
            scan_errors_count: state.scan_errors.len(),
            scanned_roots: state.scanned_roots,
            environment: self.environment,
            ioc_source: self.ioc_source,
            ioc_package_count: self.ioc_package_count,
            started_at: self.started_at,
            finished_at: Some(finished_at),
            duration_ms: Some(duration_ms),
            credential_harvester_detected: state.credential_harvester_detected,
            interrupted: state.interrupted,
        };

        ScanReport {
            infected_files: state.infected_files,
            suspected_files: state.suspected_files,
            npm_package_warnings: state.npm_package_warnings,
            scan_errors: state.scan_errors,
            information,
        }
    }
}
