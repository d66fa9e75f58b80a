use serde_json::Value;
use std::path::Path;

use crate::indicators::{CompromisedPackageRecord, IndicatorSet};
use crate::matcher::FileDescriptor;
use crate::report::{
    Finding, InfectedFile, NpmPackageWarning, ScanError, SuspectedFile, VersionMatch,
    WarningReason,
};

/// Classifies single files against an [`IndicatorSet`].
///
/// Three independent checks run per file:
/// - payload file name (any file)
/// - infection substring (manifests only)
/// - compromised package reference or directory (manifests only)
pub struct SignatureScanner<'a> {
    indicators: &'a IndicatorSet,
}

impl<'a> SignatureScanner<'a> {
    pub fn new(indicators: &'a IndicatorSet) -> Self {
        Self { indicators }
    }

    pub fn scan(&self, file: &FileDescriptor) -> Vec<Finding> {
        let mut findings = Vec::new();

        if self.indicators.is_malicious_file_name(file.base_name()) {
            findings.push(Finding::SuspectedFile(SuspectedFile {
                path: file.path().to_path_buf(),
            }));
        }

        if !file.is_manifest() {
            return findings;
        }

        let content = match file.content() {
            Ok(content) => content,
            Err(message) => {
                findings.push(Finding::ScanError(ScanError {
                    path: file.path().to_path_buf(),
                    message,
                }));
                return findings;
            }
        };

        for pattern in self.indicators.infection_patterns() {
            if content.contains(pattern.as_str()) {
                findings.push(Finding::InfectedFile(InfectedFile {
                    path: file.path().to_path_buf(),
                    matched_pattern: pattern.clone(),
                }));
            }
        }

        self.check_compromised_packages(file, content, &mut findings);
        findings
    }

    fn check_compromised_packages(
        &self,
        file: &FileDescriptor,
        content: &str,
        findings: &mut Vec<Finding>,
    ) {
        let directory = normalized_directory(file.directory());
        // Parsed at most once, and only when some record matches.
        let mut installed_version: Option<Option<String>> = None;

        for record in self.indicators.packages() {
            let referenced = content.contains(&format!("\"{}\"", record.name));
            // Suffix match on the parent path. Any unrelated directory that
            // happens to share a compromised package's name also matches.
            let directory_match = directory.ends_with(&format!("/{}", record.name));
            if !referenced && !directory_match {
                continue;
            }

            let version = installed_version
                .get_or_insert_with(|| manifest_version(content))
                .clone();
            let version_match = classify_version(record, version.as_deref());

            let reasons = [
                (referenced, WarningReason::ReferenceFound),
                (directory_match, WarningReason::DirectoryNameMatch),
            ];
            for (_, reason) in reasons.into_iter().filter(|(fired, _)| *fired) {
                findings.push(Finding::NpmPackageWarning(NpmPackageWarning {
                    path: file.path().to_path_buf(),
                    package_name: record.name.clone(),
                    installed_version: version.clone(),
                    known_malicious_versions: record.malicious_versions.iter().cloned().collect(),
                    version_match,
                    reason,
                }));
            }
        }
    }
}

pub fn classify_version(record: &CompromisedPackageRecord, installed: Option<&str>) -> VersionMatch {
    match installed {
        Some(version) if record.is_malicious_version(version) => VersionMatch::Malicious,
        Some(_) => VersionMatch::Safe,
        None => VersionMatch::Unknown,
    }
}

/// Best-effort read of the manifest's own `version` field.
fn manifest_version(content: &str) -> Option<String> {
    let json: Value = serde_json::from_str(content.trim_start_matches('\u{feff}')).ok()?;
    json.get("version")
        .and_then(|v| v.as_str())
        .map(String::from)
}

fn normalized_directory(dir: &Path) -> String {
    let normalized = dir.to_string_lossy().replace('\\', "/");
    normalized.trim_end_matches('/').to_string()
}
