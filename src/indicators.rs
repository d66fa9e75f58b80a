use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Result, ScanFailure};

pub const MANIFEST_FILE_NAME: &str = "package.json";

/// Payload files dropped by the worm's preinstall stage.
pub const DEFAULT_MALICIOUS_FILE_NAMES: &[&str] = &["setup_bun.js", "bun_environment.js"];

/// Substrings injected into infected manifests.
pub const DEFAULT_INFECTION_PATTERNS: &[&str] = &["node setup_bun.js"];

/// One raw row of the IOC feed, before version parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IocRecord {
    pub package_name: String,
    /// Comma separated exact versions, e.g. `"1.0.1, 1.0.2"`.
    pub package_versions: String,
}

impl IocRecord {
    pub fn new(package_name: impl Into<String>, package_versions: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            package_versions: package_versions.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompromisedPackageRecord {
    pub name: String,
    pub malicious_versions: BTreeSet<String>,
}

impl CompromisedPackageRecord {
    pub fn new<I, S>(name: impl Into<String>, versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            malicious_versions: versions.into_iter().map(Into::into).collect(),
        }
    }

    /// Exact string comparison; the feed lists concrete published versions,
    /// never ranges.
    pub fn is_malicious_version(&self, version: &str) -> bool {
        self.malicious_versions.contains(version)
    }
}

/// Split a feed version list (`"1.0.1, 1.0.2"`) into individual versions.
pub fn parse_versions(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

#[derive(Debug, Clone)]
pub struct IndicatorSet {
    malicious_file_names: BTreeSet<String>,
    infection_patterns: Vec<String>,
    packages: BTreeMap<String, CompromisedPackageRecord>,
}

impl IndicatorSet {
    pub fn new<F, P>(
        malicious_file_names: F,
        infection_patterns: P,
        packages: Vec<CompromisedPackageRecord>,
    ) -> Self
    where
        F: IntoIterator,
        F::Item: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        let mut merged: BTreeMap<String, CompromisedPackageRecord> = BTreeMap::new();
        for record in packages {
            match merged.get_mut(&record.name) {
                Some(existing) => existing.malicious_versions.extend(record.malicious_versions),
                None => {
                    merged.insert(record.name.clone(), record);
                }
            }
        }

        let mut infection_patterns: Vec<String> =
            infection_patterns.into_iter().map(Into::into).collect();
        let mut seen = BTreeSet::new();
        infection_patterns.retain(|p| !p.is_empty() && seen.insert(p.clone()));

        Self {
            malicious_file_names: malicious_file_names.into_iter().map(Into::into).collect(),
            infection_patterns,
            packages: merged,
        }
    }

    /// Build the set from feed rows using the built-in file names and
    /// infection patterns. Rows sharing a package name are merged.
    pub fn from_ioc_records<I>(records: I) -> Result<Self>
    where
        I: IntoIterator<Item = IocRecord>,
    {
        let mut packages = Vec::new();
        for record in records {
            let name = record.package_name.trim();
            if name.is_empty() {
                tracing::debug!("skipping IOC row without a package name");
                continue;
            }
            packages.push(CompromisedPackageRecord::new(
                name,
                parse_versions(&record.package_versions),
            ));
        }

        if packages.is_empty() {
            return Err(ScanFailure::IocEmpty);
        }

        Ok(Self::new(
            DEFAULT_MALICIOUS_FILE_NAMES.iter().copied(),
            DEFAULT_INFECTION_PATTERNS.iter().copied(),
            packages,
        ))
    }

    pub fn is_malicious_file_name(&self, name: &str) -> bool {
        self.malicious_file_names.contains(name)
    }

    pub fn infection_patterns(&self) -> &[String] {
        &self.infection_patterns
    }

    pub fn packages(&self) -> impl Iterator<Item = &CompromisedPackageRecord> {
        self.packages.values()
    }

    pub fn package(&self, name: &str) -> Option<&CompromisedPackageRecord> {
        self.packages.get(name)
    }

    pub fn package_count(&self) -> usize {
        self.packages.len()
    }

    /// Every base name the file matcher has to yield: the malicious payload
    /// names plus the manifest name.
    pub fn names_of_interest(&self) -> BTreeSet<String> {
        let mut names = self.malicious_file_names.clone();
        names.insert(MANIFEST_FILE_NAME.to_string());
        names
    }
}
