use rayon::iter::{ParallelBridge, ParallelIterator};
use std::io::ErrorKind;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::environment::{EnvironmentProbe, SystemProbe};
use crate::error::{Result, ScanFailure};
use crate::indicators::IndicatorSet;
use crate::matcher::{EntryError, FileDescriptor, FileMatcher};
use crate::report::{Finding, ReportAggregator, ScanError, ScanReport, ScanRoot, ScanRootKind};
use crate::signature::SignatureScanner;

/// Passed to the progress observer once per visited file.
#[derive(Debug)]
pub struct ScanProgress<'a> {
    pub root: &'a ScanRoot,
    pub path: &'a Path,
    pub files_scanned: usize,
}

pub type ProgressObserver = dyn Fn(&ScanProgress<'_>) + Send + Sync;

#[derive(Clone)]
pub struct ScanOptions {
    pub include_global_packages: bool,
    /// 1 keeps the sequential walk; more spins up a bounded worker pool.
    pub workers: usize,
    pub follow_symlinks: bool,
    pub progress: Option<Arc<ProgressObserver>>,
    /// When set to true the run stops picking up new files and returns a
    /// partial report flagged as interrupted.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            include_global_packages: false,
            workers: 1,
            follow_symlinks: false,
            progress: None,
            cancel: None,
        }
    }
}

impl ScanOptions {
    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

pub struct ScanOrchestrator<'a> {
    indicators: &'a IndicatorSet,
    probe: &'a dyn EnvironmentProbe,
    ioc_source: String,
}

impl<'a> ScanOrchestrator<'a> {
    pub fn new(indicators: &'a IndicatorSet, probe: &'a dyn EnvironmentProbe) -> Self {
        Self {
            indicators,
            probe,
            ioc_source: String::new(),
        }
    }

    pub fn with_ioc_source(mut self, source: impl Into<String>) -> Self {
        self.ioc_source = source.into();
        self
    }

    pub fn run(&self, project_root: &Path, options: &ScanOptions) -> Result<ScanReport> {
        let project_root = project_root.canonicalize().map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                ScanFailure::RootNotFound(project_root.to_path_buf())
            } else {
                ScanFailure::Io {
                    path: project_root.to_path_buf(),
                    source,
                }
            }
        })?;

        let mut roots = vec![ScanRoot::new(project_root, ScanRootKind::ProjectPath)];
        if options.include_global_packages {
            roots.extend(self.optional_roots());
        }

        let aggregator = ReportAggregator::new(
            self.probe.environment_info(),
            self.ioc_source.clone(),
            self.indicators.package_count(),
        );
        let pool = worker_pool(options.workers);
        let matcher = FileMatcher::new().with_follow_symlinks(options.follow_symlinks);
        let names = self.indicators.names_of_interest();
        // Set only when cancellation actually skipped work
        let cut_short = AtomicBool::new(false);

        for root in &roots {
            if options.cancelled() {
                cut_short.store(true, Ordering::Relaxed);
                break;
            }
            let files = match matcher.find(&root.path, &names) {
                Ok(files) => files,
                Err(e) if root.kind == ScanRootKind::ProjectPath => return Err(e),
                Err(e) => {
                    tracing::warn!(root = %root.path.display(), error = %e, "skipping {} root", root.kind);
                    continue;
                }
            };

            tracing::info!(root = %root.path.display(), kind = %root.kind, "scanning");
            aggregator.record_root(root.clone());

            let files = files.take_while(|_| {
                let cancelled = options.cancelled();
                if cancelled {
                    cut_short.store(true, Ordering::Relaxed);
                }
                !cancelled
            });
            match &pool {
                Some(pool) => pool.install(|| {
                    files
                        .par_bridge()
                        .for_each(|item| self.process(root, item, &aggregator, options));
                }),
                None => files.for_each(|item| self.process(root, item, &aggregator, options)),
            }
        }

        aggregator.set_credential_harvester_detected(self.probe.credential_harvester_present());
        if cut_short.load(Ordering::Relaxed) {
            tracing::warn!("scan interrupted, report is partial");
            aggregator.mark_interrupted();
        }

        Ok(aggregator.finalize())
    }

    /// Global and version-manager package directories. Each is optional;
    /// failures are logged and the root is left out.
    fn optional_roots(&self) -> Vec<ScanRoot> {
        let candidates = [
            (ScanRootKind::GlobalPackages, self.probe.global_packages_dir()),
            (
                ScanRootKind::VersionManagerPackages,
                self.probe.version_manager_dir(),
            ),
        ];

        let mut roots = Vec::new();
        for (kind, resolved) in candidates {
            match resolved {
                Ok(path) => roots.push(ScanRoot::new(path, kind)),
                Err(message) => tracing::warn!("{kind} directory unavailable: {message}"),
            }
        }
        roots
    }

    fn process(
        &self,
        root: &ScanRoot,
        item: std::result::Result<FileDescriptor, EntryError>,
        aggregator: &ReportAggregator,
        options: &ScanOptions,
    ) {
        let file = match item {
            Ok(file) => file,
            Err(entry) => {
                aggregator.accumulate(Finding::ScanError(ScanError {
                    path: entry.path,
                    message: entry.message,
                }));
                return;
            }
        };

        let findings = SignatureScanner::new(self.indicators).scan(&file);
        aggregator.record_file(file.is_manifest());
        aggregator.accumulate_all(findings);

        if let Some(observer) = &options.progress {
            observer(&ScanProgress {
                root,
                path: file.path(),
                files_scanned: aggregator.files_scanned(),
            });
        }
    }
}

fn worker_pool(workers: usize) -> Option<rayon::ThreadPool> {
    if workers <= 1 {
        return None;
    }
    match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => Some(pool),
        Err(e) => {
            tracing::warn!("falling back to sequential scan: {e}");
            None
        }
    }
}

/// Scan `project_root` against the host environment.
pub fn scan_project(
    project_root: &Path,
    indicators: &IndicatorSet,
    ioc_source: &str,
    options: &ScanOptions,
) -> Result<ScanReport> {
    ScanOrchestrator::new(indicators, &SystemProbe)
        .with_ioc_source(ioc_source)
        .run(project_root, options)
}
