use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;

use crate::orchestrator::{ProgressObserver, ScanProgress};
use crate::report::{ScanReport, Verdict, VersionMatch};

const RULE: &str = "═══════════════════════════════════════════";
const LIST_LIMIT: usize = 10;

impl Verdict {
    fn label(&self) -> String {
        match self {
            Verdict::Clean => "✓ NO INDICATORS FOUND".green().bold().to_string(),
            Verdict::Warnings => "⚠ COMPROMISED PACKAGE REFERENCES".yellow().bold().to_string(),
            Verdict::CredentialHarvester => "⚠ CREDENTIAL HARVESTER CACHE".red().to_string(),
            Verdict::Suspected => "⚠ SUSPECTED PAYLOAD FILES".red().bold().to_string(),
            Verdict::Infected => "☠ INFECTED MANIFESTS".red().bold().to_string(),
        }
    }
}

/// Spinner fed by the orchestrator's per-file observer. The walk is lazy so
/// there is no total to show a percentage against.
pub fn progress_spinner() -> (ProgressBar, Arc<ProgressObserver>) {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.enable_steady_tick(Duration::from_millis(120));

    let handle = bar.clone();
    let observer: Arc<ProgressObserver> = Arc::new(move |progress: &ScanProgress<'_>| {
        handle.set_message(format!(
            "{} files scanned ({}) {}",
            progress.files_scanned,
            progress.root.kind,
            progress.path.display()
        ));
    });
    (bar, observer)
}

fn print_limited<T>(items: &[T], render: impl Fn(&T)) {
    for item in items.iter().take(LIST_LIMIT) {
        render(item);
    }
    if items.len() > LIST_LIMIT {
        println!(
            "  {} {} more (see the saved report)",
            "...".bright_black(),
            items.len() - LIST_LIMIT
        );
    }
}

pub fn display_report(report: &ScanReport) {
    let info = &report.information;
    let verdict = report.verdict();

    println!("\n{}", RULE.bright_blue());
    println!("{} {}", "🪱 Shai-Hulud 2.0 scan:".bright_cyan().bold(), verdict.label());
    println!("{}", RULE.bright_blue());

    for root in &info.scanned_roots {
        println!("  {} {} ({})", "•".cyan(), root.path.display(), root.kind);
    }
    println!(
        "  {} files matched, {} package.json scanned, {} errors",
        info.files_scanned.to_string().bright_white(),
        info.package_json_files_scanned.to_string().bright_white(),
        info.scan_errors_count.to_string().bright_white()
    );
    if let Some(ms) = info.duration_ms {
        println!("  finished in {:.1}s", ms as f64 / 1000.0);
    }
    if info.interrupted {
        println!("  {}", "Scan was interrupted; results are partial".yellow().bold());
    }

    if !report.infected_files.is_empty() {
        println!("\n{}", "☠ Infected manifests:".red().bold());
        print_limited(&report.infected_files, |f| {
            println!(
                "  {} {} {}",
                "☠".red().bold(),
                f.path.display().to_string().bright_white(),
                format!("[{}]", f.matched_pattern).yellow()
            );
        });
    }

    if !report.suspected_files.is_empty() {
        println!("\n{}", "🚨 Suspected payload files:".red().bold());
        print_limited(&report.suspected_files, |f| {
            println!("  {} {}", "⚠".red().bold(), f.path.display().to_string().bright_white());
        });
    }

    if info.credential_harvester_detected {
        println!(
            "\n{} {}",
            "🔑".red(),
            "Credential harvester cache found in home directory (~/.truffler-cache)"
                .red()
                .bold()
        );
    }

    if !report.npm_package_warnings.is_empty() {
        println!("\n{}", "⚠️  Compromised package references:".yellow().bold());
        print_limited(&report.npm_package_warnings, |w| {
            let version = w.installed_version.as_deref().unwrap_or("?");
            let status = match w.version_match {
                VersionMatch::Malicious => "MALICIOUS VERSION".red().bold(),
                VersionMatch::Safe => "version not listed".green(),
                VersionMatch::Unknown => "version unknown".yellow(),
            };
            println!(
                "  {} {}@{} {} ({}) {}",
                "•".yellow(),
                w.package_name.bright_white(),
                version,
                status,
                w.reason,
                w.path.display().to_string().bright_black()
            );
        });
    }

    if !report.scan_errors.is_empty() {
        println!("\n{}", "Unreadable entries:".bright_black().bold());
        print_limited(&report.scan_errors, |e| {
            println!("  {} {}: {}", "•".bright_black(), e.path.display(), e.message);
        });
    }

    println!("\n{}", RULE.bright_blue());
    if info.interrupted && report.verdict() == Verdict::Clean {
        println!(
            "{}",
            "Scan incomplete: nothing found so far, but the tree was not fully checked.".yellow()
        );
    } else if report.may_be_safe() {
        println!(
            "{}",
            "✓ No known Shai-Hulud 2.0 indicators found. This system may be safe.".green()
        );
    } else {
        println!(
            "{}",
            "Review the findings above, rotate exposed credentials and reinstall affected packages."
                .yellow()
        );
    }
}
