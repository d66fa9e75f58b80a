use anyhow::{anyhow, Result};
use colored::*;
use std::path::Path;
use std::process::Command;

use crate::display::display_report;
use crate::orchestrator::{ScanOptions, ScanOrchestrator};
use crate::report::{ScanReport, Verdict};

/// What the install wrapper should do around the package manager call.
#[derive(Debug, Clone)]
pub struct InstallPlan {
    pub package_manager: String,
    pub packages: Vec<String>,
    pub scan_before: bool,
    pub scan_after: bool,
    /// Skip the confirmation prompt on warning-only verdicts
    pub assume_yes: bool,
}

#[derive(Debug)]
pub enum InstallOutcome {
    /// The pre-install scan found infection, payloads or the harvester cache,
    /// or was interrupted before it finished.
    Blocked(ScanReport),
    /// Warnings were found and the user chose not to continue.
    Declined(ScanReport),
    Installed {
        before: Option<ScanReport>,
        after: Option<ScanReport>,
    },
}

impl InstallOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            InstallOutcome::Blocked(report) | InstallOutcome::Declined(report) => {
                report.exit_code()
            }
            InstallOutcome::Installed { after, .. } => {
                after.as_ref().map(ScanReport::exit_code).unwrap_or(0)
            }
        }
    }
}

/// Arguments for an install with lifecycle scripts disabled.
pub fn install_args(package_manager: &str, packages: &[String]) -> Result<Vec<String>> {
    let mut args: Vec<String> = match (package_manager, packages.is_empty()) {
        ("npm", _) => vec!["install".into()],
        ("pnpm" | "yarn" | "bun", true) => vec!["install".into()],
        ("pnpm" | "yarn" | "bun", false) => vec!["add".into()],
        _ => {
            return Err(anyhow!(
                "Unsupported package manager for install: {}",
                package_manager
            ))
        }
    };
    args.push("--ignore-scripts".into());
    args.extend(packages.iter().cloned());
    Ok(args)
}

pub struct InstallWrapper<'a> {
    orchestrator: &'a ScanOrchestrator<'a>,
    options: ScanOptions,
}

impl<'a> InstallWrapper<'a> {
    pub fn new(orchestrator: &'a ScanOrchestrator<'a>, options: ScanOptions) -> Self {
        Self {
            orchestrator,
            options,
        }
    }

    pub fn run(&self, project_root: &Path, plan: &InstallPlan) -> Result<InstallOutcome> {
        // Validate before scanning so a typo does not cost a full walk
        let args = install_args(&plan.package_manager, &plan.packages)?;

        let before = if plan.scan_before {
            println!("{}", "🔍 Scanning before install...".cyan().bold());
            let report = self.orchestrator.run(project_root, &self.options)?;
            display_report(&report);

            if report.blocks_install() {
                let reason = if report.information.interrupted {
                    "✗ Installation aborted: the scan did not finish"
                } else {
                    "✗ Installation aborted: compromise indicators present"
                };
                println!("\n{}", reason.red().bold());
                return Ok(InstallOutcome::Blocked(report));
            }
            if report.verdict() == Verdict::Warnings && !plan.assume_yes && !ask_confirmation()? {
                return Ok(InstallOutcome::Declined(report));
            }
            Some(report)
        } else {
            None
        };

        println!(
            "   Running {} {}",
            plan.package_manager.bright_white(),
            args.join(" ").bright_white()
        );
        let status = Command::new(&plan.package_manager)
            .args(&args)
            .current_dir(project_root)
            .status()
            .map_err(|e| anyhow!("Failed to run {}: {}", plan.package_manager, e))?;
        if !status.success() {
            return Err(anyhow!(
                "{} exited with {}",
                plan.package_manager,
                status
            ));
        }

        let after = if plan.scan_after {
            println!("{}", "🔍 Scanning after install...".cyan().bold());
            let report = self.orchestrator.run(project_root, &self.options)?;
            display_report(&report);
            Some(report)
        } else {
            None
        };

        Ok(InstallOutcome::Installed { before, after })
    }
}

fn ask_confirmation() -> Result<bool> {
    use inquire::Confirm;

    Confirm::new("Compromised package references were found. Install anyway?")
        .with_default(false)
        .prompt()
        .map_err(|e| anyhow!(e))
}
