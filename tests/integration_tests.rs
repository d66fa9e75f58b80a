#![allow(deprecated)]

use assert_cmd::Command;
use predicates::prelude::*;
use serial_test::serial;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const IOC_CSV: &str = "package_name,package_versions,sources\n\
evil-pkg,\"1.0.0, 1.0.1\",datadog\n\
@scope/stealer,2.3.4,koi\n";

/// Scratch layout for one CLI run: a project to scan, a fake home with no
/// harvester cache, a working directory for reports and config, and an IOC file.
struct Sandbox {
    project: TempDir,
    home: TempDir,
    workdir: TempDir,
    ioc_file: PathBuf,
}

impl Sandbox {
    fn new() -> Self {
        let project = TempDir::new().expect("Failed to create temp dir");
        let home = TempDir::new().expect("Failed to create temp dir");
        let workdir = TempDir::new().expect("Failed to create temp dir");
        let ioc_file = workdir.path().join("iocs.csv");
        fs::write(&ioc_file, IOC_CSV).expect("Failed to write IOC csv");

        fs::write(
            project.path().join("package.json"),
            r#"{"name":"test-project","version":"1.0.0","dependencies":{"lodash":"^4.17.21"}}"#,
        )
        .expect("Failed to write package.json");

        Self {
            project,
            home,
            workdir,
            ioc_file,
        }
    }

    fn write(&self, relative: &str, content: &str) {
        let path = self.project.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create dirs");
        }
        fs::write(path, content).expect("Failed to write file");
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("hulud-scan").unwrap();
        cmd.current_dir(self.workdir.path())
            .env("HOME", self.home.path())
            .env("USERPROFILE", self.home.path())
            .env_remove("RUST_LOG")
            .arg("--no-color");
        cmd
    }

    fn scan(&self) -> Command {
        let mut cmd = self.cmd();
        cmd.arg("scan")
            .arg(self.project.path())
            .arg("--ioc-file")
            .arg(&self.ioc_file)
            .arg("--no-progress");
        cmd
    }

    fn reports_dir(&self) -> PathBuf {
        self.workdir.path().join(".hulud").join("reports")
    }
}

fn files_in(dir: &Path) -> Vec<PathBuf> {
    match fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(_) => Vec::new(),
    }
}

#[test]
#[serial]
fn test_help() {
    let mut cmd = Command::cargo_bin("hulud-scan").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Shai-Hulud 2.0"));
}

#[test]
#[serial]
fn test_version() {
    let mut cmd = Command::cargo_bin("hulud-scan").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("hulud-scan"));
}

#[test]
#[serial]
fn test_clean_project_exits_zero() {
    let sandbox = Sandbox::new();
    sandbox.write("src/index.js", "console.log('hello')");

    sandbox
        .scan()
        .assert()
        .code(0)
        .stdout(predicate::str::contains("This system may be safe"));
}

#[test]
#[serial]
fn test_infected_manifest_exits_two() {
    let sandbox = Sandbox::new();
    sandbox.write(
        "node_modules/worm/package.json",
        r#"{"name":"worm","scripts":{"preinstall":"node setup_bun.js"}}"#,
    );

    sandbox
        .scan()
        .assert()
        .code(2)
        .stdout(predicate::str::contains("Infected manifests"))
        .stdout(predicate::str::contains("node setup_bun.js"));
}

#[test]
#[serial]
fn test_payload_file_exits_three() {
    let sandbox = Sandbox::new();
    sandbox.write("node_modules/worm/bun_environment.js", "/* payload */");

    sandbox
        .scan()
        .assert()
        .code(3)
        .stdout(predicate::str::contains("Suspected payload files"))
        .stdout(predicate::str::contains("bun_environment.js"));
}

#[test]
#[serial]
fn test_compromised_package_exits_one() {
    let sandbox = Sandbox::new();
    sandbox.write(
        "node_modules/evil-pkg/package.json",
        r#"{"name":"evil-pkg","version":"1.0.1"}"#,
    );

    sandbox
        .scan()
        .assert()
        .code(1)
        .stdout(predicate::str::contains("evil-pkg@1.0.1"))
        .stdout(predicate::str::contains("MALICIOUS VERSION"));
}

#[test]
#[serial]
fn test_infection_outranks_warnings() {
    let sandbox = Sandbox::new();
    sandbox.write(
        "node_modules/evil-pkg/package.json",
        r#"{"name":"evil-pkg","version":"9.9.9"}"#,
    );
    sandbox.write("node_modules/evil-pkg/setup_bun.js", "");
    sandbox.write(
        "package.json",
        r#"{"scripts":{"preinstall":"node setup_bun.js"}}"#,
    );

    sandbox.scan().assert().code(2);
}

#[test]
#[serial]
fn test_credential_harvester_cache_exits_four() {
    let sandbox = Sandbox::new();
    fs::create_dir_all(sandbox.home.path().join(".truffler-cache")).unwrap();

    sandbox
        .scan()
        .assert()
        .code(4)
        .stdout(predicate::str::contains("Credential harvester cache"));
}

#[test]
#[serial]
fn test_missing_root_is_fatal() {
    let sandbox = Sandbox::new();
    let mut cmd = sandbox.cmd();
    cmd.arg("scan")
        .arg(sandbox.project.path().join("does-not-exist"))
        .arg("--ioc-file")
        .arg(&sandbox.ioc_file)
        .arg("--no-progress")
        .assert()
        .code(10)
        .stderr(predicate::str::contains("Error:"));
}

#[test]
#[serial]
fn test_missing_ioc_file_is_fatal() {
    let sandbox = Sandbox::new();
    let mut cmd = sandbox.cmd();
    cmd.arg("scan")
        .arg(sandbox.project.path())
        .arg("--ioc-file")
        .arg(sandbox.workdir.path().join("missing.csv"))
        .assert()
        .code(10)
        .stderr(predicate::str::contains("Error:"));
    assert!(files_in(&sandbox.reports_dir()).is_empty());
}

#[test]
#[serial]
fn test_empty_ioc_feed_is_fatal() {
    let sandbox = Sandbox::new();
    fs::write(&sandbox.ioc_file, "package_name,package_versions,sources\n").unwrap();

    sandbox.scan().assert().code(10);
}

#[test]
#[serial]
fn test_json_report_written_by_default() {
    let sandbox = Sandbox::new();
    sandbox.write("node_modules/worm/setup_bun.js", "");

    sandbox
        .scan()
        .assert()
        .code(3)
        .stdout(predicate::str::contains("Report saved:"));

    let reports = files_in(&sandbox.reports_dir());
    assert_eq!(reports.len(), 1);
    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&reports[0]).unwrap()).unwrap();
    assert_eq!(json["information"]["suspected_files_count"], 1);
    assert_eq!(json["information"]["package_json_files_scanned"], 1);
    assert_eq!(json["information"]["files_scanned"], 2);
    assert_eq!(json["information"]["ioc_package_count"], 2);
    assert_eq!(json["suspected_files"].as_array().unwrap().len(), 1);
}

#[test]
#[serial]
fn test_csv_reports_written() {
    let sandbox = Sandbox::new();
    let out = sandbox.workdir.path().join("out");

    sandbox
        .scan()
        .arg("--format")
        .arg("csv")
        .arg("--output-dir")
        .arg(&out)
        .assert()
        .code(0);

    let names: Vec<String> = files_in(&out)
        .iter()
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    assert_eq!(names.len(), 5);
    for suffix in [
        "infected-files",
        "suspected-files",
        "npm-package-warnings",
        "scan-errors",
        "metadata",
    ] {
        assert!(
            names.iter().any(|n| n.ends_with(&format!("-{suffix}.csv"))),
            "missing {suffix} in {names:?}"
        );
    }
}

#[test]
#[serial]
fn test_format_none_writes_nothing() {
    let sandbox = Sandbox::new();

    sandbox
        .scan()
        .arg("--format")
        .arg("none")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("Report saved:").not());
    assert!(files_in(&sandbox.reports_dir()).is_empty());
}

#[test]
#[serial]
fn test_parallel_workers_match_sequential() {
    let sandbox = Sandbox::new();
    for i in 0..20 {
        sandbox.write(&format!("node_modules/pkg{i}/package.json"), r#"{"name":"ok"}"#);
    }
    sandbox.write("node_modules/pkg7/setup_bun.js", "");

    sandbox.scan().arg("--workers").arg("4").assert().code(3);
    sandbox.scan().arg("--workers").arg("1").assert().code(3);
}

#[test]
#[serial]
fn test_init_creates_config() {
    let sandbox = Sandbox::new();

    sandbox
        .cmd()
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration written"));

    let config_path = sandbox.workdir.path().join(".hulud").join("config.json");
    let content = fs::read_to_string(&config_path).expect("config.json should exist");
    assert!(content.contains("\"ioc_url\""));
    assert!(content.contains("\"workers\": 1"));

    sandbox
        .cmd()
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));
}

#[test]
#[serial]
fn test_saved_config_is_used() {
    let sandbox = Sandbox::new();
    fs::create_dir_all(sandbox.workdir.path().join(".hulud")).unwrap();
    let config = serde_json::json!({
        "ioc_file": sandbox.ioc_file,
        "report_format": "none",
    });
    fs::write(
        sandbox.workdir.path().join(".hulud").join("config.json"),
        config.to_string(),
    )
    .unwrap();

    sandbox
        .cmd()
        .arg("scan")
        .arg(sandbox.project.path())
        .arg("--no-progress")
        .assert()
        .code(0);
    assert!(files_in(&sandbox.reports_dir()).is_empty());
}

#[test]
#[serial]
fn test_install_blocked_on_infected_project() {
    let sandbox = Sandbox::new();
    sandbox.write(
        "package.json",
        r#"{"scripts":{"postinstall":"node setup_bun.js"}}"#,
    );

    let mut cmd = Command::cargo_bin("hulud-scan").unwrap();
    cmd.current_dir(sandbox.project.path())
        .env("HOME", sandbox.home.path())
        .env("USERPROFILE", sandbox.home.path())
        .arg("--no-color")
        .arg("install")
        .arg("--yes")
        .arg("--ioc-file")
        .arg(&sandbox.ioc_file)
        .assert()
        .code(2)
        .stdout(predicate::str::contains("Installation aborted"));
}

#[test]
#[serial]
fn test_install_rejects_unknown_package_manager() {
    let sandbox = Sandbox::new();

    let mut cmd = Command::cargo_bin("hulud-scan").unwrap();
    cmd.current_dir(sandbox.project.path())
        .env("HOME", sandbox.home.path())
        .arg("install")
        .arg("--pm")
        .arg("cargo")
        .arg("--ioc-file")
        .arg(&sandbox.ioc_file)
        .assert()
        .code(10)
        .stderr(predicate::str::contains("Unsupported package manager"));
}

#[test]
#[serial]
fn test_install_requires_a_scan() {
    let sandbox = Sandbox::new();

    let mut cmd = Command::cargo_bin("hulud-scan").unwrap();
    cmd.current_dir(sandbox.project.path())
        .env("HOME", sandbox.home.path())
        .arg("install")
        .arg("--no-scan-before")
        .arg("--ioc-file")
        .arg(&sandbox.ioc_file)
        .assert()
        .code(10)
        .stderr(predicate::str::contains("Refusing to install"));
}
