use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::report::EnvironmentInfo;

/// Directory created under the user's home by the worm's bundled secret
/// scanner.
pub const CREDENTIAL_HARVESTER_CACHE_DIR: &str = ".truffler-cache";

/// Everything the orchestrator needs to know about the host besides the
/// project tree. Failures are returned as messages; callers downgrade them to
/// warnings.
pub trait EnvironmentProbe: Sync {
    fn home_dir(&self) -> Option<PathBuf>;

    /// Directory the package manager installs global packages into.
    fn global_packages_dir(&self) -> Result<PathBuf, String>;

    /// Directory holding the node versions managed by nvm, if installed.
    fn version_manager_dir(&self) -> Result<PathBuf, String>;

    fn environment_info(&self) -> EnvironmentInfo;

    fn credential_harvester_present(&self) -> bool {
        self.home_dir()
            .map(|home| home.join(CREDENTIAL_HARVESTER_CACHE_DIR).is_dir())
            .unwrap_or(false)
    }
}

/// Probe backed by the real process environment and the `npm` binary.
#[derive(Debug, Default, Clone)]
pub struct SystemProbe;

fn npm_binary() -> &'static str {
    if cfg!(windows) {
        "npm.cmd"
    } else {
        "npm"
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn existing_dir(path: PathBuf) -> Result<PathBuf, String> {
    if path.is_dir() {
        Ok(path)
    } else {
        Err(format!("{} does not exist", path.display()))
    }
}

impl EnvironmentProbe for SystemProbe {
    fn home_dir(&self) -> Option<PathBuf> {
        non_empty_var("HOME")
            .or_else(|| non_empty_var("USERPROFILE"))
            .map(PathBuf::from)
    }

    fn global_packages_dir(&self) -> Result<PathBuf, String> {
        let output = Command::new(npm_binary())
            .args(["root", "-g"])
            .output()
            .map_err(|e| format!("failed to run npm: {e}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("npm root -g failed: {}", stderr.trim()));
        }

        let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if root.is_empty() {
            return Err("npm root -g returned nothing".to_string());
        }
        existing_dir(PathBuf::from(root))
    }

    fn version_manager_dir(&self) -> Result<PathBuf, String> {
        // nvm-windows keeps versions directly under NVM_HOME
        if let Some(nvm_home) = non_empty_var("NVM_HOME") {
            return existing_dir(PathBuf::from(nvm_home));
        }
        if let Some(nvm_dir) = non_empty_var("NVM_DIR") {
            return existing_dir(Path::new(&nvm_dir).join("versions").join("node"));
        }
        let home = self
            .home_dir()
            .ok_or_else(|| "home directory is unknown".to_string())?;
        existing_dir(home.join(".nvm").join("versions").join("node"))
    }

    fn environment_info(&self) -> EnvironmentInfo {
        EnvironmentInfo {
            hostname: non_empty_var("HOSTNAME").or_else(|| non_empty_var("COMPUTERNAME")),
            username: non_empty_var("USER").or_else(|| non_empty_var("USERNAME")),
            os: env::consts::OS.to_string(),
            arch: env::consts::ARCH.to_string(),
            working_directory: env::current_dir().ok(),
            scanner_version: crate::VERSION.to_string(),
        }
    }
}
