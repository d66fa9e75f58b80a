use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::ioc_feed::DEFAULT_IOC_URL;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Json,
    Csv,
    Both,
    None,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Config {
    #[serde(default = "default_ioc_url")]
    pub ioc_url: String,
    /// Local CSV feed; takes precedence over `ioc_url` when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ioc_file: Option<PathBuf>,
    #[serde(default)]
    pub include_global_packages: bool,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub report_format: ReportFormat,
}

fn default_ioc_url() -> String {
    DEFAULT_IOC_URL.to_string()
}

fn default_workers() -> usize {
    1
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".hulud").join("reports")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ioc_url: default_ioc_url(),
            ioc_file: None,
            include_global_packages: false,
            workers: default_workers(),
            follow_symlinks: false,
            output_dir: default_output_dir(),
            report_format: ReportFormat::default(),
        }
    }
}

impl Config {
    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path();
        let config_dir = config_path
            .parent()
            .ok_or_else(|| anyhow!("Invalid config path"))?;
        fs::create_dir_all(config_dir)?;

        let content = serde_json::to_string_pretty(self)?;
        fs::write(config_path, content)?;
        Ok(())
    }

    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path();
        if !config_path.exists() {
            return Err(anyhow!("No configuration found. Run 'hulud-scan init' first"));
        }

        let content = fs::read_to_string(&config_path)?;
        serde_json::from_str(&content)
            .map_err(|e| anyhow!("Invalid configuration in {}: {}", config_path.display(), e))
    }

    /// Saved configuration if present, defaults otherwise. A file that exists
    /// but does not parse is still an error.
    pub fn load_or_default() -> Result<Self> {
        if Self::get_config_path().exists() {
            Self::load()
        } else {
            Ok(Self::default())
        }
    }

    pub fn get_config_path() -> PathBuf {
        let mut path = PathBuf::from(".");
        path.push(".hulud");
        path.push("config.json");
        path
    }

    pub fn writes_json(&self) -> bool {
        matches!(self.report_format, ReportFormat::Json | ReportFormat::Both)
    }

    pub fn writes_csv(&self) -> bool {
        matches!(self.report_format, ReportFormat::Csv | ReportFormat::Both)
    }
}
