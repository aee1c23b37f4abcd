//! Optional JSON configuration file.
//!
//! Every key is optional; command-line flags override file values, which override built-in
//! defaults (see `cli::build_config`).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub repository: Option<String>,
    pub workflow: Option<String>,
    #[serde(rename = "ref")]
    pub git_ref: Option<String>,
    pub inputs: BTreeMap<String, String>,
    pub api_url: Option<String>,
    pub resolve_attempts: Option<u32>,
    #[serde(with = "humantime_serde")]
    pub resolve_interval: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub deadline: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub watch_interval: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub log_tail_interval: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub observer_grace: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub clock_skew: Option<Duration>,
    pub strict_conclusion: Option<bool>,
    pub log_dir: Option<PathBuf>,
    pub console_log_level: Option<String>,
    pub notify: Option<bool>,
    pub lark_key: Option<String>,
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("dispatch-supervisor").join("config.json"))
}

/// Load `explicit` if given (it must exist), else the default path if it exists.
pub fn load(explicit: Option<&Path>) -> Result<FileConfig> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => match default_config_path() {
            Some(p) if p.exists() => p,
            _ => return Ok(FileConfig::default()),
        },
    };
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("read config file {}", path.display()))?;
    parse(&raw).with_context(|| format!("parse config file {}", path.display()))
}

fn parse(raw: &str) -> Result<FileConfig> {
    Ok(serde_json::from_str(raw)?)
}

/// Normalize a console log level the way operators tend to spell it (`WARN`, `Warning`).
pub fn normalize_level(level: &str) -> String {
    match level.trim().to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        other => other.to_string(),
    }
}
