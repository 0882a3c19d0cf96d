//! Harness configuration
//!
//! Defaults, overridden by an optional YAML file, overridden by
//! `PERSISTCHECK_*` environment variables, overridden by CLI flags.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{HarnessError, HarnessResult};
use crate::playwright::Browser;
use crate::wait::Timeouts;

/// Prefix every harness-created user email starts with
pub const DEFAULT_CLEANUP_PREFIX: &str = "e2e-";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Base URL of the web UI
    pub app_url: String,

    /// Base URL of the HTTP API
    pub api_url: String,

    /// Screenshots, diagnostics and `test-results.json`
    pub results_dir: PathBuf,

    /// Directory scanned for suite plans
    pub plans_dir: PathBuf,

    pub timeouts: Timeouts,

    /// YAML account table; the seeded table is used when unset
    pub accounts_file: Option<PathBuf>,

    /// SQLite mirror of the application database. When unset, the data
    /// layer goes through the HTTP API.
    pub database_path: Option<PathBuf>,

    pub browser: Browser,

    pub headless: bool,

    /// Upper bound on concurrently running non-serial plans
    pub max_parallel: usize,

    pub cleanup_email_prefix: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            app_url: "http://localhost:5173".to_string(),
            api_url: "http://localhost:5655".to_string(),
            results_dir: PathBuf::from("test-results"),
            plans_dir: PathBuf::from("tests/plans"),
            timeouts: Timeouts::default(),
            accounts_file: None,
            database_path: None,
            browser: Browser::Chromium,
            headless: true,
            max_parallel: 4,
            cleanup_email_prefix: DEFAULT_CLEANUP_PREFIX.to_string(),
        }
    }
}

impl HarnessConfig {
    pub fn from_yaml(yaml: &str) -> HarnessResult<Self> {
        let config: HarnessConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path)?;
        debug!("Loaded harness config from {}", path.display());
        Self::from_yaml(&content)
    }

    /// Apply `PERSISTCHECK_*` overrides from the process environment
    pub fn apply_env(&mut self) -> HarnessResult<()> {
        self.apply_vars(std::env::vars())
    }

    /// Apply overrides from an explicit variable list
    pub fn apply_vars<I>(&mut self, vars: I) -> HarnessResult<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix("PERSISTCHECK_") else {
                continue;
            };
            match name {
                "APP_URL" => self.app_url = value,
                "API_URL" => self.api_url = value,
                "RESULTS_DIR" => self.results_dir = PathBuf::from(value),
                "PLANS_DIR" => self.plans_dir = PathBuf::from(value),
                "ACCOUNTS_FILE" => self.accounts_file = Some(PathBuf::from(value)),
                "DATABASE" => self.database_path = Some(PathBuf::from(value)),
                "BROWSER" => self.browser = value.parse()?,
                "HEADLESS" => self.headless = parse_bool(&key, &value)?,
                "MAX_PARALLEL" => self.max_parallel = parse_number(&key, &value)?,
                "CLEANUP_PREFIX" => self.cleanup_email_prefix = value,
                "TIMEOUT_SHORT_MS" => self.timeouts.short_ms = parse_number(&key, &value)?,
                "TIMEOUT_MEDIUM_MS" => self.timeouts.medium_ms = parse_number(&key, &value)?,
                "TIMEOUT_LONG_MS" => self.timeouts.long_ms = parse_number(&key, &value)?,
                "TIMEOUT_API_MS" => self.timeouts.api_response_ms = parse_number(&key, &value)?,
                "TIMEOUT_AUTH_MS" => self.timeouts.authentication_ms = parse_number(&key, &value)?,
                _ => debug!("Ignoring unknown setting {}", key),
            }
        }
        self.validate()
    }

    pub fn validate(&self) -> HarnessResult<()> {
        if self.max_parallel == 0 {
            return Err(HarnessError::Config("max_parallel must be at least 1".to_string()));
        }
        if self.cleanup_email_prefix.is_empty() {
            // An empty prefix would make global cleanup delete every user
            return Err(HarnessError::Config(
                "cleanup_email_prefix must not be empty".to_string(),
            ));
        }
        for (name, url) in [("app_url", &self.app_url), ("api_url", &self.api_url)] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(HarnessError::Config(format!("{name} is not an http(s) URL: {url}")));
            }
        }
        Ok(())
    }

    /// `app_url` joined with an absolute path
    pub fn app_path(&self, path: &str) -> String {
        join_url(&self.app_url, path)
    }

    pub fn api_path(&self, path: &str) -> String {
        join_url(&self.api_url, path)
    }
}

pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

fn parse_bool(key: &str, value: &str) -> HarnessResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(HarnessError::Config(format!("{key}: expected a boolean, got {value}"))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> HarnessResult<T> {
    value
        .parse()
        .map_err(|_| HarnessError::Config(format!("{key}: expected a number, got {value}")))
}
