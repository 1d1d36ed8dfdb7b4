use crate::Result;
use crate::engine::{GovernorConfig, RetryConfig};
use crate::github::DEFAULT_API_URL;
use camino::{Utf8Path, Utf8PathBuf};
use core::time::Duration;
use ohno::{IntoAppError, app_err};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;

/// The default configuration TOML content, embedded from `default_config.toml`
pub const DEFAULT_CONFIG_TOML: &str = include_str!("../../default_config.toml");

/// File looked up in the current directory when no `--config` is given.
pub const CONFIG_FILE_NAME: &str = "survey.toml";

const LOG_TARGET: &str = "    config";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Root of the GitHub REST API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Number of items processed concurrently
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Sustained request rate shared by all workers
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,

    /// Requests allowed above the sustained rate after an idle period
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Most pages followed for one list endpoint
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// How often budgets are logged during a survey; zero disables the monitor
    #[serde(default = "default_monitor_interval", with = "humantime_serde")]
    pub monitor_interval: Duration,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub governor: GovernorConfig,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

const fn default_workers() -> usize {
    8
}

const fn default_requests_per_second() -> f64 {
    10.0
}

const fn default_burst() -> u32 {
    10
}

const fn default_max_pages() -> u32 {
    100
}

const fn default_monitor_interval() -> Duration {
    Duration::from_secs(60)
}

impl Config {
    /// Load configuration from a file or use defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or holds invalid values
    pub fn load(base_dir: &Utf8Path, config_path: Option<&Utf8PathBuf>) -> Result<Self> {
        let (final_path, text) = if let Some(path) = config_path {
            let text = fs::read_to_string(path).into_app_err_with(|| format!("reading configuration file '{path}'"))?;
            (path.clone(), text)
        } else {
            let path = base_dir.join(CONFIG_FILE_NAME);
            match fs::read_to_string(&path) {
                Ok(text) => (path, text),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    log::debug!(target: LOG_TARGET, "No {CONFIG_FILE_NAME} found in '{base_dir}', using the default configuration");
                    return Ok(Self::default());
                }
                Err(e) => return Err(e).into_app_err_with(|| format!("reading configuration file '{path}'")),
            }
        };

        let config: Self = toml::from_str(&text).into_app_err_with(|| format!("parsing configuration file '{final_path}'"))?;
        config.validate()?;

        Ok(config)
    }

    /// Save the default configuration to a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written
    pub fn save_default(output_path: &Utf8Path) -> Result<()> {
        fs::write(output_path, DEFAULT_CONFIG_TOML).into_app_err_with(|| format!("writing default configuration to {output_path}"))?;
        Ok(())
    }

    /// Apply command-line overrides, then re-check the result.
    ///
    /// # Errors
    ///
    /// Returns an error if an override makes the configuration invalid
    pub fn with_overrides(mut self, api_url: Option<&str>, workers: Option<usize>) -> Result<Self> {
        if let Some(api_url) = api_url {
            self.api_url = api_url.to_string();
        }

        if let Some(workers) = workers {
            self.workers = workers;
        }

        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(app_err!("workers must be at least 1"));
        }

        if !(self.requests_per_second.is_finite() && self.requests_per_second > 0.0) {
            return Err(app_err!(
                "requests_per_second must be greater than 0, got {}",
                self.requests_per_second
            ));
        }

        if self.burst == 0 {
            return Err(app_err!("burst must be at least 1"));
        }

        if self.max_pages == 0 {
            return Err(app_err!("max_pages must be at least 1"));
        }

        if self.api_url.trim().is_empty() {
            return Err(app_err!("api_url must not be empty"));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG_TOML).expect("default_config.toml should be valid TOML that deserializes to Config")
    }
}
