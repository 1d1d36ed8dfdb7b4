//! Setup shared by every command that talks to GitHub.

use super::config::Config;
use crate::Result;
use crate::engine::{RateGovernor, RateLimiter, RetryExecutor, SharedCache};
use crate::github::{Client, Fetcher};
use crate::survey::SurveyContext;
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, ValueEnum};
use std::sync::Arc;

const LOG_TARGET: &str = "  commands";

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// No logging output
    None,

    /// Only error messages
    Error,

    /// Warning and error messages
    Warn,

    /// Info, warning, and error messages
    Info,

    /// Debug, info, warning, and error messages
    Debug,

    /// Trace, debug, info, warning, and error messages
    Trace,
}

/// Arguments shared by every command that talks to GitHub
#[derive(Args, Debug)]
pub struct CommonArgs {
    /// GitHub personal access token
    #[arg(long, value_name = "TOKEN", env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Root of the GitHub REST API (overrides the configuration file)
    #[arg(long, value_name = "URL")]
    pub api_url: Option<String>,

    /// Path to configuration file (default is `survey.toml`)
    #[arg(long, short = 'c', value_name = "PATH")]
    pub config: Option<Utf8PathBuf>,

    /// Set the logging level for diagnostic output
    #[arg(long, value_name = "LEVEL", default_value = "none", global = true)]
    pub log_level: LogLevel,
}

/// Everything a command needs to reach GitHub, built once per invocation.
#[derive(Debug)]
pub struct Session {
    pub config: Config,
    pub fetcher: Fetcher,
}

impl Session {
    /// Initialize logging, load the configuration, and build the client stack.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client cannot be built
    pub fn new(args: &CommonArgs, workers: Option<usize>) -> Result<Self> {
        init_logging(args.log_level);

        let config = Config::load(Utf8Path::new("."), args.config.as_ref())?.with_overrides(args.api_url.as_deref(), workers)?;

        if args.github_token.is_none() {
            log::warn!(target: LOG_TARGET, "No GitHub token provided, unauthenticated requests are limited to 60 per hour");
        }

        let governor = Arc::new(RateGovernor::new(config.governor));
        let client = Client::new(args.github_token.as_deref(), config.api_url.as_str(), governor)?.with_max_pages(config.max_pages);
        let fetcher = Fetcher::new(client, RetryExecutor::new(config.retry), Arc::new(SharedCache::new()));

        log::debug!(target: LOG_TARGET, "Using {} with {} worker(s)", config.api_url, config.workers);

        Ok(Self { config, fetcher })
    }

    #[must_use]
    pub const fn client(&self) -> &Client {
        self.fetcher.client()
    }

    /// The governor every request of this session reports its budget to.
    #[must_use]
    pub const fn governor(&self) -> &Arc<RateGovernor> {
        self.client().governor()
    }

    #[must_use]
    pub fn survey_context(&self) -> SurveyContext {
        SurveyContext {
            fetcher: self.fetcher.clone(),
            limiter: RateLimiter::new(self.config.requests_per_second, self.config.burst),
            workers: self.config.workers,
        }
    }
}

fn init_logging(log_level: LogLevel) {
    let level = match log_level {
        LogLevel::None => return,
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    };

    let env = env_logger::Env::default().filter_or("RUST_LOG", level);

    // a second command in the same process keeps the first logger
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(matches!(log_level, LogLevel::Debug | LogLevel::Trace))
        .try_init();
}
