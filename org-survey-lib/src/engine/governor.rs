//! Tracking of GitHub's independent rate budgets.
//!
//! GitHub meters the REST API, the GraphQL API, and the audit log separately, each with
//! its own remaining count and reset time. [`RateGovernor`] remembers the last budget seen
//! for each [`Surface`] and parks callers whose surface has dropped below its threshold
//! until the budget resets.

use super::ClassifiedError;
use crate::HashMap;
use chrono::{DateTime, Utc};
use core::fmt;
use core::time::Duration;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use strum::{EnumIter, IntoEnumIterator};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const LOG_TARGET: &str = "  governor";

/// An independently metered API rate-limit pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter)]
pub enum Surface {
    /// The REST API.
    Core,

    /// The GraphQL API, metered in query points rather than calls.
    GraphQl,

    /// The organization audit log.
    AuditLog,
}

impl Surface {
    /// The name GitHub uses for this surface in `x-ratelimit-resource` and `/rate_limit`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::GraphQl => "graphql",
            Self::AuditLog => "audit_log",
        }
    }

    /// Map a GitHub resource name onto a tracked surface.
    #[must_use]
    pub fn from_resource(resource: &str) -> Option<Self> {
        Self::iter().find(|surface| surface.name() == resource)
    }
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The state of one surface's budget as last reported by GitHub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBudget {
    pub surface: Surface,
    pub remaining: u64,
    pub limit: u64,
    pub reset_at: DateTime<Utc>,
}

/// Remaining-budget levels below which callers are made to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Thresholds {
    #[serde(default = "default_core_threshold")]
    pub core: u64,

    /// Larger than the others since a single query can cost many points.
    #[serde(default = "default_graphql_threshold")]
    pub graphql: u64,

    #[serde(default = "default_audit_log_threshold")]
    pub audit_log: u64,
}

const fn default_core_threshold() -> u64 {
    10
}

const fn default_graphql_threshold() -> u64 {
    100
}

const fn default_audit_log_threshold() -> u64 {
    10
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            core: default_core_threshold(),
            graphql: default_graphql_threshold(),
            audit_log: default_audit_log_threshold(),
        }
    }
}

impl Thresholds {
    #[must_use]
    pub const fn for_surface(&self, surface: Surface) -> u64 {
        match surface {
            Surface::Core => self.core,
            Surface::GraphQl => self.graphql,
            Surface::AuditLog => self.audit_log,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GovernorConfig {
    #[serde(default)]
    pub thresholds: Thresholds,

    /// Extra time to wait past a budget's reset time.
    #[serde(default = "default_reset_grace", with = "humantime_serde")]
    pub reset_grace: Duration,

    /// Longest a single low-budget wait may last.
    #[serde(default = "default_max_wait", with = "humantime_serde")]
    pub max_wait: Duration,

    /// Number of tries for a budget lookup before proceeding unchecked.
    #[serde(default = "default_check_attempts")]
    pub check_attempts: u32,

    /// Fixed delay between budget lookup tries.
    #[serde(default = "default_check_retry_delay", with = "humantime_serde")]
    pub check_retry_delay: Duration,
}

const fn default_reset_grace() -> Duration {
    Duration::from_secs(1)
}

const fn default_max_wait() -> Duration {
    Duration::from_secs(3600)
}

const fn default_check_attempts() -> u32 {
    3
}

const fn default_check_retry_delay() -> Duration {
    Duration::from_secs(1)
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            reset_grace: default_reset_grace(),
            max_wait: default_max_wait(),
            check_attempts: default_check_attempts(),
            check_retry_delay: default_check_retry_delay(),
        }
    }
}

/// Outcome of passing through the governor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// The budget was healthy; no wait.
    Open,

    /// The budget was low; the caller was held for this long.
    Waited(Duration),

    /// The budget could not be determined, so the caller proceeds without waiting.
    Unchecked,
}

/// Something that can report the current budgets of every surface.
pub trait BudgetSource: Send + Sync {
    fn fetch_budgets(&self, cancel: &CancellationToken) -> impl Future<Output = Result<Vec<RateBudget>, ClassifiedError>> + Send;
}

/// Shared, internally synchronized view of every surface's budget.
#[derive(Debug, Default)]
pub struct RateGovernor {
    config: GovernorConfig,
    budgets: Mutex<HashMap<Surface, RateBudget>>,
}

impl RateGovernor {
    #[must_use]
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            config,
            budgets: Mutex::new(HashMap::default()),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &GovernorConfig {
        &self.config
    }

    #[must_use]
    pub fn budget(&self, surface: Surface) -> Option<RateBudget> {
        self.budgets.lock().unwrap_or_else(PoisonError::into_inner).get(&surface).copied()
    }

    /// All known budgets, ordered by surface.
    #[must_use]
    pub fn budgets(&self) -> Vec<RateBudget> {
        let guard = self.budgets.lock().unwrap_or_else(PoisonError::into_inner);
        Surface::iter().filter_map(|surface| guard.get(&surface).copied()).collect()
    }

    /// Remember a budget observation.
    ///
    /// Responses to concurrent requests can arrive out of order. Within one reset window the
    /// lowest remaining count wins; a newer window always replaces an older one.
    pub fn record(&self, budget: RateBudget) {
        let mut guard = self.budgets.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = guard
            .entry(budget.surface)
            .and_modify(|existing| {
                if budget.reset_at != existing.reset_at || budget.remaining < existing.remaining {
                    *existing = budget;
                }
            })
            .or_insert(budget);
    }

    fn wait_duration(&self, reset_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
        let until_reset = (reset_at - now).to_std().unwrap_or(Duration::ZERO);
        (until_reset + self.config.reset_grace).min(self.config.max_wait)
    }

    /// Record a budget and hold the caller if it has dropped below the surface's threshold.
    ///
    /// A held caller resumes once `reset_at` plus the configured grace has passed, or as soon
    /// as `cancel` fires, whichever comes first.
    pub async fn check_and_wait(
        &self,
        surface: Surface,
        remaining: u64,
        limit: u64,
        reset_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Gate, ClassifiedError> {
        self.record(RateBudget {
            surface,
            remaining,
            limit,
            reset_at,
        });

        let threshold = self.config.thresholds.for_surface(surface);
        if remaining >= threshold {
            return Ok(Gate::Open);
        }

        let wait = self.wait_duration(reset_at, Utc::now());
        log::warn!(
            target: LOG_TARGET,
            "The {surface} budget is low ({remaining}/{limit}, threshold {threshold}), waiting {}s until {}",
            wait.as_secs(),
            reset_at.with_timezone(&chrono::Local).format("%T")
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ClassifiedError::canceled()),
            () = tokio::time::sleep(wait) => {
                log::info!(target: LOG_TARGET, "The {surface} budget wait is over, resuming");
                Ok(Gate::Waited(wait))
            }
        }
    }

    /// Look up current budgets from `source`, then gate on `surface`.
    ///
    /// If the lookup keeps failing, the caller proceeds with [`Gate::Unchecked`] rather than
    /// stalling the run.
    pub async fn refresh_and_wait<S: BudgetSource>(
        &self,
        source: &S,
        surface: Surface,
        cancel: &CancellationToken,
    ) -> Result<Gate, ClassifiedError> {
        let Some(budgets) = self.fetch_with_retries(source, cancel).await? else {
            return Ok(Gate::Unchecked);
        };

        let mut target = None;
        for budget in budgets {
            if budget.surface == surface {
                target = Some(budget);
            } else {
                self.record(budget);
            }
        }

        match target {
            Some(budget) => {
                self.check_and_wait(surface, budget.remaining, budget.limit, budget.reset_at, cancel)
                    .await
            }
            None => {
                log::debug!(target: LOG_TARGET, "No {surface} budget reported, proceeding unchecked");
                Ok(Gate::Unchecked)
            }
        }
    }

    async fn fetch_with_retries<S: BudgetSource>(
        &self,
        source: &S,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<RateBudget>>, ClassifiedError> {
        let attempts = self.config.check_attempts.max(1);

        for attempt in 1..=attempts {
            match source.fetch_budgets(cancel).await {
                Ok(budgets) => return Ok(Some(budgets)),
                Err(e) if e.is_canceled() => return Err(e),
                Err(e) if attempt < attempts => {
                    log::debug!(target: LOG_TARGET, "Budget lookup failed (attempt {attempt}/{attempts}): {e}");
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Err(ClassifiedError::canceled()),
                        () = tokio::time::sleep(self.config.check_retry_delay) => {}
                    }
                }
                Err(e) => {
                    log::warn!(
                        target: LOG_TARGET,
                        "Could not check rate budgets after {attempts} attempt(s), proceeding without waiting: {e}"
                    );
                }
            }
        }

        Ok(None)
    }

    /// Periodically refresh every budget from `source` and log it, until `cancel` fires.
    pub fn monitor<S: BudgetSource + 'static>(
        self: &Arc<Self>,
        source: Arc<S>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match this.fetch_with_retries(source.as_ref(), &cancel).await {
                    Ok(Some(budgets)) => {
                        for budget in budgets {
                            this.record(budget);
                            log::info!(
                                target: LOG_TARGET,
                                "The {} budget has {}/{} remaining, resets at {}",
                                budget.surface,
                                budget.remaining,
                                budget.limit,
                                budget.reset_at.with_timezone(&chrono::Local).format("%T")
                            );
                        }
                    }
                    Ok(None) => {}
                    Err(_) => break,
                }
            }

            log::debug!(target: LOG_TARGET, "Budget monitor stopped");
        })
    }
}
