//! Concurrent, rate-governed, retrying execution engine
//!
//! Every survey is built on the same four pieces:
//!
//! - [`RateGovernor`]: tracks the remaining budget of each GitHub rate-limit
//!   [`Surface`] and parks callers when a budget runs low.
//! - [`RetryExecutor`]: runs one fallible remote call, retrying
//!   [`ClassifiedError`]s that are retryable with jittered exponential backoff.
//! - [`SharedCache`]: a process-lifetime read-through cache so that surveys run in the
//!   same invocation don't refetch organization-wide lists.
//! - [`pipeline::run`]: the fan-out/fan-in engine that drives a [`Processor`] and a
//!   [`Formatter`] over a list of items with a bounded worker pool and a token-bucket
//!   [`RateLimiter`], funneling rows into a single [`ReportWriter`].
//!
//! # Shared state
//!
//! The governor's budgets and the cache's entries are the only state mutated by more
//! than one task. Each is guarded by its own lock, locks are never held across an
//! `.await`, and neither component calls into the other while holding its lock.
//!
//! # Cancellation
//!
//! A single [`CancellationToken`](tokio_util::sync::CancellationToken) threads through
//! every suspension point: limiter waits, backoff sleeps, budget waits, and channel
//! sends all race against it.

mod cache;
mod error;
mod governor;
mod limiter;
pub mod pipeline;
mod retry;

pub use cache::{CacheEntry, ScopeKey, SharedCache};
pub use error::{ClassifiedError, ErrorKind};
pub use governor::{BudgetSource, Gate, GovernorConfig, RateBudget, RateGovernor, Surface, Thresholds};
pub use limiter::RateLimiter;
pub use pipeline::{Formatter, Header, PipelineError, PipelineStats, Processor, ReportWriter, Row};
pub use retry::{RetryConfig, RetryExecutor};
