//! Access to the GitHub REST API
//!
//! [`Client`] speaks HTTP, classifies every response, and keeps the shared
//! [`RateGovernor`](crate::engine::RateGovernor) informed. [`Fetcher`] layers retries and the
//! process-lifetime cache on top and is what the surveys call.

mod client;
mod fetch;
pub mod models;

pub use client::{Client, DEFAULT_API_URL, Page};
pub use fetch::Fetcher;
pub use models::{Member, Organization, Repository, Team, User};
