//! The report types
//!
//! A survey runs in two steps. [`collect`] fetches the top-level list of items for the
//! requested organizations, and [`SurveyItems::run`] hands it to [`pipeline::run`] with
//! the survey's own processor (which enriches one item through further API calls) and
//! formatter (which turns the enriched item into a row). A failure while collecting ends
//! the survey before its report is opened.

mod members;
mod repos;
mod teams;

pub use members::{MemberItem, MemberResult, MembersFormatter, MembersProcessor, collect_members};
pub use repos::{RepoItem, RepoResult, ReposFormatter, ReposProcessor, collect_repos};
pub use teams::{TeamItem, TeamResult, TeamsFormatter, TeamsProcessor, collect_teams};

use crate::engine::{Formatter, PipelineStats, Processor, RateLimiter, ReportWriter, pipeline};
use crate::github::{Fetcher, Organization};
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use compact_str::CompactString;
use core::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const LOG_TARGET: &str = "    survey";

/// Shared pieces every survey runs with.
#[derive(Debug, Clone)]
pub struct SurveyContext {
    pub fetcher: Fetcher,
    pub limiter: Arc<RateLimiter>,
    pub workers: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum SurveyKind {
    Repos,
    Teams,
    Members,
}

impl SurveyKind {
    pub const ALL: [Self; 3] = [Self::Repos, Self::Teams, Self::Members];

    /// Short name, used for report file names.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Repos => "repos",
            Self::Teams => "teams",
            Self::Members => "members",
        }
    }
}

impl fmt::Display for SurveyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Repos => "repository",
            Self::Teams => "team",
            Self::Members => "member",
        })
    }
}

/// The top-level items of one survey, collected before its report is opened.
#[derive(Debug)]
pub enum SurveyItems {
    Repos(Vec<RepoItem>),
    Teams(Vec<TeamItem>),
    Members(Vec<MemberItem>),
}

impl SurveyItems {
    #[must_use]
    pub const fn kind(&self) -> SurveyKind {
        match self {
            Self::Repos(_) => SurveyKind::Repos,
            Self::Teams(_) => SurveyKind::Teams,
            Self::Members(_) => SurveyKind::Members,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Repos(items) => items.len(),
            Self::Teams(items) => items.len(),
            Self::Members(items) => items.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enrich every item and write one row per success to `writer`.
    pub async fn run<W: ReportWriter + ?Sized>(
        self,
        ctx: &SurveyContext,
        cancel: &CancellationToken,
        writer: &mut W,
    ) -> crate::Result<PipelineStats> {
        let fetcher = ctx.fetcher.clone();
        match self {
            Self::Repos(items) => drive(ctx, cancel, items, ReposProcessor::new(fetcher), ReposFormatter, writer).await,
            Self::Teams(items) => drive(ctx, cancel, items, TeamsProcessor::new(fetcher), TeamsFormatter, writer).await,
            Self::Members(items) => drive(ctx, cancel, items, MembersProcessor::new(fetcher), MembersFormatter, writer).await,
        }
    }
}

/// The organizations named by `logins`, or every organization of the authenticated user.
pub async fn resolve_orgs(ctx: &SurveyContext, cancel: &CancellationToken, logins: &[CompactString]) -> crate::Result<Vec<Organization>> {
    let orgs = ctx.fetcher.organizations(cancel, logins).await?;
    log::info!(target: LOG_TARGET, "Surveying {} organization(s)", orgs.len());
    Ok(orgs)
}

/// Fetch the top-level items of a `kind` survey across `orgs`.
pub async fn collect(kind: SurveyKind, ctx: &SurveyContext, cancel: &CancellationToken, orgs: &[Organization]) -> crate::Result<SurveyItems> {
    let items = match kind {
        SurveyKind::Repos => SurveyItems::Repos(collect_repos(&ctx.fetcher, cancel, orgs).await?),
        SurveyKind::Teams => SurveyItems::Teams(collect_teams(&ctx.fetcher, cancel, orgs).await?),
        SurveyKind::Members => SurveyItems::Members(collect_members(&ctx.fetcher, cancel, orgs).await?),
    };

    log::info!(target: LOG_TARGET, "Collected {} {kind} item(s)", items.len());
    Ok(items)
}

async fn drive<I, O, P, F, W>(
    ctx: &SurveyContext,
    cancel: &CancellationToken,
    items: Vec<I>,
    processor: P,
    formatter: F,
    writer: &mut W,
) -> crate::Result<PipelineStats>
where
    I: Send + 'static,
    O: Send + 'static,
    P: Processor<I, O>,
    F: Formatter<O>,
    W: ReportWriter + ?Sized,
{
    let stats = pipeline::run(
        cancel,
        items,
        Arc::new(processor),
        Arc::new(formatter),
        Arc::clone(&ctx.limiter),
        ctx.workers,
        writer,
    )
    .await?;
    Ok(stats)
}

fn org_logins(orgs: &[Organization]) -> impl Iterator<Item = &CompactString> {
    orgs.iter().map(|org| &org.login)
}

fn format_date(value: Option<DateTime<Utc>>) -> String {
    value.map(|v| v.format("%Y-%m-%d").to_string()).unwrap_or_default()
}

fn format_opt<T: AsRef<str>>(value: Option<T>) -> String {
    value.map(|v| v.as_ref().to_string()).unwrap_or_default()
}

fn header(columns: &[&str]) -> Vec<String> {
    columns.iter().map(ToString::to_string).collect()
}
