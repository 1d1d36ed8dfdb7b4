use super::{format_date, format_opt, header, org_logins};
use crate::engine::{ClassifiedError, Formatter, Header, Processor, Row};
use crate::github::{Fetcher, Organization, Repository, Team};
use compact_str::CompactString;
use tokio_util::sync::CancellationToken;

const COLUMNS: &[&str] = &[
    "Organization",
    "Repository",
    "Visibility",
    "Archived",
    "Default Branch",
    "Language",
    "Stars",
    "Forks",
    "Open Issues",
    "Last Push",
    "Teams",
];

#[derive(Debug, Clone)]
pub struct RepoItem {
    pub org: CompactString,
    pub repo: Repository,
}

#[derive(Debug, Clone)]
pub struct RepoResult {
    pub item: RepoItem,
    pub teams: Vec<Team>,
}

/// Looks up the teams with access to each repository.
#[derive(Debug)]
pub struct ReposProcessor {
    fetcher: Fetcher,
}

impl ReposProcessor {
    #[must_use]
    pub const fn new(fetcher: Fetcher) -> Self {
        Self { fetcher }
    }
}

impl Processor<RepoItem, RepoResult> for ReposProcessor {
    async fn process(&self, cancel: CancellationToken, item: RepoItem) -> Result<RepoResult, ClassifiedError> {
        let teams = self.fetcher.repo_teams(&cancel, &item.org, &item.repo.name).await?;
        Ok(RepoResult { item, teams })
    }
}

#[derive(Debug, Default)]
pub struct ReposFormatter;

impl Formatter<RepoResult> for ReposFormatter {
    fn header(&self) -> Header {
        header(COLUMNS)
    }

    fn format(&self, output: RepoResult) -> Row {
        let RepoResult { item: RepoItem { org, repo }, mut teams } = output;
        teams.sort_by(|a, b| a.slug.cmp(&b.slug));

        let teams = teams
            .iter()
            .map(|team| match &team.permission {
                Some(permission) => format!("{} ({permission})", team.slug),
                None => team.slug.to_string(),
            })
            .collect::<Vec<_>>()
            .join("; ");

        vec![
            org.to_string(),
            repo.name.to_string(),
            repo.visibility().to_string(),
            repo.archived.to_string(),
            format_opt(repo.default_branch.as_ref()),
            format_opt(repo.language.as_ref()),
            repo.stargazers_count.to_string(),
            repo.forks_count.to_string(),
            repo.open_issues_count.to_string(),
            format_date(repo.pushed_at),
            teams,
        ]
    }
}

/// Every repository of `orgs`.
pub async fn collect_repos(fetcher: &Fetcher, cancel: &CancellationToken, orgs: &[Organization]) -> Result<Vec<RepoItem>, ClassifiedError> {
    let mut items = Vec::new();
    for org in org_logins(orgs) {
        let repos = fetcher.org_repos(cancel, org).await?;
        items.extend(repos.iter().map(|repo| RepoItem {
            org: org.clone(),
            repo: repo.clone(),
        }));
    }

    Ok(items)
}
