use super::{format_opt, header, org_logins};
use crate::engine::{ClassifiedError, Formatter, Header, Processor, Row};
use crate::github::{Fetcher, Organization, Team};
use compact_str::CompactString;
use futures_util::future::try_join;
use tokio_util::sync::CancellationToken;

const COLUMNS: &[&str] = &["Organization", "Team", "Slug", "Privacy", "Members", "Repositories"];

#[derive(Debug, Clone)]
pub struct TeamItem {
    pub org: CompactString,
    pub team: Team,
}

#[derive(Debug, Clone)]
pub struct TeamResult {
    pub item: TeamItem,
    pub members: usize,
    pub repos: usize,
}

/// Counts each team's members and repositories.
#[derive(Debug)]
pub struct TeamsProcessor {
    fetcher: Fetcher,
}

impl TeamsProcessor {
    #[must_use]
    pub const fn new(fetcher: Fetcher) -> Self {
        Self { fetcher }
    }
}

impl Processor<TeamItem, TeamResult> for TeamsProcessor {
    async fn process(&self, cancel: CancellationToken, item: TeamItem) -> Result<TeamResult, ClassifiedError> {
        let (members, repos) = try_join(
            self.fetcher.team_members(&cancel, &item.org, &item.team.slug),
            self.fetcher.team_repos(&cancel, &item.org, &item.team.slug),
        )
        .await?;

        Ok(TeamResult {
            item,
            members: members.len(),
            repos: repos.len(),
        })
    }
}

#[derive(Debug, Default)]
pub struct TeamsFormatter;

impl Formatter<TeamResult> for TeamsFormatter {
    fn header(&self) -> Header {
        header(COLUMNS)
    }

    fn format(&self, output: TeamResult) -> Row {
        let TeamResult {
            item: TeamItem { org, team },
            members,
            repos,
        } = output;

        vec![
            org.to_string(),
            team.name,
            team.slug.to_string(),
            format_opt(team.privacy.as_ref()),
            members.to_string(),
            repos.to_string(),
        ]
    }
}

/// Every team of `orgs`.
pub async fn collect_teams(fetcher: &Fetcher, cancel: &CancellationToken, orgs: &[Organization]) -> Result<Vec<TeamItem>, ClassifiedError> {
    let mut items = Vec::new();
    for org in org_logins(orgs) {
        let teams = fetcher.org_teams(cancel, org).await?;
        items.extend(teams.iter().map(|team| TeamItem {
            org: org.clone(),
            team: team.clone(),
        }));
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_row() {
        let team: Team = serde_json::from_value(serde_json::json!({
            "name": "Core Maintainers",
            "slug": "core",
            "privacy": "closed"
        }))
        .unwrap();

        let result = TeamResult {
            item: TeamItem {
                org: "octo-org".into(),
                team,
            },
            members: 4,
            repos: 12,
        };

        let row = TeamsFormatter.format(result);
        assert_eq!(row, vec!["octo-org", "Core Maintainers", "core", "closed", "4", "12"]);
        assert_eq!(row.len(), TeamsFormatter.header().len());
    }
}
