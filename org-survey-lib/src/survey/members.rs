use super::{format_date, format_opt, header, org_logins};
use crate::engine::{ClassifiedError, Formatter, Header, Processor, Row};
use crate::github::{Fetcher, Member, Organization, User};
use compact_str::CompactString;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const COLUMNS: &[&str] = &["Organization", "Login", "Name", "Email", "Company", "Location", "Created"];

#[derive(Debug, Clone)]
pub struct MemberItem {
    pub org: CompactString,
    pub member: Member,
}

#[derive(Debug, Clone)]
pub struct MemberResult {
    pub org: CompactString,
    pub user: Arc<User>,
}

/// Fetches each member's profile. Profiles are cached, so a user who belongs to several
/// organizations is fetched once.
#[derive(Debug)]
pub struct MembersProcessor {
    fetcher: Fetcher,
}

impl MembersProcessor {
    #[must_use]
    pub const fn new(fetcher: Fetcher) -> Self {
        Self { fetcher }
    }
}

impl Processor<MemberItem, MemberResult> for MembersProcessor {
    async fn process(&self, cancel: CancellationToken, item: MemberItem) -> Result<MemberResult, ClassifiedError> {
        let user = self.fetcher.user(&cancel, &item.member.login).await?;
        Ok(MemberResult { org: item.org, user })
    }
}

#[derive(Debug, Default)]
pub struct MembersFormatter;

impl Formatter<MemberResult> for MembersFormatter {
    fn header(&self) -> Header {
        header(COLUMNS)
    }

    fn format(&self, output: MemberResult) -> Row {
        let user = output.user.as_ref();
        vec![
            output.org.to_string(),
            user.login.to_string(),
            format_opt(user.name.as_ref()),
            format_opt(user.email.as_ref()),
            format_opt(user.company.as_ref()),
            format_opt(user.location.as_ref()),
            format_date(user.created_at),
        ]
    }
}

/// Every member of `orgs`, once per organization they belong to.
pub async fn collect_members(fetcher: &Fetcher, cancel: &CancellationToken, orgs: &[Organization]) -> Result<Vec<MemberItem>, ClassifiedError> {
    let mut items = Vec::new();
    for org in org_logins(orgs) {
        let members = fetcher.org_members(cancel, org).await?;
        items.extend(members.iter().map(|member| MemberItem {
            org: org.clone(),
            member: member.clone(),
        }));
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_row() {
        let user: User = serde_json::from_value(serde_json::json!({
            "login": "octocat",
            "name": "The Octocat",
            "email": null,
            "company": "@github",
            "location": "San Francisco",
            "created_at": "2011-01-25T18:44:36Z"
        }))
        .unwrap();

        let row = MembersFormatter.format(MemberResult {
            org: "octo-org".into(),
            user: Arc::new(user),
        });

        assert_eq!(
            row,
            vec!["octo-org", "octocat", "The Octocat", "", "@github", "San Francisco", "2011-01-25"]
        );
    }
}
