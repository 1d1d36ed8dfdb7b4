use super::Client;
use super::models::{Member, Organization, Repository, Team, User};
use crate::engine::{ClassifiedError, RetryExecutor, ScopeKey, SharedCache};
use compact_str::CompactString;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Retrying, cached access to the GitHub entities the surveys walk.
///
/// Lists shared between surveys (an organization's repositories, teams, and members, and
/// user profiles) are cached for the life of the process. Per-item lookups are not.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    retry: RetryExecutor,
    cache: Arc<SharedCache>,
}

impl Fetcher {
    #[must_use]
    pub const fn new(client: Client, retry: RetryExecutor, cache: Arc<SharedCache>) -> Self {
        Self { client, retry, cache }
    }

    #[must_use]
    pub const fn client(&self) -> &Client {
        &self.client
    }

    #[must_use]
    pub const fn cache(&self) -> &Arc<SharedCache> {
        &self.cache
    }

    async fn one<T: DeserializeOwned>(&self, cancel: &CancellationToken, path: &str) -> Result<T, ClassifiedError> {
        self.retry.execute(cancel, path, || self.client.get::<T>(cancel, path)).await
    }

    async fn list<T: DeserializeOwned>(&self, cancel: &CancellationToken, path: &str) -> Result<Vec<T>, ClassifiedError> {
        self.retry.execute(cancel, path, || self.client.get_all::<T>(cancel, path)).await
    }

    async fn cached_list<T>(&self, cancel: &CancellationToken, key: ScopeKey, path: &str) -> Result<Arc<Vec<T>>, ClassifiedError>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        self.cache.get_or_fetch(key, || self.list(cancel, path)).await
    }

    /// The named organizations, or every organization the token's user belongs to when
    /// `logins` is empty.
    pub async fn organizations(&self, cancel: &CancellationToken, logins: &[CompactString]) -> Result<Vec<Organization>, ClassifiedError> {
        if logins.is_empty() {
            let all = self
                .cached_list::<Organization>(cancel, ScopeKey::new("orgs", "*"), "/user/orgs")
                .await
                .map_err(|e| e.context("listing organizations"))?;
            return Ok(all.as_ref().clone());
        }

        let mut orgs = Vec::with_capacity(logins.len());
        for login in logins {
            let path = format!("/orgs/{login}");
            let org = self
                .cache
                .get_or_fetch(ScopeKey::new("orgs", login.clone()), || self.one::<Organization>(cancel, &path))
                .await
                .map_err(|e| e.context(format_args!("fetching organization '{login}'")))?;
            orgs.push(org.as_ref().clone());
        }

        Ok(orgs)
    }

    pub async fn org_repos(&self, cancel: &CancellationToken, org: &str) -> Result<Arc<Vec<Repository>>, ClassifiedError> {
        self.cached_list(cancel, ScopeKey::new("orgRepos", org), &format!("/orgs/{org}/repos?type=all"))
            .await
            .map_err(|e| e.context(format_args!("listing repositories of '{org}'")))
    }

    pub async fn org_teams(&self, cancel: &CancellationToken, org: &str) -> Result<Arc<Vec<Team>>, ClassifiedError> {
        self.cached_list(cancel, ScopeKey::new("orgTeams", org), &format!("/orgs/{org}/teams"))
            .await
            .map_err(|e| e.context(format_args!("listing teams of '{org}'")))
    }

    pub async fn org_members(&self, cancel: &CancellationToken, org: &str) -> Result<Arc<Vec<Member>>, ClassifiedError> {
        self.cached_list(cancel, ScopeKey::new("orgMembers", org), &format!("/orgs/{org}/members"))
            .await
            .map_err(|e| e.context(format_args!("listing members of '{org}'")))
    }

    /// Teams with access to a repository.
    pub async fn repo_teams(&self, cancel: &CancellationToken, org: &str, repo: &str) -> Result<Vec<Team>, ClassifiedError> {
        self.list(cancel, &format!("/repos/{org}/{repo}/teams"))
            .await
            .map_err(|e| e.context(format_args!("listing teams of '{org}/{repo}'")))
    }

    pub async fn team_members(&self, cancel: &CancellationToken, org: &str, slug: &str) -> Result<Vec<Member>, ClassifiedError> {
        self.list(cancel, &format!("/orgs/{org}/teams/{slug}/members"))
            .await
            .map_err(|e| e.context(format_args!("listing members of team '{org}/{slug}'")))
    }

    pub async fn team_repos(&self, cancel: &CancellationToken, org: &str, slug: &str) -> Result<Vec<Repository>, ClassifiedError> {
        self.list(cancel, &format!("/orgs/{org}/teams/{slug}/repos"))
            .await
            .map_err(|e| e.context(format_args!("listing repositories of team '{org}/{slug}'")))
    }

    pub async fn user(&self, cancel: &CancellationToken, login: &str) -> Result<Arc<User>, ClassifiedError> {
        let path = format!("/users/{login}");
        self.cache
            .get_or_fetch(ScopeKey::new("user", login), || self.one::<User>(cancel, &path))
            .await
            .map_err(|e| e.context(format_args!("fetching user '{login}'")))
    }
}
