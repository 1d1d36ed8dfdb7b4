//! GitHub REST payloads, trimmed to the fields the surveys use.

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Organization {
    pub login: CompactString,
    pub id: u64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Repository {
    pub name: CompactString,
    pub full_name: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub visibility: Option<CompactString>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub default_branch: Option<CompactString>,
    #[serde(default)]
    pub language: Option<CompactString>,
    #[serde(default)]
    pub stargazers_count: u32,
    #[serde(default)]
    pub forks_count: u32,
    #[serde(default)]
    pub open_issues_count: u32,
    #[serde(default)]
    pub pushed_at: Option<DateTime<Utc>>,
}

impl Repository {
    /// `public`, `private`, or `internal`. Older API versions omit `visibility`.
    #[must_use]
    pub fn visibility(&self) -> &str {
        match &self.visibility {
            Some(v) => v,
            None if self.private => "private",
            None => "public",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Team {
    pub name: String,
    pub slug: CompactString,
    #[serde(default)]
    pub privacy: Option<CompactString>,
    #[serde(default)]
    pub description: Option<String>,
    /// Only present when listing the teams of a repository.
    #[serde(default)]
    pub permission: Option<CompactString>,
}

/// An entry of an organization or team member list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Member {
    pub login: CompactString,
    pub id: u64,
}

/// A full user profile.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct User {
    pub login: CompactString,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Body of `GET /rate_limit`.
#[derive(Debug, Deserialize)]
pub struct RateLimitResponse {
    pub resources: RateLimitResources,
}

#[derive(Debug, Deserialize)]
pub struct RateLimitResources {
    pub core: RateLimitEntry,
    #[serde(default)]
    pub graphql: Option<RateLimitEntry>,
    #[serde(default)]
    pub audit_log: Option<RateLimitEntry>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimitEntry {
    pub limit: u64,
    pub remaining: u64,
    /// Unix timestamp, in seconds.
    pub reset: i64,
}

/// Error body GitHub attaches to failed requests.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub message: String,
}
