//! Integration tests for the survey and budgets commands, run end to end against a
//! wiremock stand-in for the GitHub API.

use camino::Utf8PathBuf;
use chrono::Utc;
use org_survey_lib::Host;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Test host that captures output to in-memory buffers.
struct TestHost {
    output_buf: Vec<u8>,
    error_buf: Vec<u8>,
}

impl TestHost {
    const fn new() -> Self {
        Self {
            output_buf: Vec::new(),
            error_buf: Vec::new(),
        }
    }

    fn output_str(&self) -> String {
        String::from_utf8_lossy(&self.output_buf).into_owned()
    }

    fn error_str(&self) -> String {
        String::from_utf8_lossy(&self.error_buf).into_owned()
    }
}

impl Host for TestHost {
    fn output(&mut self) -> impl std::io::Write {
        &mut self.output_buf
    }

    fn error(&mut self) -> impl std::io::Write {
        &mut self.error_buf
    }
}

async fn mock_json(server: &MockServer, route: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

async fn mock_rate_limit(server: &MockServer) {
    let reset = Utc::now().timestamp() + 3600;
    mock_json(
        server,
        "/rate_limit",
        json!({
            "resources": {
                "core": { "limit": 5000, "remaining": 4999, "reset": reset },
                "graphql": { "limit": 5000, "remaining": 5000, "reset": reset }
            }
        }),
    )
    .await;
}

async fn mock_org(server: &MockServer, login: &str, id: u64) {
    mock_json(server, &format!("/orgs/{login}"), json!({ "login": login, "id": id })).await;
}

async fn run(host: &mut TestHost, server: &MockServer, args: &[&str]) -> org_survey_lib::Result<()> {
    let uri = server.uri();
    let mut argv = vec!["org-survey"];
    argv.extend_from_slice(args);
    argv.extend_from_slice(&["--api-url", uri.as_str(), "--github-token", "s3cret"]);

    org_survey_lib::run(host, argv, CancellationToken::new()).await
}

fn sorted_lines(text: &str) -> Vec<&str> {
    let mut lines: Vec<_> = text.lines().collect();
    lines[1..].sort_unstable();
    lines
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Miri cannot call CreateIoCompletionPort")]
async fn test_repos_survey_to_stdout() {
    let server = MockServer::start().await;
    mock_rate_limit(&server).await;
    mock_org(&server, "octo-org", 1).await;
    mock_json(
        &server,
        "/orgs/octo-org/repos",
        json!([
            {
                "name": "widgets", "full_name": "octo-org/widgets", "visibility": "internal",
                "default_branch": "main", "language": "Rust", "stargazers_count": 12,
                "forks_count": 3, "open_issues_count": 4, "pushed_at": "2024-05-01T10:00:00Z"
            },
            {
                "name": "gadgets", "full_name": "octo-org/gadgets", "private": false,
                "archived": true, "default_branch": "trunk"
            }
        ]),
    )
    .await;
    mock_json(
        &server,
        "/repos/octo-org/widgets/teams",
        json!([
            { "name": "Docs", "slug": "docs", "permission": "pull" },
            { "name": "Core", "slug": "core", "permission": "admin" }
        ]),
    )
    .await;
    mock_json(&server, "/repos/octo-org/gadgets/teams", json!([])).await;

    let mut host = TestHost::new();
    run(&mut host, &server, &["repos", "--org", "octo-org", "--workers", "2"]).await.unwrap();

    let output = host.output_str();
    assert_eq!(
        sorted_lines(&output),
        vec![
            "Organization,Repository,Visibility,Archived,Default Branch,Language,Stars,Forks,Open Issues,Last Push,Teams",
            "octo-org,gadgets,public,true,trunk,,0,0,0,,",
            "octo-org,widgets,internal,false,main,Rust,12,3,4,2024-05-01,core (admin); docs (pull)",
        ]
    );
    assert!(host.error_str().contains("Wrote 2 repository row(s) from 2 item(s)"));
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Miri cannot call CreateIoCompletionPort")]
async fn test_failed_items_are_reported_and_the_rest_written() {
    let server = MockServer::start().await;
    mock_rate_limit(&server).await;
    mock_org(&server, "octo-org", 1).await;
    mock_json(
        &server,
        "/orgs/octo-org/repos",
        json!([
            { "name": "widgets", "full_name": "octo-org/widgets" },
            { "name": "secret", "full_name": "octo-org/secret" }
        ]),
    )
    .await;
    mock_json(&server, "/repos/octo-org/widgets/teams", json!([])).await;
    Mock::given(method("GET"))
        .and(path("/repos/octo-org/secret/teams"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "Not Found" })))
        .expect(1)
        .mount(&server)
        .await;

    let mut host = TestHost::new();
    let err = run(&mut host, &server, &["repos", "--org", "octo-org"]).await.unwrap_err();

    let message = format!("{err:#}");
    assert!(message.contains("1 of 2 item(s) failed"), "{message}");
    assert!(message.contains("octo-org/secret"), "{message}");

    let output = host.output_str();
    assert_eq!(output.lines().count(), 2);
    assert!(output.contains("octo-org,widgets,"));
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Miri cannot call CreateIoCompletionPort")]
async fn test_missing_org_aborts_before_any_row() {
    let server = MockServer::start().await;
    mock_rate_limit(&server).await;
    Mock::given(method("GET"))
        .and(path("/orgs/ghost-org"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let mut host = TestHost::new();
    let err = run(&mut host, &server, &["teams", "--org", "ghost-org"]).await.unwrap_err();

    assert!(format!("{err:#}").contains("ghost-org"));
    assert!(host.output_str().is_empty());
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
async fn test_teams_survey_to_json_file() {
    let server = MockServer::start().await;
    mock_rate_limit(&server).await;
    mock_org(&server, "octo-org", 1).await;
    mock_json(
        &server,
        "/orgs/octo-org/teams",
        json!([{ "name": "Core Maintainers", "slug": "core", "privacy": "closed" }]),
    )
    .await;
    mock_json(
        &server,
        "/orgs/octo-org/teams/core/members",
        json!([{ "login": "octocat", "id": 1 }, { "login": "hubot", "id": 2 }]),
    )
    .await;
    mock_json(
        &server,
        "/orgs/octo-org/teams/core/repos",
        json!([{ "name": "widgets", "full_name": "octo-org/widgets" }]),
    )
    .await;

    let tmp = tempfile::tempdir().unwrap();
    let report = Utf8PathBuf::try_from(tmp.path().join("teams.json")).unwrap();

    let mut host = TestHost::new();
    run(&mut host, &server, &["teams", "--org", "octo-org", "--output", report.as_str()])
        .await
        .unwrap();

    assert!(host.output_str().is_empty());
    assert!(host.error_str().contains("Report saved to"));

    let parsed: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(
        parsed,
        json!([{
            "Organization": "octo-org",
            "Team": "Core Maintainers",
            "Slug": "core",
            "Privacy": "closed",
            "Members": "2",
            "Repositories": "1"
        }])
    );
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Miri cannot call CreateIoCompletionPort")]
async fn test_members_survey_fetches_shared_profiles_once() {
    let server = MockServer::start().await;
    mock_rate_limit(&server).await;
    mock_org(&server, "octo-org", 1).await;
    mock_org(&server, "hub-org", 2).await;
    mock_json(&server, "/orgs/octo-org/members", json!([{ "login": "octocat", "id": 1 }])).await;
    mock_json(&server, "/orgs/hub-org/members", json!([{ "login": "octocat", "id": 1 }])).await;

    Mock::given(method("GET"))
        .and(path("/users/octocat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "login": "octocat",
            "name": "The Octocat",
            "company": "@github",
            "location": "San Francisco",
            "email": null,
            "created_at": "2011-01-25T18:44:36Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut host = TestHost::new();
    // one worker so the second lookup finds the first one's cached profile
    run(&mut host, &server, &["members", "--org", "octo-org,hub-org", "--workers", "1"])
        .await
        .unwrap();

    assert_eq!(
        sorted_lines(&host.output_str()),
        vec![
            "Organization,Login,Name,Email,Company,Location,Created",
            "hub-org,octocat,The Octocat,,@github,San Francisco,2011-01-25",
            "octo-org,octocat,The Octocat,,@github,San Francisco,2011-01-25",
        ]
    );
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Miri cannot call CreateIoCompletionPort")]
async fn test_budgets_command() {
    let server = MockServer::start().await;
    mock_rate_limit(&server).await;

    let mut host = TestHost::new();
    run(&mut host, &server, &["budgets"]).await.unwrap();

    let output = host.output_str();
    let lines: Vec<_> = output.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("core 4999/5000 resets at "), "{output}");
    assert!(lines[1].starts_with("graphql 5000/5000 resets at "), "{output}");
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Miri cannot call CreateIoCompletionPort")]
async fn test_excel_requires_output_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut host = TestHost::new();
    let err = run(&mut host, &server, &["repos", "--format", "excel"]).await.unwrap_err();
    assert!(format!("{err:#}").contains("Excel output requires an output file"));
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
async fn test_failed_run_leaves_existing_report_untouched() {
    let server = MockServer::start().await;
    mock_rate_limit(&server).await;
    mock_org(&server, "octo-org", 1).await;
    Mock::given(method("GET"))
        .and(path("/orgs/missing-org"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/orgs/octo-org/repos"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let report = Utf8PathBuf::try_from(tmp.path().join("repos.csv")).unwrap();
    let previous = "Organization,Repository\nold,report\n";
    std::fs::write(&report, previous).unwrap();

    let mut host = TestHost::new();
    let result = run(&mut host, &server, &["repos", "--org", "missing-org", "--output", report.as_str()]).await;
    assert!(result.is_err());
    assert_eq!(std::fs::read_to_string(&report).unwrap(), previous);

    // the organization resolves but its repository list does not
    let result = run(&mut host, &server, &["repos", "--org", "octo-org", "--output", report.as_str()]).await;
    assert!(result.is_err());
    assert_eq!(std::fs::read_to_string(&report).unwrap(), previous);
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
async fn test_all_reports_share_fetched_data() {
    let server = MockServer::start().await;
    mock_rate_limit(&server).await;
    Mock::given(method("GET"))
        .and(path("/orgs/octo-org"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "login": "octo-org", "id": 1 })))
        .expect(1)
        .mount(&server)
        .await;
    mock_json(&server, "/orgs/octo-org/repos", json!([{ "name": "widgets", "full_name": "octo-org/widgets" }])).await;
    mock_json(
        &server,
        "/repos/octo-org/widgets/teams",
        json!([{ "name": "Core", "slug": "core", "permission": "push" }]),
    )
    .await;
    mock_json(&server, "/orgs/octo-org/teams", json!([{ "name": "Core", "slug": "core", "privacy": "closed" }])).await;
    mock_json(&server, "/orgs/octo-org/teams/core/members", json!([{ "login": "octocat", "id": 1 }])).await;
    mock_json(&server, "/orgs/octo-org/teams/core/repos", json!([])).await;
    mock_json(&server, "/orgs/octo-org/members", json!([{ "login": "octocat", "id": 1 }])).await;
    mock_json(&server, "/users/octocat", json!({ "login": "octocat", "name": "The Octocat" })).await;

    let tmp = tempfile::tempdir().unwrap();
    let dir = Utf8PathBuf::try_from(tmp.path().join("reports")).unwrap();

    let mut host = TestHost::new();
    run(&mut host, &server, &["all", "--org", "octo-org", "--output-dir", dir.as_str()])
        .await
        .unwrap();

    let repos = std::fs::read_to_string(dir.join("repos.csv")).unwrap();
    assert!(repos.ends_with("octo-org,widgets,public,false,,,0,0,0,,core (push)\n"), "{repos}");

    let teams = std::fs::read_to_string(dir.join("teams.csv")).unwrap();
    assert!(teams.ends_with("octo-org,Core,core,closed,1,0\n"), "{teams}");

    let members = std::fs::read_to_string(dir.join("members.csv")).unwrap();
    assert!(members.ends_with("octo-org,octocat,The Octocat,,,,\n"), "{members}");

    let summary = host.error_str();
    assert!(summary.contains("Wrote 1 team row(s) from 1 item(s)"), "{summary}");
    assert!(host.output_str().is_empty());
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
async fn test_all_continues_past_a_failed_report() {
    let server = MockServer::start().await;
    mock_rate_limit(&server).await;
    mock_org(&server, "octo-org", 1).await;
    Mock::given(method("GET"))
        .and(path("/orgs/octo-org/teams"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    mock_json(&server, "/orgs/octo-org/members", json!([{ "login": "hubot", "id": 2 }])).await;
    mock_json(&server, "/users/hubot", json!({ "login": "hubot" })).await;

    let tmp = tempfile::tempdir().unwrap();
    let dir = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();

    let mut host = TestHost::new();
    let err = run(
        &mut host,
        &server,
        &["all", "--org", "octo-org", "--report", "teams,members", "--output-dir", dir.as_str(), "--format", "json"],
    )
    .await
    .unwrap_err();

    assert!(format!("{err:#}").contains("1 of 2 report(s) failed"), "{err:#}");
    assert!(!dir.join("teams.json").exists());

    let members: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(dir.join("members.json")).unwrap()).unwrap();
    assert_eq!(members[0]["Login"], "hubot");
}
