//! Integration tests for the GitHub client against a wiremock stand-in for the API.

use chrono::Utc;
use core::time::Duration;
use org_survey_lib::engine::{BudgetSource, ErrorKind, RateGovernor, Surface};
use org_survey_lib::github::{Client, Repository};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> Client {
    Client::new(Some("s3cret"), server.uri(), Arc::new(RateGovernor::default())).unwrap()
}

fn repo_json(name: &str) -> serde_json::Value {
    json!({ "name": name, "full_name": format!("octo-org/{name}") })
}

async fn mount_status(server: &MockServer, route: &str, template: ResponseTemplate) {
    Mock::given(method("GET")).and(path(route)).respond_with(template).mount(server).await;
}

#[tokio::test]
async fn test_get_all_follows_next_links() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orgs/octo-org/repos"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([repo_json("gadgets")])))
        .expect(1)
        .mount(&server)
        .await;

    let next = format!("<{}/orgs/octo-org/repos?per_page=100&page=2>; rel=\"next\"", server.uri());
    Mock::given(method("GET"))
        .and(path("/orgs/octo-org/repos"))
        .and(query_param("per_page", "100"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([repo_json("widgets"), repo_json("sprockets")]))
                .insert_header("link", next.as_str()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let repos: Vec<Repository> = client(&server)
        .get_all(&CancellationToken::new(), "/orgs/octo-org/repos")
        .await
        .unwrap();

    let names: Vec<_> = repos.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["widgets", "sprockets", "gadgets"]);
}

#[tokio::test]
async fn test_page_cap_truncates() {
    let server = MockServer::start().await;

    let next = format!("<{}/orgs/octo-org/repos?per_page=100&page=2>; rel=\"next\"", server.uri());
    Mock::given(method("GET"))
        .and(path("/orgs/octo-org/repos"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([repo_json("widgets")]))
                .insert_header("link", next.as_str()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let repos: Vec<Repository> = client(&server)
        .with_max_pages(1)
        .get_all(&CancellationToken::new(), "/orgs/octo-org/repos")
        .await
        .unwrap();

    assert_eq!(repos.len(), 1);
}

#[tokio::test]
async fn test_sends_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orgs/octo-org"))
        .and(header("authorization", "token s3cret"))
        .and(header("user-agent", "org-survey"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "login": "octo-org", "id": 1 })))
        .expect(1)
        .mount(&server)
        .await;

    let org: serde_json::Value = client(&server).get(&CancellationToken::new(), "/orgs/octo-org").await.unwrap();
    assert_eq!(org["login"], "octo-org");
}

#[tokio::test]
async fn test_responses_are_classified() {
    let server = MockServer::start().await;
    let reset = Utc::now().timestamp() + 30;

    mount_status(
        &server,
        "/unauthorized",
        ResponseTemplate::new(401).set_body_json(json!({ "message": "Bad credentials" })),
    )
    .await;
    mount_status(&server, "/missing", ResponseTemplate::new(404)).await;
    mount_status(&server, "/broken", ResponseTemplate::new(502)).await;
    mount_status(&server, "/forbidden", ResponseTemplate::new(403)).await;
    mount_status(&server, "/garbled", ResponseTemplate::new(200).set_body_string("not json")).await;
    mount_status(
        &server,
        "/secondary",
        ResponseTemplate::new(429).insert_header("retry-after", "7"),
    )
    .await;
    mount_status(
        &server,
        "/exhausted",
        ResponseTemplate::new(403)
            .insert_header("x-ratelimit-remaining", "0")
            .insert_header("x-ratelimit-limit", "5000")
            .insert_header("x-ratelimit-reset", reset.to_string().as_str())
            .insert_header("x-ratelimit-resource", "core"),
    )
    .await;

    let client = client(&server);
    let cancel = CancellationToken::new();
    let fail = |route: &'static str| {
        let client = client.clone();
        let cancel = cancel.clone();
        async move { client.get::<serde_json::Value>(&cancel, route).await.unwrap_err() }
    };

    let err = fail("/unauthorized").await;
    assert_eq!(err.kind(), ErrorKind::Auth);
    assert!(format!("{err}").contains("Bad credentials"));

    assert_eq!(fail("/missing").await.kind(), ErrorKind::Fatal);
    assert_eq!(fail("/broken").await.kind(), ErrorKind::Transient);
    assert_eq!(fail("/forbidden").await.kind(), ErrorKind::Fatal);
    assert_eq!(fail("/garbled").await.kind(), ErrorKind::Fatal);

    let err = fail("/secondary").await;
    assert_eq!(err.kind(), ErrorKind::RateLimit);
    assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));

    let err = fail("/exhausted").await;
    assert_eq!(err.kind(), ErrorKind::RateLimit);
    let hint = err.retry_after().unwrap();
    assert!(hint <= Duration::from_secs(30) && hint >= Duration::from_secs(25), "hint was {hint:?}");

    // the exhausted budget is remembered even though the call failed
    assert_eq!(client.governor().budget(Surface::Core).unwrap().remaining, 0);
}

#[tokio::test]
async fn test_successful_responses_record_budgets() {
    let server = MockServer::start().await;
    let reset = Utc::now().timestamp() + 3600;

    mount_status(
        &server,
        "/orgs/octo-org",
        ResponseTemplate::new(200)
            .set_body_json(json!({ "login": "octo-org", "id": 1 }))
            .insert_header("x-ratelimit-remaining", "4321")
            .insert_header("x-ratelimit-limit", "5000")
            .insert_header("x-ratelimit-reset", reset.to_string().as_str())
            .insert_header("x-ratelimit-resource", "core"),
    )
    .await;

    let client = client(&server);
    let _: serde_json::Value = client.get(&CancellationToken::new(), "/orgs/octo-org").await.unwrap();

    let budget = client.governor().budget(Surface::Core).unwrap();
    assert_eq!(budget.remaining, 4321);
    assert_eq!(budget.limit, 5000);
    assert_eq!(budget.reset_at.timestamp(), reset);
}

#[tokio::test]
async fn test_fetch_budgets_reads_every_surface() {
    let server = MockServer::start().await;
    let reset = Utc::now().timestamp() + 600;

    mount_status(
        &server,
        "/rate_limit",
        ResponseTemplate::new(200).set_body_json(json!({
            "resources": {
                "core": { "limit": 5000, "remaining": 4999, "reset": reset, "used": 1 },
                "graphql": { "limit": 5000, "remaining": 4800, "reset": reset, "used": 200 },
                "audit_log": { "limit": 1750, "remaining": 1750, "reset": reset, "used": 0 },
                "search": { "limit": 30, "remaining": 30, "reset": reset, "used": 0 }
            },
            "rate": { "limit": 5000, "remaining": 4999, "reset": reset, "used": 1 }
        })),
    )
    .await;

    let budgets = client(&server).fetch_budgets(&CancellationToken::new()).await.unwrap();
    let surfaces: Vec<_> = budgets.iter().map(|b| (b.surface, b.remaining)).collect();
    assert_eq!(
        surfaces,
        vec![(Surface::Core, 4999), (Surface::GraphQl, 4800), (Surface::AuditLog, 1750)]
    );
}

#[tokio::test]
async fn test_canceled_request_is_not_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = client(&server).get::<serde_json::Value>(&cancel, "/orgs/octo-org").await.unwrap_err();
    assert!(err.is_canceled());
}
