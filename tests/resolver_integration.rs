//! Integration tests for the resolver strategies against mocked endpoints.
//!
//! Both strategies are exercised through the `DoiResolver` trait object so
//! the tests also prove they are swappable without touching callers.

use doifetch_core::{DoiResolver, HandleRegistryResolver, RedirectResolver, ResolveError};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn handle_record(url: &str) -> serde_json::Value {
    serde_json::json!({
        "responseCode": 1,
        "handle": "10.1000/demo",
        "values": [
            {"index": 100, "type": "HS_ADMIN", "data": {"format": "admin", "value": {}}},
            {"index": 1, "type": "URL", "data": {"format": "string", "value": url}}
        ]
    })
}

async fn mount_redirect(server: &MockServer, from: &str, to: &str) {
    Mock::given(method("HEAD"))
        .and(path(from))
        .respond_with(ResponseTemplate::new(302).insert_header("location", to))
        .mount(server)
        .await;
}

#[tokio::test]
async fn redirect_strategy_returns_final_url_of_chain() {
    let server = MockServer::start().await;
    mount_redirect(&server, "/10.1000/demo", &format!("{}/intermediate", server.uri())).await;
    mount_redirect(&server, "/intermediate", &format!("{}/landing", server.uri())).await;
    Mock::given(method("HEAD"))
        .and(path("/landing"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let resolver: Box<dyn DoiResolver> =
        Box::new(RedirectResolver::with_base_url(server.uri()).unwrap());
    let location = resolver.resolve("10.1000/demo").await.unwrap();
    assert_eq!(location.as_str(), format!("{}/landing", server.uri()));
}

#[tokio::test]
async fn redirect_strategy_fails_without_redirect() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/10.9999/unknown"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let resolver: Box<dyn DoiResolver> =
        Box::new(RedirectResolver::with_base_url(server.uri()).unwrap());
    let result = resolver.resolve("10.9999/unknown").await;
    assert!(matches!(result, Err(ResolveError::NotRedirected { .. })));
}

#[tokio::test]
async fn redirect_strategy_is_deterministic_per_identifier() {
    let server = MockServer::start().await;
    mount_redirect(&server, "/10.1000/demo", &format!("{}/landing", server.uri())).await;
    Mock::given(method("HEAD"))
        .and(path("/landing"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let resolver = RedirectResolver::with_base_url(server.uri()).unwrap();
    let first = resolver.resolve("10.1000/demo").await.unwrap();
    let second = resolver.resolve("10.1000/demo").await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn handle_strategy_picks_first_url_value_and_upgrades_scheme() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/handles/10.1000/demo"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(handle_record("http://pub.example/demo")),
        )
        .mount(&server)
        .await;

    let resolver: Box<dyn DoiResolver> =
        Box::new(HandleRegistryResolver::with_base_url(server.uri()).unwrap());
    let location = resolver.resolve("10.1000/demo").await.unwrap();
    assert_eq!(location.as_str(), "https://pub.example/demo");
}

#[tokio::test]
async fn handle_strategy_fails_on_empty_record() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/handles/10.1000/empty"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"responseCode": 1, "values": []})),
        )
        .mount(&server)
        .await;

    let resolver: Box<dyn DoiResolver> =
        Box::new(HandleRegistryResolver::with_base_url(server.uri()).unwrap());
    let result = resolver.resolve("10.1000/empty").await;
    assert!(matches!(result, Err(ResolveError::NoUrlValue { .. })));
}

#[tokio::test]
async fn strategies_share_one_calling_convention() {
    let server = MockServer::start().await;
    mount_redirect(&server, "/10.1000/demo", &format!("{}/landing", server.uri())).await;
    Mock::given(method("HEAD"))
        .and(path("/landing"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/handles/10.1000/demo"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(handle_record(&format!("{}/landing", server.uri()))),
        )
        .mount(&server)
        .await;

    let strategies: Vec<Box<dyn DoiResolver>> = vec![
        Box::new(RedirectResolver::with_base_url(server.uri()).unwrap()),
        Box::new(HandleRegistryResolver::with_base_url(server.uri()).unwrap()),
    ];

    for resolver in strategies {
        let location = resolver.resolve("10.1000/demo").await.unwrap();
        assert!(
            location.as_str().ends_with("/landing"),
            "{} strategy disagreed: {location}",
            resolver.name()
        );
    }
}
