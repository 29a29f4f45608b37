//! Vault backend integration tests against a scripted HTTP server.

use std::sync::Arc;

use serde_json::json;
use umbra_core::{StoreRef, redacted};
use umbra_error::ErrorKind;
use umbra_store::backends::vault::{VaultAuthMethod, VaultConfig, VaultStore};
use umbra_store::{OpContext, SecretStore};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer, token: &str) -> VaultConfig {
    VaultConfig {
        address: server.uri(),
        token: Some(token.to_string()),
        ..VaultConfig::default()
    }
}

/// Serve a successful lookup-self for `token`.
async fn mock_lookup_self(server: &MockServer, token: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path("/v1/auth/token/lookup-self"))
        .and(header("X-Vault-Token", token))
        .respond_with(ResponseTemplate::new(status).set_body_json(json!({ "data": {} })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn resolves_kv1_secret_and_extracts_field() {
    let server = MockServer::start().await;
    mock_lookup_self(&server, "root", 200).await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/db"))
        .and(header("X-Vault-Token", "root"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "username": "u", "password": "p" }
        })))
        .mount(&server)
        .await;

    let store = VaultStore::new("vault", config_for(&server, "root")).await.unwrap();
    let ctx = OpContext::new();

    // Whole document.
    let whole = store
        .resolve(&ctx, &StoreRef::new("vault", "secret/db"))
        .await
        .unwrap();
    whole.value.expose(|s| {
        let doc: serde_json::Value = serde_json::from_str(s).unwrap();
        assert_eq!(doc["password"], "p");
    });

    // Field selection.
    let field = store
        .resolve(&ctx, &StoreRef::new("vault", "secret/db").with_field("password"))
        .await
        .unwrap();
    field.value.expose(|s| assert_eq!(s, "p"));

    // Missing field lists what exists.
    let err = store
        .resolve(&ctx, &StoreRef::new("vault", "secret/db").with_field("missing"))
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Validation { .. }));
    assert!(err.to_string().contains("password"));
}

#[tokio::test]
async fn unwraps_kv2_envelope_with_version() {
    let server = MockServer::start().await;
    mock_lookup_self(&server, "root", 200).await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/data/db"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "data": { "password": "p2" },
                "metadata": { "version": 4, "created_time": "2026-01-02T03:04:05Z" }
            }
        })))
        .mount(&server)
        .await;

    let store = VaultStore::new("vault", config_for(&server, "root")).await.unwrap();
    let secret = store
        .resolve(
            &OpContext::new(),
            &StoreRef::new("vault", "secret/data/db").with_field("password"),
        )
        .await
        .unwrap();
    secret.value.expose(|s| assert_eq!(s, "p2"));
    assert_eq!(secret.version.as_deref(), Some("4"));
    assert!(secret.updated_at.is_some());
}

#[tokio::test]
async fn http_statuses_map_onto_the_taxonomy() {
    let server = MockServer::start().await;
    mock_lookup_self(&server, "root", 200).await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/forbidden"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/broken"))
        .respond_with(ResponseTemplate::new(503).set_body_string("sealed"))
        .mount(&server)
        .await;

    let store = VaultStore::new("vault", config_for(&server, "root")).await.unwrap();
    let ctx = OpContext::new();

    let err = store
        .resolve(&ctx, &StoreRef::new("vault", "secret/missing"))
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::NotFound { .. }));

    let err = store
        .resolve(&ctx, &StoreRef::new("vault", "secret/forbidden"))
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Auth { .. }));

    let err = store
        .resolve(&ctx, &StoreRef::new("vault", "secret/broken"))
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Provider { .. }));
    assert!(err.is_retryable(), "5xx must classify as retryable");
}

#[tokio::test]
async fn describe_reports_absence_instead_of_erroring() {
    let server = MockServer::start().await;
    mock_lookup_self(&server, "root", 200).await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let store = VaultStore::new("vault", config_for(&server, "root")).await.unwrap();
    let meta = store
        .describe(&OpContext::new(), &StoreRef::new("vault", "secret/missing"))
        .await
        .unwrap();
    assert!(!meta.exists);
}

#[tokio::test]
async fn rejected_cached_token_triggers_exactly_one_reauthentication() {
    let server = MockServer::start().await;

    // The cached token fails lookup-self; the configured userpass method
    // takes over and yields a fresh token that works.
    mock_lookup_self(&server, "stale-token", 403).await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/userpass/login/app"))
        .and(body_partial_json(json!({ "password": "pw" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "auth": { "client_token": "fresh-token" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/db"))
        .and(header("X-Vault-Token", "fresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "password": "p" }
        })))
        .mount(&server)
        .await;

    let config = VaultConfig {
        address: server.uri(),
        token: Some("stale-token".to_string()),
        auth: VaultAuthMethod::Userpass {
            username: "app".into(),
            password: Some("pw".into()),
        },
        ..VaultConfig::default()
    };
    let store = Arc::new(VaultStore::new("vault", config).await.unwrap());
    let ctx = OpContext::new();

    let secret = store
        .resolve(&ctx, &StoreRef::new("vault", "secret/db").with_field("password"))
        .await
        .unwrap();
    secret.value.expose(|s| assert_eq!(s, "p"));
    assert_eq!(store.metrics().reauthentication_count(), 1);

    // A second resolve reuses the fresh token without another login.
    store
        .resolve(&ctx, &StoreRef::new("vault", "secret/db"))
        .await
        .unwrap();
    assert_eq!(store.metrics().reauthentication_count(), 1);
}

#[tokio::test]
async fn provider_error_bodies_are_redacted() {
    let server = MockServer::start().await;
    mock_lookup_self(&server, "root", 200).await;
    Mock::given(method("GET"))
        .and(path("/v1/secret/broken"))
        .respond_with(
            ResponseTemplate::new(500).set_body_string("backend leaked: hunter2"),
        )
        .mount(&server)
        .await;

    let store = VaultStore::new("vault", config_for(&server, "root")).await.unwrap();
    let err = store
        .resolve(&OpContext::new(), &StoreRef::new("vault", "secret/broken"))
        .await
        .unwrap_err();
    let text = err.chain_text();
    assert!(text.contains("[REDACTED]"), "body must be redacted: {text}");
    assert!(!text.contains("hunter2"), "body leaked: {text}");
    // The helper itself behaves the same way outside the store.
    assert_eq!(format!("{}", redacted("hunter2")), "[REDACTED]");
}

#[tokio::test]
async fn cancelled_context_short_circuits() {
    let server = MockServer::start().await;
    let store = VaultStore::new("vault", config_for(&server, "root")).await.unwrap();

    let ctx = OpContext::new();
    ctx.cancel();
    let err = store
        .resolve(&ctx, &StoreRef::new("vault", "secret/db"))
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Cancelled { .. }));
}
