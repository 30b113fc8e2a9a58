//! Router-level tests for discovery, registration, authorization, and the
//! resource-access guard.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use agentgate::oauth::jwt::IdentityClaims;
use agentgate::oauth::types::UserIdentity;
use agentgate::server::{AppState, create_router};
use agentgate::{Config, IdentityProvider, ProviderKind};

const BASE_URL: &str = "https://gate.example.com";

fn test_state(lenient: bool) -> Arc<AppState> {
    let mut config = Config::for_testing(BASE_URL);
    config.lenient_registration = lenient;
    let idp = IdentityProvider::new(
        ProviderKind::Google,
        "idp-client",
        "idp-secret",
        Duration::from_secs(1),
        Duration::from_secs(2),
    )
    .unwrap();
    Arc::new(AppState::new(config, idp).unwrap())
}

fn build_router() -> axum::Router {
    create_router(test_state(true))
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn identity() -> UserIdentity {
    UserIdentity {
        sub: "google:42".into(),
        email: Some("dev@example.com".into()),
        name: Some("Dev".into()),
        provider: "google".into(),
    }
}

// ─── Discovery ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_auth_server_metadata() {
    let app = build_router();

    let response = app
        .oneshot(
            Request::get("/.well-known/oauth-authorization-server").body(Body::empty()).unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;

    assert_eq!(json["issuer"], BASE_URL);
    assert_eq!(json["authorization_endpoint"], format!("{BASE_URL}/authorize"));
    assert_eq!(json["token_endpoint"], format!("{BASE_URL}/token"));
    assert_eq!(json["registration_endpoint"], format!("{BASE_URL}/register"));
    assert!(json["grant_types_supported"].as_array().unwrap().contains(&json!("refresh_token")));
    assert!(json["code_challenge_methods_supported"].as_array().unwrap().contains(&json!("S256")));
}

#[tokio::test]
async fn test_protected_resource_metadata() {
    let app = build_router();

    let response = app
        .oneshot(Request::get("/.well-known/oauth-protected-resource").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;

    assert_eq!(json["resource"], BASE_URL);
    assert!(json["authorization_servers"].as_array().unwrap().contains(&json!(BASE_URL)));
    assert!(json["bearer_methods_supported"].as_array().unwrap().contains(&json!("header")));
}

#[tokio::test]
async fn test_discovery_rejects_post() {
    let app = build_router();

    let response = app
        .oneshot(
            Request::post("/.well-known/oauth-authorization-server").body(Body::empty()).unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

// ─── Registration ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_register_returns_generated_credentials() {
    let app = build_router();

    let response = app
        .oneshot(
            Request::post("/register")
                .header("Content-Type", "application/json")
                .body(Body::from(
                    json!({
                        "client_name": "Agent CLI",
                        "redirect_uris": ["http://localhost:9000/callback"]
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;

    assert!(!json["client_id"].as_str().unwrap().is_empty());
    assert!(!json["client_secret"].as_str().unwrap().is_empty());
    assert_eq!(json["client_name"], "Agent CLI");
    assert_eq!(json["redirect_uris"][0], "http://localhost:9000/callback");
}

#[tokio::test]
async fn test_register_requires_redirect_uris() {
    let app = build_router();

    let response = app
        .oneshot(
            Request::post("/register")
                .header("Content-Type", "application/json")
                .body(Body::from(json!({"client_name": "Bad Client"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "invalid_client_metadata");
}

// ─── Authorization endpoint ──────────────────────────────────────────────────

#[tokio::test]
async fn test_authorize_missing_params_is_direct_error() {
    let app = build_router();

    let response = app
        .oneshot(Request::get("/authorize?client_id=c1").body(Body::empty()).unwrap())
        .await
        .unwrap();

    // Never a redirect before redirect_uri is validated.
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "invalid_request");
}

#[tokio::test]
async fn test_authorize_unknown_client_rejected_in_strict_mode() {
    let app = create_router(test_state(false));

    let uri = "/authorize?client_id=ghost&redirect_uri=http://localhost:9000/cb\
               &response_type=code&state=xyz&code_challenge=abc&code_challenge_method=S256";
    let response =
        app.oneshot(Request::get(uri).body(Body::empty()).unwrap()).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "invalid_client");
}

#[tokio::test]
async fn test_authorize_adopts_unknown_client_in_lenient_mode() {
    let state = test_state(true);
    let app = create_router(Arc::clone(&state));

    let uri = "/authorize?client_id=desktop-agent&redirect_uri=http://localhost:9000/cb\
               &response_type=code&state=xyz&code_challenge=abc&code_challenge_method=S256";
    let response =
        app.oneshot(Request::get(uri).body(Body::empty()).unwrap()).await.unwrap();

    assert!(response.status().is_redirection());

    let client = state.store.get_client("desktop-agent").await.unwrap();
    assert_eq!(client.redirect_uris, vec!["http://localhost:9000/cb"]);
}

#[tokio::test]
async fn test_authorize_redirects_into_delegated_login() {
    let state = test_state(true);
    let app = create_router(Arc::clone(&state));

    let client = state
        .store
        .register_client(Some("Agent".into()), vec!["http://localhost:9000/cb".into()])
        .await;

    let uri = format!(
        "/authorize?client_id={}&redirect_uri=http://localhost:9000/cb\
         &response_type=code&state=xyz&code_challenge=abc&code_challenge_method=S256",
        client.client_id
    );
    let response =
        app.oneshot(Request::get(&uri).body(Body::empty()).unwrap()).await.unwrap();

    assert!(response.status().is_redirection());

    let location = response.headers().get("Location").unwrap().to_str().unwrap();
    assert!(location.starts_with("https://accounts.google.com/"));
    assert!(location.contains("state="));

    let set_cookie = response.headers().get("Set-Cookie").unwrap().to_str().unwrap();
    assert!(set_cookie.starts_with("ag_sid="));
    assert!(set_cookie.contains("HttpOnly"));
}

#[tokio::test]
async fn test_authorize_rejects_unregistered_redirect_uri() {
    let state = test_state(true);
    let app = create_router(Arc::clone(&state));

    let client = state
        .store
        .register_client(Some("Agent".into()), vec!["http://localhost:9000/cb".into()])
        .await;

    // Prefix of a registered URI is not a match.
    let uri = format!(
        "/authorize?client_id={}&redirect_uri=http://localhost:9000/cb/extra\
         &response_type=code&state=xyz&code_challenge=abc&code_challenge_method=S256",
        client.client_id
    );
    let response =
        app.oneshot(Request::get(&uri).body(Body::empty()).unwrap()).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "invalid_client");
}

// ─── Resource-access guard ───────────────────────────────────────────────────

#[tokio::test]
async fn test_invoke_without_credentials_gets_401_with_discovery_pointer() {
    let app = build_router();

    let response = app
        .oneshot(
            Request::post("/invoke")
                .header("Content-Type", "application/json")
                .body(Body::from(json!({"tool": "search"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let www_auth = response.headers().get("WWW-Authenticate").unwrap().to_str().unwrap();
    assert!(www_auth.starts_with("Bearer resource_metadata="));
    assert!(www_auth.contains("/.well-known/oauth-protected-resource"));

    let json = body_json(response).await;
    assert_eq!(json["error"], "unauthorized");
    assert!(json["error_description"].as_str().is_some());
}

#[tokio::test]
async fn test_invoke_with_valid_bearer_token() {
    let state = test_state(true);
    let app = create_router(Arc::clone(&state));

    let claims =
        IdentityClaims::for_identity(&identity(), BASE_URL, Duration::from_secs(3600));
    let token = state.codec.mint(&claims).unwrap();

    let response = app
        .oneshot(
            Request::post("/invoke")
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {token}"))
                .body(Body::from(json!({"tool": "search"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["sub"], "google:42");
    assert_eq!(json["echo"]["tool"], "search");
}

#[tokio::test]
async fn test_invoke_with_cookie_fallback() {
    let state = test_state(true);
    let app = create_router(Arc::clone(&state));

    let claims =
        IdentityClaims::for_identity(&identity(), BASE_URL, Duration::from_secs(3600));
    let token = state.codec.mint(&claims).unwrap();

    let response = app
        .oneshot(
            Request::post("/invoke")
                .header("Content-Type", "application/json")
                .header("Cookie", format!("ag_token={token}"))
                .body(Body::from(json!({}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["sub"], "google:42");
}

#[tokio::test]
async fn test_invoke_rejects_expired_token() {
    // Scenario D: a token with exp in the past is rejected.
    let state = test_state(true);
    let app = create_router(Arc::clone(&state));

    let mut claims =
        IdentityClaims::for_identity(&identity(), BASE_URL, Duration::from_secs(3600));
    claims.exp = chrono::Utc::now().timestamp() - 1;
    let token = state.codec.mint(&claims).unwrap();

    let response = app
        .oneshot(
            Request::post("/invoke")
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {token}"))
                .body(Body::from(json!({}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_invoke_rejects_tampered_token() {
    let state = test_state(true);
    let app = create_router(Arc::clone(&state));

    let other_codec = agentgate::TokenCodec::new("attacker-secret");
    let claims =
        IdentityClaims::for_identity(&identity(), BASE_URL, Duration::from_secs(3600));
    let forged = other_codec.mint(&claims).unwrap();

    let response = app
        .oneshot(
            Request::post("/invoke")
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {forged}"))
                .body(Body::from(json!({}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
