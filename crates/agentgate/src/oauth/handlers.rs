//! OAuth 2.1 endpoint handlers.
//!
//! Implements:
//! - RFC 9728: OAuth Protected Resource Metadata
//! - RFC 8414: OAuth Authorization Server Metadata
//! - RFC 7591: Dynamic Client Registration (plus lenient adoption)
//! - RFC 7636: PKCE (S256 only)
//! - RFC 6749: Authorization Code + Refresh Token grants

use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use serde::Deserialize;
use subtle::ConstantTimeEq;

use crate::config::defaults;
use crate::error::{OAuthError, OAuthResult};
use crate::oauth::jwt::IdentityClaims;
use crate::oauth::pkce;
use crate::oauth::types::UserIdentity;
use crate::server::AppState;

// ─── RFC 9728: Protected Resource Metadata ───────────────────────────────────

/// `GET /.well-known/oauth-protected-resource`
///
/// Tells clients where to find the authorization server for this resource.
pub async fn handle_protected_resource(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "resource": state.config.base_url,
        "authorization_servers": [state.config.base_url],
        "scopes_supported": defaults::SCOPES_SUPPORTED,
        "bearer_methods_supported": ["header"]
    }))
}

// ─── RFC 8414: Authorization Server Metadata ─────────────────────────────────

/// `GET /.well-known/oauth-authorization-server`
///
/// Describes the OAuth endpoints and capabilities.
pub async fn handle_auth_server_metadata(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let base = &state.config.base_url;
    Json(serde_json::json!({
        "issuer": base,
        "authorization_endpoint": format!("{base}/authorize"),
        "token_endpoint": format!("{base}/token"),
        "registration_endpoint": format!("{base}/register"),
        "scopes_supported": defaults::SCOPES_SUPPORTED,
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code", "refresh_token"],
        "token_endpoint_auth_methods_supported": ["none", "client_secret_post"],
        "code_challenge_methods_supported": ["S256"]
    }))
}

// ─── RFC 7591: Dynamic Client Registration ───────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub client_name: Option<String>,
    pub redirect_uris: Option<Vec<String>>,
    #[serde(default)]
    pub grant_types: Vec<String>,
    #[serde(default)]
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: Option<String>,
}

/// `POST /register`
///
/// Register a new OAuth client dynamically. The client secret is generated
/// server-side and returned exactly once.
pub async fn handle_register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Response {
    let redirect_uris = req.redirect_uris.unwrap_or_default();
    if redirect_uris.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "invalid_client_metadata",
                "error_description": "redirect_uris is required"
            })),
        )
            .into_response();
    }

    let client = state.store.register_client(req.client_name, redirect_uris).await;

    tracing::info!(client_id = %client.client_id, "registered OAuth client");

    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "client_id": client.client_id,
            "client_secret": client.client_secret,
            "client_name": client.client_name,
            "redirect_uris": client.redirect_uris,
            "grant_types": ["authorization_code", "refresh_token"],
            "response_types": ["code"],
            "token_endpoint_auth_method": "none"
        })),
    )
        .into_response()
}

// ─── Authorization Endpoint ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub response_type: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub scope: Option<String>,
}

/// `GET /authorize`
///
/// Validates the request, parks a pending session, and redirects the user
/// agent into the delegated login flow. Every validation failure here is a
/// direct error response — never a redirect, since an unvalidated
/// `redirect_uri` must not become a redirect target.
pub async fn handle_authorize(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<AuthorizeQuery>,
) -> OAuthResult<(CookieJar, Redirect)> {
    let client_id = query
        .client_id
        .as_deref()
        .ok_or_else(|| OAuthError::invalid_request("missing client_id"))?;
    let redirect_uri = query
        .redirect_uri
        .as_deref()
        .ok_or_else(|| OAuthError::invalid_request("missing redirect_uri"))?;
    let oauth_state = query
        .state
        .as_deref()
        .ok_or_else(|| OAuthError::invalid_request("missing state"))?;
    let code_challenge = query
        .code_challenge
        .as_deref()
        .ok_or_else(|| OAuthError::invalid_request("missing code_challenge"))?;

    if query.response_type.as_deref() != Some("code") {
        return Err(OAuthError::invalid_request("response_type must be 'code'"));
    }
    if query.code_challenge_method.as_deref() != Some("S256") {
        return Err(OAuthError::invalid_request("code_challenge_method must be 'S256'"));
    }

    let client = match state.store.get_client(client_id).await {
        Some(client) => client,
        None if state.config.lenient_registration => {
            state.store.adopt_client(client_id, redirect_uri).await
        }
        None => return Err(OAuthError::invalid_client("unknown client_id")),
    };

    // Exact match, not prefix.
    if !client.redirect_uris.iter().any(|u| u == redirect_uri) {
        return Err(OAuthError::invalid_client("redirect_uri not registered for this client"));
    }

    let scope = query.scope.as_deref().unwrap_or(defaults::DEFAULT_SCOPE);

    let session = state
        .store
        .create_session(
            client_id.to_owned(),
            redirect_uri.to_owned(),
            oauth_state.to_owned(),
            code_challenge.to_owned(),
            "S256".to_owned(),
            scope.to_owned(),
        )
        .await;

    tracing::info!(client_id = %client_id, session_id = %session.session_id, "authorization started");

    let login_url =
        state.idp.authorization_url(&state.config.callback_url(), &session.session_id);

    // Browser-session cookie; the server-side TTL bounds its real lifetime.
    let cookie = Cookie::build((defaults::SESSION_COOKIE, session.session_id.clone()))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .build();

    Ok((jar.add(cookie), Redirect::to(&login_url)))
}

// ─── Token Endpoint ──────────────────────────────────────────────────────────

/// Supported grant types, dispatched as a closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GrantType {
    AuthorizationCode,
    RefreshToken,
}

impl GrantType {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "authorization_code" => Some(Self::AuthorizationCode),
            "refresh_token" => Some(Self::RefreshToken),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
}

/// `POST /token`
///
/// Exchange an authorization code (with PKCE) or a refresh token for a new
/// access/refresh token pair.
pub async fn handle_token(
    State(state): State<Arc<AppState>>,
    axum::Form(form): axum::Form<TokenRequest>,
) -> OAuthResult<Response> {
    match GrantType::parse(&form.grant_type) {
        Some(GrantType::AuthorizationCode) => authorization_code_grant(&state, &form).await,
        Some(GrantType::RefreshToken) => refresh_token_grant(&state, &form).await,
        None => Err(OAuthError::unsupported_grant_type()),
    }
}

async fn authorization_code_grant(
    state: &AppState,
    form: &TokenRequest,
) -> OAuthResult<Response> {
    let code = form
        .code
        .as_deref()
        .ok_or_else(|| OAuthError::invalid_request("missing code"))?;
    let client_id = form
        .client_id
        .as_deref()
        .ok_or_else(|| OAuthError::invalid_request("missing client_id"))?;
    let redirect_uri = form
        .redirect_uri
        .as_deref()
        .ok_or_else(|| OAuthError::invalid_request("missing redirect_uri"))?;
    let code_verifier = form
        .code_verifier
        .as_deref()
        .ok_or_else(|| OAuthError::invalid_request("missing code_verifier"))?;

    // Consume-and-check is one atomic store operation; of N concurrent
    // exchanges with this code exactly one reaches the success path.
    let auth_code = state
        .store
        .consume_auth_code(code)
        .await
        .ok_or_else(|| OAuthError::invalid_grant("authorization code is invalid, expired, or already used"))?;

    if auth_code.client_id != client_id {
        return Err(OAuthError::invalid_grant("code was issued to a different client"));
    }
    if auth_code.redirect_uri != redirect_uri {
        return Err(OAuthError::invalid_grant("redirect_uri does not match the authorization request"));
    }

    // Confidential clients also present their secret; compare fixed-time.
    if let Some(presented) = form.client_secret.as_deref() {
        let client = state
            .store
            .get_client(client_id)
            .await
            .ok_or_else(|| OAuthError::invalid_client("unknown client_id"))?;
        if !bool::from(presented.as_bytes().ct_eq(client.client_secret.as_bytes())) {
            return Err(OAuthError::invalid_client("client authentication failed"));
        }
    }

    if !pkce::verify_s256(code_verifier, &auth_code.code_challenge) {
        return Err(OAuthError::invalid_grant("PKCE verification failed"));
    }

    tracing::info!(client_id = %client_id, sub = %auth_code.user.sub, "authorization code exchanged");

    mint_token_pair(state, client_id, &auth_code.user, &auth_code.scope).await
}

async fn refresh_token_grant(state: &AppState, form: &TokenRequest) -> OAuthResult<Response> {
    let refresh_token = form
        .refresh_token
        .as_deref()
        .ok_or_else(|| OAuthError::invalid_request("missing refresh_token"))?;
    let client_id = form
        .client_id
        .as_deref()
        .ok_or_else(|| OAuthError::invalid_request("missing client_id"))?;

    // Rotation: the presented token is atomically invalidated here; a fresh
    // one is issued below. Reuse of the old token can never succeed again.
    let record = state
        .store
        .rotate_refresh_token(refresh_token, client_id)
        .await
        .ok_or_else(|| OAuthError::invalid_grant("refresh token is invalid or expired"))?;

    tracing::info!(client_id = %client_id, sub = %record.user.sub, "refresh token rotated");

    mint_token_pair(state, client_id, &record.user, &record.scope).await
}

/// Mint an access token + fresh refresh token and build the RFC 6749 §5.1
/// response (with the required cache headers).
async fn mint_token_pair(
    state: &AppState,
    client_id: &str,
    user: &UserIdentity,
    scope: &str,
) -> OAuthResult<Response> {
    let claims =
        IdentityClaims::for_identity(user, &state.config.base_url, state.config.access_token_ttl);
    let access_token = state
        .codec
        .mint(&claims)
        .map_err(|e| OAuthError::server_error(format!("token minting failed: {e}")))?;
    let refresh_token = state.store.issue_refresh_token(client_id, user.clone(), scope).await;

    let mut response = Json(serde_json::json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": state.config.access_token_ttl.as_secs(),
        "refresh_token": refresh_token,
        "scope": scope
    }))
    .into_response();

    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    Ok(response)
}
