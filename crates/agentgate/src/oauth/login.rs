//! Delegated login against a third-party identity provider, and the
//! completion hook that turns an established identity into an authorization
//! code.
//!
//! The agent-facing leg of the flow never sees the provider: `/authorize`
//! parks a pending session and redirects the user agent here; the provider
//! redirects back to `/callback`, which finalizes the session.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use serde::Deserialize;
use url::Url;

use crate::config::defaults;
use crate::error::{OAuthError, UpstreamError};
use crate::oauth::jwt::IdentityClaims;
use crate::oauth::types::UserIdentity;
use crate::server::AppState;

/// Supported identity providers. A closed set dispatched by match, not by
/// string comparison scattered across handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Google,
    GitHub,
}

impl ProviderKind {
    /// Provider tag used in `sub` prefixes and the `provider` claim.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::GitHub => "github",
        }
    }

    /// Parse a configured provider name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "google" => Some(Self::Google),
            "github" => Some(Self::GitHub),
            _ => None,
        }
    }

    fn default_auth_url(self) -> &'static str {
        match self {
            Self::Google => "https://accounts.google.com/o/oauth2/v2/auth",
            Self::GitHub => "https://github.com/login/oauth/authorize",
        }
    }

    fn default_token_url(self) -> &'static str {
        match self {
            Self::Google => "https://oauth2.googleapis.com/token",
            Self::GitHub => "https://github.com/login/oauth/access_token",
        }
    }

    fn default_userinfo_url(self) -> &'static str {
        match self {
            Self::Google => "https://openidconnect.googleapis.com/v1/userinfo",
            Self::GitHub => "https://api.github.com/user",
        }
    }

    fn scopes(self) -> &'static str {
        match self {
            Self::Google => "openid email profile",
            Self::GitHub => "read:user user:email",
        }
    }
}

/// Token response from the provider's token endpoint.
#[derive(Debug, Deserialize)]
struct ProviderTokens {
    access_token: String,
}

/// OAuth client for the delegated identity provider.
#[derive(Clone)]
pub struct IdentityProvider {
    kind: ProviderKind,
    client_id: String,
    client_secret: String,
    auth_url: Url,
    token_url: Url,
    userinfo_url: Url,
    http: reqwest::Client,
}

impl IdentityProvider {
    /// Create a provider client with the provider's well-known endpoints.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(
        kind: ProviderKind,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        connect_timeout: std::time::Duration,
        request_timeout: std::time::Duration,
    ) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            kind,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            auth_url: Url::parse(kind.default_auth_url())?,
            token_url: Url::parse(kind.default_token_url())?,
            userinfo_url: Url::parse(kind.default_userinfo_url())?,
            http,
        })
    }

    /// Override endpoint URLs (for mock servers in tests).
    ///
    /// # Errors
    ///
    /// Returns an error if any URL is malformed.
    pub fn with_endpoints(
        mut self,
        auth_url: &str,
        token_url: &str,
        userinfo_url: &str,
    ) -> Result<Self, UpstreamError> {
        self.auth_url = Url::parse(auth_url)?;
        self.token_url = Url::parse(token_url)?;
        self.userinfo_url = Url::parse(userinfo_url)?;
        Ok(self)
    }

    /// Which provider this client talks to.
    #[must_use]
    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    /// Build the provider authorization URL for a pending session. The
    /// `session_id` rides in the provider `state` parameter so it survives
    /// the redirect chain even without the correlation cookie.
    #[must_use]
    pub fn authorization_url(&self, callback_url: &str, session_id: &str) -> String {
        let mut url = self.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", callback_url)
            .append_pair("state", session_id)
            .append_pair("scope", self.kind.scopes());
        url.into()
    }

    /// Exchange the provider's authorization code for an access token.
    pub async fn exchange_code(
        &self,
        code: &str,
        callback_url: &str,
    ) -> Result<String, UpstreamError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", callback_url),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        let response = self
            .http
            .post(self.token_url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(UpstreamError::from_response("provider token exchange", response).await);
        }

        let tokens: ProviderTokens = response.json().await?;
        Ok(tokens.access_token)
    }

    /// Fetch the provider's user info and normalize it into a [`UserIdentity`]
    /// with a durable cross-provider `sub`.
    pub async fn fetch_identity(&self, access_token: &str) -> Result<UserIdentity, UpstreamError> {
        let response = self
            .http
            .get(self.userinfo_url.clone())
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::USER_AGENT, "agentgate")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(UpstreamError::from_response("provider userinfo", response).await);
        }

        let body: serde_json::Value = response.json().await?;
        self.normalize_userinfo(&body)
            .ok_or(UpstreamError::Decode {
                operation: "provider userinfo",
                source: serde_json::Error::io(std::io::Error::other("missing subject field")),
            })
    }

    fn normalize_userinfo(&self, body: &serde_json::Value) -> Option<UserIdentity> {
        let provider = self.kind.as_str();
        let (raw_sub, email, name) = match self.kind {
            ProviderKind::Google => (
                body.get("sub")?.as_str()?.to_owned(),
                body.get("email").and_then(|v| v.as_str()).map(str::to_owned),
                body.get("name").and_then(|v| v.as_str()).map(str::to_owned),
            ),
            ProviderKind::GitHub => (
                body.get("id")?.as_i64()?.to_string(),
                body.get("email").and_then(|v| v.as_str()).map(str::to_owned),
                body.get("name")
                    .and_then(|v| v.as_str())
                    .or_else(|| body.get("login").and_then(|v| v.as_str()))
                    .map(str::to_owned),
            ),
        };

        Some(UserIdentity {
            sub: format!("{provider}:{raw_sub}"),
            email,
            name,
            provider: provider.to_owned(),
        })
    }
}

impl std::fmt::Debug for IdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityProvider")
            .field("kind", &self.kind)
            .field("client_id", &self.client_id)
            .finish()
    }
}

// ─── Completion hook ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// `GET /callback`
///
/// Completion hook for the delegated login flow. Resolves the pending session
/// (correlation cookie first, provider `state` echo as fallback), exchanges
/// the provider code for the user's identity, mints a single-use
/// authorization code, and sends the browser back to the client's registered
/// `redirect_uri` with `code` and the original `state`.
pub async fn handle_callback(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let session_id = jar
        .get(defaults::SESSION_COOKIE)
        .map(|c| c.value().to_owned())
        .or_else(|| query.state.clone());

    let Some(session_id) = session_id else {
        return OAuthError::invalid_request("missing login session correlation").into_response();
    };

    // One-time: the session is consumed whether or not the rest succeeds.
    // A failed completion is terminal; the user restarts the flow.
    let Some(mut session) = state.store.take_session(&session_id).await else {
        return OAuthError::invalid_request("login session missing or expired").into_response();
    };

    if let Some(error) = &query.error {
        let description = query.error_description.as_deref().unwrap_or("login was not completed");
        tracing::warn!(error, "identity provider reported an error");
        return redirect_error(&session, "access_denied", description);
    }

    let Some(code) = &query.code else {
        return redirect_error(&session, "invalid_request", "provider sent no code");
    };

    let callback_url = state.config.callback_url();
    let user = match establish_identity(&state.idp, code, &callback_url).await {
        Ok(user) => user,
        Err(e) => {
            tracing::error!(error = %e, "delegated login failed");
            return redirect_error(&session, "server_error", "identity provider unavailable");
        }
    };

    session.user_id = Some(user.sub.clone());
    tracing::info!(client_id = %session.client_id, sub = %user.sub, "login completed");

    let auth_code = state.store.create_auth_code(&session, user.clone()).await;

    let Ok(mut target) = Url::parse(&session.redirect_uri) else {
        return OAuthError::invalid_request("stored redirect_uri is not a valid URL").into_response();
    };
    target
        .query_pairs_mut()
        .append_pair("code", &auth_code)
        .append_pair("state", &session.state);

    // Same-origin browser fallback: carry a signed access token in a cookie
    // so the resource guard can authenticate cookie-only requests.
    let claims = IdentityClaims::for_identity(&user, &state.config.base_url, state.config.access_token_ttl);
    let jar = match state.codec.mint(&claims) {
        Ok(token) => jar.add(
            Cookie::build((defaults::TOKEN_COOKIE, token))
                .http_only(true)
                .same_site(SameSite::Lax)
                .path("/")
                .build(),
        ),
        Err(_) => jar,
    };
    let jar = jar.remove(Cookie::build(defaults::SESSION_COOKIE).path("/").build());

    (jar, Redirect::to(target.as_str())).into_response()
}

async fn establish_identity(
    idp: &IdentityProvider,
    code: &str,
    callback_url: &str,
) -> Result<UserIdentity, UpstreamError> {
    let provider_token = idp.exchange_code(code, callback_url).await?;
    idp.fetch_identity(&provider_token).await
}

/// The session's `redirect_uri` was validated at `/authorize`, so failures
/// from here on are delivered to it as an `error` query parameter.
fn redirect_error(
    session: &crate::oauth::types::PendingSession,
    error: &str,
    description: &str,
) -> Response {
    let Ok(mut target) = Url::parse(&session.redirect_uri) else {
        return OAuthError::invalid_request("stored redirect_uri is not a valid URL").into_response();
    };
    target
        .query_pairs_mut()
        .append_pair("error", error)
        .append_pair("error_description", description)
        .append_pair("state", &session.state);
    Redirect::to(target.as_str()).into_response()
}
