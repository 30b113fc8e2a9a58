//! Resource-access guard for protected endpoints.
//!
//! Credentials are tried in capability order — `Authorization: Bearer`
//! first, then the same-origin token cookie — and both paths normalize to
//! one [`AuthenticatedUser`], so downstream handlers never branch on how the
//! caller authenticated. Rejections carry the discovery pointer that lets
//! automated clients self-discover how to authenticate.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;
use axum::response::Response;
use axum_extra::extract::CookieJar;

use crate::config::defaults;
use crate::error::OAuthError;
use crate::oauth::jwt::IdentityClaims;
use crate::server::AppState;

/// Where the accepted credential came from. Informational only; handlers see
/// the same identity either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    BearerHeader,
    SessionCookie,
}

/// The normalized result of a successful guard check.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub claims: IdentityClaims,
    pub source: CredentialSource,
}

impl AuthenticatedUser {
    /// Durable user identifier for downstream use.
    #[must_use]
    pub fn sub(&self) -> &str {
        &self.claims.sub
    }
}

/// A credential presented by the caller, in extraction order.
enum Credential {
    Bearer(String),
    Cookie(String),
}

/// Extract the first credential present: Bearer header, then token cookie.
fn extract_credential(parts: &Parts) -> Option<Credential> {
    let bearer = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| Credential::Bearer(v.trim().to_owned()));
    if bearer.is_some() {
        return bearer;
    }

    let jar = CookieJar::from_headers(&parts.headers);
    jar.get(defaults::TOKEN_COOKIE).map(|c| Credential::Cookie(c.value().to_owned()))
}

impl FromRequestParts<Arc<AppState>> for AuthenticatedUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let reject = |description: &str| {
            OAuthError::unauthorized(description)
                .into_unauthorized_response(&state.config.resource_metadata_url())
        };

        let Some(credential) = extract_credential(parts) else {
            return Err(reject("missing bearer token"));
        };

        let (token, source) = match credential {
            Credential::Bearer(token) => (token, CredentialSource::BearerHeader),
            Credential::Cookie(token) => (token, CredentialSource::SessionCookie),
        };

        match state.codec.validate(&token) {
            Ok(claims) => Ok(Self { claims, source }),
            Err(e) => {
                tracing::debug!(error = %e, "rejected credential");
                Err(reject("invalid or expired token"))
            }
        }
    }
}
