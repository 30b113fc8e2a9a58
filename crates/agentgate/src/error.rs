//! Error types for the agentgate authorization server.
//!
//! Uses `thiserror` for structured error handling with automatic `From` implementations.
//! Protocol-facing failures are expressed as [`OAuthError`] values carrying the
//! RFC 6749 error code vocabulary; transport failures against collaborators
//! (identity provider, persistence backend) are [`UpstreamError`].

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

/// Errors from HTTP collaborators (identity provider, persistence backend).
#[derive(thiserror::Error, Debug)]
pub enum UpstreamError {
    /// HTTP transport error (connection, DNS, TLS, timeout).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Collaborator answered with a non-success status.
    #[error("{operation} failed with status {status}: {detail}")]
    Status {
        /// Which call failed (for logs and error bodies).
        operation: &'static str,
        /// HTTP status code returned.
        status: u16,
        /// Response body, best effort.
        detail: String,
    },

    /// Collaborator returned a body we could not decode.
    #[error("failed to decode {operation} response: {source}")]
    Decode {
        /// Which call produced the body.
        operation: &'static str,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Collaborator base URL is malformed.
    #[error("invalid collaborator URL: {0}")]
    Url(#[from] url::ParseError),
}

impl UpstreamError {
    /// Create a status error from a response, consuming its body.
    pub async fn from_response(operation: &'static str, response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let detail = response.text().await.unwrap_or_default();
        Self::Status { operation, status, detail }
    }

    /// Returns true if retrying the same call later could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Status { status, .. } => *status >= 500,
            Self::Decode { .. } | Self::Url(_) => false,
        }
    }
}

/// Errors from minting or validating signed tokens.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TokenError {
    /// Token does not have the `header.payload.signature` shape, or a segment
    /// failed to decode.
    #[error("malformed token: {0}")]
    Malformed(&'static str),

    /// Signature missing, wrong, or produced with a rejected algorithm.
    #[error("signature verification failed")]
    InvalidSignature,

    /// `exp` claim missing, non-positive, or in the past.
    #[error("token expired")]
    Expired,
}

/// OAuth protocol error codes (RFC 6749 §5.2 vocabulary).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthErrorCode {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    UnsupportedGrantType,
    ServerError,
    Unauthorized,
}

impl OAuthErrorCode {
    /// Wire representation of the error code.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant => "invalid_grant",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::ServerError => "server_error",
            Self::Unauthorized => "unauthorized",
        }
    }

    /// HTTP status for a direct (non-redirect) error response.
    #[must_use]
    pub fn status(self) -> StatusCode {
        match self {
            Self::InvalidRequest
            | Self::InvalidClient
            | Self::InvalidGrant
            | Self::UnsupportedGrantType => StatusCode::BAD_REQUEST,
            Self::ServerError => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }
}

/// A protocol-facing OAuth error, rendered as `{error, error_description}`.
#[derive(thiserror::Error, Debug)]
#[error("{}: {description}", code.as_str())]
pub struct OAuthError {
    /// RFC 6749 error code.
    pub code: OAuthErrorCode,
    /// Human-readable description (safe to return to the caller).
    pub description: String,
}

impl OAuthError {
    fn new(code: OAuthErrorCode, description: impl Into<String>) -> Self {
        Self { code, description: description.into() }
    }

    /// Missing or malformed required parameter.
    #[must_use]
    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorCode::InvalidRequest, description)
    }

    /// Unknown client or redirect_uri mismatch.
    #[must_use]
    pub fn invalid_client(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorCode::InvalidClient, description)
    }

    /// Code or refresh token unknown, expired, already used, or PKCE mismatch.
    /// Deliberately does not distinguish those cases to avoid leaking existence.
    #[must_use]
    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorCode::InvalidGrant, description)
    }

    /// Any `grant_type` other than the two supported ones.
    #[must_use]
    pub fn unsupported_grant_type() -> Self {
        Self::new(
            OAuthErrorCode::UnsupportedGrantType,
            "supported grant types are authorization_code and refresh_token",
        )
    }

    /// Internal failure or unreachable collaborator. Retryable by the caller.
    #[must_use]
    pub fn server_error(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorCode::ServerError, description)
    }

    /// Resource-access guard rejection.
    #[must_use]
    pub fn unauthorized(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorCode::Unauthorized, description)
    }

    /// JSON body for this error.
    #[must_use]
    pub fn body(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.code.as_str(),
            "error_description": self.description,
        })
    }

    /// Render as a `401` carrying the discovery pointer required by the
    /// protected-resource metadata contract.
    #[must_use]
    pub fn into_unauthorized_response(self, resource_metadata_url: &str) -> Response {
        let challenge = format!("Bearer resource_metadata=\"{resource_metadata_url}\"");
        let mut response =
            (StatusCode::UNAUTHORIZED, Json(self.body())).into_response();
        if let Ok(value) = HeaderValue::from_str(&challenge) {
            response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
        }
        response
    }
}

impl From<UpstreamError> for OAuthError {
    fn from(err: UpstreamError) -> Self {
        Self::server_error(err.to_string())
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        (self.code.status(), Json(self.body())).into_response()
    }
}

/// Result alias for protocol operations.
pub type OAuthResult<T> = Result<T, OAuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_wire_names() {
        assert_eq!(OAuthErrorCode::InvalidGrant.as_str(), "invalid_grant");
        assert_eq!(OAuthErrorCode::UnsupportedGrantType.as_str(), "unsupported_grant_type");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(OAuthErrorCode::InvalidRequest.status(), StatusCode::BAD_REQUEST);
        assert_eq!(OAuthErrorCode::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(OAuthErrorCode::ServerError.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_body_shape() {
        let err = OAuthError::invalid_grant("code already used");
        let body = err.body();
        assert_eq!(body["error"], "invalid_grant");
        assert_eq!(body["error_description"], "code already used");
    }

    #[test]
    fn test_upstream_retryable() {
        let err = UpstreamError::Status { operation: "token exchange", status: 502, detail: String::new() };
        assert!(err.is_retryable());

        let err = UpstreamError::Status { operation: "token exchange", status: 400, detail: String::new() };
        assert!(!err.is_retryable());
    }
}
