//! Token codec: mints and validates compact signed tokens
//! (`header.payload.signature`, HMAC-SHA256).
//!
//! Validation recomputes the HMAC over the received `header.payload` and
//! compares it to the received signature in constant time; an `alg: none`
//! header or any mismatch is rejected unconditionally once a secret is
//! configured. With an empty secret, signature verification is skipped
//! entirely (weak mode for disconnected local use) but expiry is still
//! enforced.
//!
//! Deliberately permissive: `iat` in the future is accepted and `exp` has no
//! upper bound. Hardening candidates, kept as-is for compatibility with
//! existing callers.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::TokenError;
use crate::oauth::types::UserIdentity;

type HmacSha256 = Hmac<Sha256>;

/// Claims carried inside the signed token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Durable cross-provider user identifier.
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub iss: String,
    #[serde(default)]
    pub iat: i64,
    /// Mandatory: absent, zero, or negative is treated as already expired.
    #[serde(default)]
    pub exp: i64,
}

impl IdentityClaims {
    /// Build claims for an established identity with the given lifetime.
    #[must_use]
    pub fn for_identity(
        user: &UserIdentity,
        issuer: &str,
        lifetime: std::time::Duration,
    ) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub: user.sub.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            provider: Some(user.provider.clone()),
            iss: issuer.to_owned(),
            iat: now,
            exp: now + i64::try_from(lifetime.as_secs()).unwrap_or(i64::MAX),
        }
    }

    /// Recover the identity carried by validated claims.
    #[must_use]
    pub fn identity(&self) -> UserIdentity {
        UserIdentity {
            sub: self.sub.clone(),
            email: self.email.clone(),
            name: self.name.clone(),
            provider: self.provider.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
}

/// Mints and validates signed tokens with a symmetric secret.
#[derive(Clone)]
pub struct TokenCodec {
    secret: String,
}

impl TokenCodec {
    /// Create a codec. An empty secret selects weak mode.
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }

    /// Produce `header.payload.signature` for the given claims.
    pub fn mint(&self, claims: &IdentityClaims) -> Result<String, TokenError> {
        let header = Header { alg: "HS256".to_owned(), typ: Some("JWT".to_owned()) };
        let header_json =
            serde_json::to_vec(&header).map_err(|_| TokenError::Malformed("header"))?;
        let payload_json =
            serde_json::to_vec(claims).map_err(|_| TokenError::Malformed("payload"))?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header_json),
            URL_SAFE_NO_PAD.encode(payload_json)
        );
        let signature = URL_SAFE_NO_PAD.encode(self.sign(signing_input.as_bytes())?);
        Ok(format!("{signing_input}.{signature}"))
    }

    /// Validate a token and return its claims.
    ///
    /// # Errors
    ///
    /// [`TokenError::Malformed`] for anything other than three decodable
    /// segments, [`TokenError::InvalidSignature`] for algorithm or signature
    /// mismatch, [`TokenError::Expired`] for a missing, non-positive, or past
    /// `exp` claim.
    pub fn validate(&self, token: &str) -> Result<IdentityClaims, TokenError> {
        let mut segments = token.split('.');
        let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
            (segments.next(), segments.next(), segments.next(), segments.next())
        else {
            return Err(TokenError::Malformed("expected three dot-separated segments"));
        };

        let header_bytes = URL_SAFE_NO_PAD
            .decode(header_b64)
            .map_err(|_| TokenError::Malformed("header is not base64url"))?;
        let header: Header = serde_json::from_slice(&header_bytes)
            .map_err(|_| TokenError::Malformed("header is not valid JSON"))?;

        if !self.secret.is_empty() {
            if header.alg != "HS256" {
                return Err(TokenError::InvalidSignature);
            }
            let received = URL_SAFE_NO_PAD
                .decode(signature_b64)
                .map_err(|_| TokenError::InvalidSignature)?;
            let signing_input = format!("{header_b64}.{payload_b64}");
            let expected = self.sign(signing_input.as_bytes())?;
            if !bool::from(expected.as_slice().ct_eq(&received)) {
                return Err(TokenError::InvalidSignature);
            }
        }

        let payload_bytes = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| TokenError::Malformed("payload is not base64url"))?;
        let claims: IdentityClaims = serde_json::from_slice(&payload_bytes)
            .map_err(|_| TokenError::Malformed("payload is not valid JSON"))?;

        if claims.exp <= 0 || claims.exp < Utc::now().timestamp() {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    fn sign(&self, input: &[u8]) -> Result<Vec<u8>, TokenError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| TokenError::InvalidSignature)?;
        mac.update(input);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("weak_mode", &self.secret.is_empty())
            .finish()
    }
}
