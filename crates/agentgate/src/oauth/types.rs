//! Entity records held by the stores and persisted to the backing
//! account service.
//!
//! Records carry absolute timestamps (`chrono`) rather than process-local
//! instants so they survive a round trip through the L2 backend.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// A registered OAuth client (explicit registration or lenient adoption).
///
/// Never mutated and never deleted; accumulates for the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRecord {
    pub client_id: String,
    /// Generated server-side, never accepted from the caller.
    pub client_secret: String,
    pub client_name: Option<String>,
    pub redirect_uris: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Identity established by the delegated login flow.
///
/// `sub` is the durable cross-provider user identifier
/// (`{provider}:{provider_subject}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub provider: String,
}

/// A pending authorization session, created by `/authorize` and consumed by
/// the completion hook. One-time use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingSession {
    pub session_id: String,
    pub client_id: String,
    pub redirect_uri: String,
    /// Client-supplied CSRF state, echoed back on the final redirect.
    pub state: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
    pub scope: String,
    /// Set exactly once by the completion hook.
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PendingSession {
    /// Sessions expire a fixed interval after creation.
    #[must_use]
    pub fn is_expired(&self, ttl: std::time::Duration) -> bool {
        let Ok(ttl) = ChronoDuration::from_std(ttl) else {
            return true;
        };
        Utc::now() > self.created_at + ttl
    }
}

/// A single-use authorization code bound to the session that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub code: String,
    pub client_id: String,
    /// Identity established before the code was minted; `user.sub` is the
    /// code's `user_id`.
    pub user: UserIdentity,
    pub redirect_uri: String,
    pub code_challenge: String,
    pub scope: String,
    pub expires_at: DateTime<Utc>,
    /// Flips to true on first successful exchange. Any later exchange with
    /// the same code fails, well-formed or not. The used record stays in both
    /// tiers as a tombstone until the TTL elapses.
    #[serde(default)]
    pub used: bool,
}

impl AuthorizationCode {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// An opaque refresh token, stored server-side and rotated on every use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub token: String,
    pub client_id: String,
    pub user: UserIdentity,
    pub scope: String,
    pub expires_at: DateTime<Utc>,
    /// Flips to true when the token is rotated out. The revoked record stays
    /// in both tiers as a tombstone until the TTL elapses, so a replay fails
    /// even against a backend serving stale reads.
    #[serde(default)]
    pub revoked: bool,
}

impl RefreshTokenRecord {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn identity() -> UserIdentity {
        UserIdentity {
            sub: "google:12345".into(),
            email: Some("user@example.com".into()),
            name: None,
            provider: "google".into(),
        }
    }

    #[test]
    fn test_session_expiry() {
        let mut session = PendingSession {
            session_id: "sid".into(),
            client_id: "c1".into(),
            redirect_uri: "http://localhost/cb".into(),
            state: "xyz".into(),
            code_challenge: "ch".into(),
            code_challenge_method: "S256".into(),
            scope: "tools".into(),
            user_id: None,
            created_at: Utc::now(),
        };
        assert!(!session.is_expired(Duration::from_secs(600)));

        session.created_at = Utc::now() - ChronoDuration::seconds(601);
        assert!(session.is_expired(Duration::from_secs(600)));
    }

    #[test]
    fn test_code_expiry() {
        let mut code = AuthorizationCode {
            code: "ac".into(),
            client_id: "c1".into(),
            user: identity(),
            redirect_uri: "http://localhost/cb".into(),
            code_challenge: "ch".into(),
            scope: "tools".into(),
            expires_at: Utc::now() + ChronoDuration::seconds(300),
            used: false,
        };
        assert!(!code.is_expired());

        code.expires_at = Utc::now() - ChronoDuration::seconds(1);
        assert!(code.is_expired());
    }

    #[test]
    fn test_records_round_trip_as_json() {
        let record = RefreshTokenRecord {
            token: "rt".into(),
            client_id: "c1".into(),
            user: identity(),
            scope: "tools".into(),
            expires_at: Utc::now() + ChronoDuration::days(7),
            revoked: false,
        };
        let json = serde_json::to_value(&record).unwrap();
        let back: RefreshTokenRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.user, record.user);
        assert_eq!(back.token, "rt");
    }

    #[test]
    fn test_consumption_flags_default_to_unconsumed() {
        // Records written before the flags existed deserialize as live.
        let json = serde_json::json!({
            "token": "rt",
            "client_id": "c1",
            "user": {"sub": "google:1", "provider": "google"},
            "scope": "tools",
            "expires_at": Utc::now().to_rfc3339()
        });
        let record: RefreshTokenRecord = serde_json::from_value(json).unwrap();
        assert!(!record.revoked);
    }
}
