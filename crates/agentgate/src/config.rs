//! Configuration for the agentgate authorization server.

use std::time::Duration;

/// Protocol and lifetime constants.
pub mod defaults {
    use std::time::Duration;

    /// Pending authorization session lifetime: 10 minutes.
    pub const SESSION_TTL: Duration = Duration::from_secs(600);

    /// Authorization code lifetime: 5 minutes.
    pub const AUTH_CODE_TTL: Duration = Duration::from_secs(300);

    /// Refresh token lifetime: 7 days.
    pub const REFRESH_TOKEN_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

    /// Access token lifetime: 1 hour.
    pub const ACCESS_TOKEN_TTL: Duration = Duration::from_secs(3600);

    /// Ceiling for calls to the identity provider and the persistence backend.
    pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

    /// Connection timeout for collaborator HTTP clients.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Background sweep interval for expired store entries.
    pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

    /// Cookie correlating the two-hop login redirect chain.
    pub const SESSION_COOKIE: &str = "ag_sid";

    /// Cookie carrying a signed access token for same-origin browser use.
    pub const TOKEN_COOKIE: &str = "ag_token";

    /// Scopes advertised in discovery metadata. Scopes are opaque to this
    /// server; the list is informational only.
    pub const SCOPES_SUPPORTED: &[&str] = &["tools", "profile"];

    /// Scope assumed when an authorization request omits one.
    pub const DEFAULT_SCOPE: &str = "tools";
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Public base URL of this server; also the token issuer string.
    pub base_url: String,

    /// HMAC-SHA256 signing secret for access tokens. An empty secret disables
    /// signature verification (weak mode for disconnected local use); expiry
    /// is still enforced.
    pub signing_secret: String,

    /// Accept unknown-but-presented client identifiers at `/authorize` by
    /// silently registering them. Improves interoperability with
    /// preconfigured desktop agents at the cost of client-identity
    /// guarantees.
    pub lenient_registration: bool,

    /// Base URL of the backing account service (L2 persistence). `None` runs
    /// the stores in L1-only mode.
    pub persistence_url: Option<String>,

    /// Pending session lifetime.
    pub session_ttl: Duration,

    /// Authorization code lifetime.
    pub auth_code_ttl: Duration,

    /// Refresh token lifetime.
    pub refresh_token_ttl: Duration,

    /// Access token lifetime.
    pub access_token_ttl: Duration,

    /// Per-request ceiling for collaborator calls.
    pub upstream_timeout: Duration,

    /// Connection timeout for collaborator HTTP clients.
    pub connect_timeout: Duration,
}

impl Config {
    /// Create a configuration with protocol-default lifetimes.
    #[must_use]
    pub fn new(base_url: impl Into<String>, signing_secret: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            signing_secret: signing_secret.into(),
            lenient_registration: true,
            persistence_url: None,
            session_ttl: defaults::SESSION_TTL,
            auth_code_ttl: defaults::AUTH_CODE_TTL,
            refresh_token_ttl: defaults::REFRESH_TOKEN_TTL,
            access_token_ttl: defaults::ACCESS_TOKEN_TTL,
            upstream_timeout: defaults::UPSTREAM_TIMEOUT,
            connect_timeout: defaults::CONNECT_TIMEOUT,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `AGENTGATE_BASE_URL` is missing.
    pub fn from_env() -> anyhow::Result<Self> {
        let base_url = std::env::var("AGENTGATE_BASE_URL")
            .map_err(|_| anyhow::anyhow!("AGENTGATE_BASE_URL must be set"))?;
        let signing_secret = std::env::var("AGENTGATE_SIGNING_SECRET").unwrap_or_default();

        if signing_secret.is_empty() {
            tracing::warn!(
                "no signing secret configured; access tokens will not be signature-checked"
            );
        }

        let mut config = Self::new(base_url, signing_secret);
        config.persistence_url = std::env::var("AGENTGATE_PERSISTENCE_URL").ok();
        if let Ok(value) = std::env::var("AGENTGATE_LENIENT_REGISTRATION") {
            config.lenient_registration = value != "0" && !value.eq_ignore_ascii_case("false");
        }
        Ok(config)
    }

    /// Create a test configuration with short collaborator timeouts.
    #[must_use]
    pub fn for_testing(base_url: &str) -> Self {
        let mut config = Self::new(base_url, "test-signing-secret");
        config.upstream_timeout = Duration::from_secs(2);
        config.connect_timeout = Duration::from_secs(1);
        config
    }

    /// Check whether signature verification is active.
    #[must_use]
    pub fn has_signing_secret(&self) -> bool {
        !self.signing_secret.is_empty()
    }

    /// URL of the protected-resource metadata document.
    #[must_use]
    pub fn resource_metadata_url(&self) -> String {
        format!("{}/.well-known/oauth-protected-resource", self.base_url)
    }

    /// URL the identity provider redirects back to after login.
    #[must_use]
    pub fn callback_url(&self) -> String {
        format!("{}/callback", self.base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::new("https://gate.example.com", "secret");
        assert!(config.has_signing_secret());
        assert!(config.lenient_registration);
        assert_eq!(config.session_ttl, Duration::from_secs(600));
        assert_eq!(config.auth_code_ttl, Duration::from_secs(300));
    }

    #[test]
    fn test_weak_mode_detection() {
        let config = Config::new("https://gate.example.com", "");
        assert!(!config.has_signing_secret());
    }

    #[test]
    fn test_derived_urls() {
        let config = Config::new("https://gate.example.com", "s");
        assert_eq!(
            config.resource_metadata_url(),
            "https://gate.example.com/.well-known/oauth-protected-resource"
        );
        assert_eq!(config.callback_url(), "https://gate.example.com/callback");
    }
}
