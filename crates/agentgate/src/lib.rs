//! agentgate — OAuth 2.1 authorization/resource server core for
//! tool-calling agents.
//!
//! A remote agent obtains a short-lived signed access token to call a
//! protected API, while the end user's identity is established through
//! delegated login at a third-party identity provider (two-hop OAuth).
//!
//! # Features
//!
//! - **Dynamic Client Registration** (RFC 7591), with optional lenient
//!   adoption of preconfigured client identifiers
//! - **PKCE-protected authorization codes** (RFC 7636, S256 only)
//! - **Signed access tokens**: self-contained HMAC-SHA256 tokens, no lookup
//! - **Refresh-token rotation**: every refresh invalidates the old token
//! - **L1/L2 stores**: in-memory tables with write-through/read-through to a
//!   backing account service, so state survives restarts
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use agentgate::{AuthServer, Config, IdentityProvider, ProviderKind};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let idp = IdentityProvider::new(
//!         ProviderKind::Google,
//!         "idp-client-id",
//!         "idp-client-secret",
//!         Duration::from_secs(5),
//!         Duration::from_secs(10),
//!     )?;
//!     AuthServer::new(config, idp)?.run(8100).await
//! }
//! ```

pub mod config;
pub mod error;
pub mod oauth;
pub mod server;

pub use config::Config;
pub use error::{OAuthError, TokenError, UpstreamError};
pub use oauth::{IdentityProvider, OAuthStore, ProviderKind, TokenCodec};
pub use server::{AppState, AuthServer};
