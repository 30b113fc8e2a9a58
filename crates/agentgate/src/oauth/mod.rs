//! OAuth 2.1 authorization-server core.
//!
//! Registration, PKCE-protected authorization-code issuance, delegated login
//! completion, signed-token minting/validation, and refresh-token rotation.
//!
//! ## Supported standards
//! - RFC 9728: OAuth Protected Resource Metadata
//! - RFC 8414: OAuth Authorization Server Metadata
//! - RFC 7591: Dynamic Client Registration
//! - RFC 7636: PKCE (S256)
//! - RFC 6749: Authorization Code + Refresh Token grants

pub mod guard;
pub mod handlers;
pub mod jwt;
pub mod login;
pub mod persistence;
pub mod pkce;
pub mod store;
pub mod types;

pub use guard::AuthenticatedUser;
pub use jwt::{IdentityClaims, TokenCodec};
pub use login::{IdentityProvider, ProviderKind};
pub use store::OAuthStore;
