//! HTTP server assembly.
//!
//! All shared state lives in an explicitly constructed [`AppState`] injected
//! through axum's `State` extractor — no package-level singletons, so tests
//! run against isolated store instances.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::oauth::guard::AuthenticatedUser;
use crate::oauth::jwt::TokenCodec;
use crate::oauth::login::IdentityProvider;
use crate::oauth::persistence::{HttpPersistence, PersistenceBackend};
use crate::oauth::store::OAuthStore;
use crate::oauth::{handlers, login};

/// Shared state for all handlers.
pub struct AppState {
    pub config: Config,
    pub store: Arc<OAuthStore>,
    pub codec: TokenCodec,
    pub idp: IdentityProvider,
}

impl AppState {
    /// Build state from configuration, wiring the L2 backend when one is
    /// configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistence backend URL is malformed.
    pub fn new(config: Config, idp: IdentityProvider) -> anyhow::Result<Self> {
        let backend: Option<Arc<dyn PersistenceBackend>> = match &config.persistence_url {
            Some(url) => Some(Arc::new(HttpPersistence::new(
                url,
                config.connect_timeout,
                config.upstream_timeout,
            )?)),
            None => {
                tracing::info!("no persistence backend configured; stores run L1-only");
                None
            }
        };

        let store = Arc::new(OAuthStore::with_backend(backend, &config));
        let codec = TokenCodec::new(config.signing_secret.clone());

        Ok(Self { config, store, codec, idp })
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").field("base_url", &self.config.base_url).finish()
    }
}

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/.well-known/oauth-authorization-server",
            get(handlers::handle_auth_server_metadata),
        )
        .route(
            "/.well-known/oauth-protected-resource",
            get(handlers::handle_protected_resource),
        )
        .route("/register", post(handlers::handle_register))
        .route("/authorize", get(handlers::handle_authorize))
        .route("/callback", get(login::handle_callback))
        .route("/token", post(handlers::handle_token))
        .route("/invoke", post(handle_invoke))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The authorization/resource server.
pub struct AuthServer {
    state: Arc<AppState>,
}

impl AuthServer {
    /// Assemble the server from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a collaborator URL is malformed.
    pub fn new(config: Config, idp: IdentityProvider) -> anyhow::Result<Self> {
        Ok(Self { state: Arc::new(AppState::new(config, idp)?) })
    }

    /// The router, for embedding or tests.
    #[must_use]
    pub fn router(&self) -> Router {
        create_router(Arc::clone(&self.state))
    }

    /// Serve until ctrl-c.
    ///
    /// # Errors
    ///
    /// Returns error on bind or server failure.
    pub async fn run(self, port: u16) -> anyhow::Result<()> {
        Arc::clone(&self.state.store).start_cleanup_task();

        let router = self.router();
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        tracing::info!(%addr, issuer = %self.state.config.base_url, "authorization server listening");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

        tracing::info!("server shut down");
        Ok(())
    }
}

impl std::fmt::Debug for AuthServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthServer").finish()
    }
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "agentgate",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// `POST /invoke`
///
/// The protected tool-call surface. Authorization and tool dispatch belong to
/// the downstream business API; this endpoint demonstrates the guard and
/// hands the normalized identity through.
async fn handle_invoke(
    State(_state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<serde_json::Value>,
) -> impl IntoResponse {
    tracing::debug!(sub = %user.sub(), "authenticated tool call");
    Json(serde_json::json!({
        "status": "accepted",
        "sub": user.sub(),
        "provider": user.claims.provider,
        "echo": payload,
    }))
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("Failed to install CTRL+C handler");
    tracing::info!("received shutdown signal");
}
