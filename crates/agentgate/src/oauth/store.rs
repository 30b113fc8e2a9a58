//! Entity stores: mutex-protected in-memory tables (L1) with write-through /
//! read-through to the persistence backend (L2).
//!
//! L1 is authoritative for the running process. Write-through failures are
//! logged and do not fail the local write; read-through only runs on an L1
//! miss and never inside a lock. Consumption of single-use entities
//! (authorization codes, refresh tokens) is a single lock-held map operation
//! so exactly one of N concurrent attempts can win.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;

use crate::config::{Config, defaults};
use crate::oauth::persistence::PersistenceBackend;
use crate::oauth::types::{AuthorizationCode, ClientRecord, PendingSession, RefreshTokenRecord, UserIdentity};

/// One entity table: L1 map plus optional L2 backing.
struct CacheTable<T> {
    kind: &'static str,
    entries: RwLock<HashMap<String, T>>,
    backend: Option<Arc<dyn PersistenceBackend>>,
}

impl<T> CacheTable<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync,
{
    fn new(kind: &'static str, backend: Option<Arc<dyn PersistenceBackend>>) -> Self {
        Self { kind, entries: RwLock::new(HashMap::new()), backend }
    }

    /// Insert or overwrite, then forward to L2. The local write always wins;
    /// an unreachable backend degrades to L1-only.
    async fn put(&self, id: &str, value: &T) {
        self.entries.write().await.insert(id.to_owned(), value.clone());
        self.write_through(id, value).await;
    }

    /// Forward one record to L2 without touching L1. Used both by [`put`] and
    /// to propagate consumed-state flips that happened under the L1 lock.
    async fn write_through(&self, id: &str, value: &T) {
        if let Some(backend) = &self.backend {
            match serde_json::to_value(value) {
                Ok(json) => {
                    if let Err(e) = backend.store(self.kind, id, json).await {
                        tracing::warn!(kind = self.kind, id, error = %e, "L2 write-through failed");
                    }
                }
                Err(e) => {
                    tracing::warn!(kind = self.kind, id, error = %e, "entity not serializable for L2");
                }
            }
        }
    }

    /// Remove the backing record so an L1-removed entity cannot read back in.
    async fn delete_backing(&self, id: &str) {
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.delete(self.kind, id).await {
                tracing::warn!(kind = self.kind, id, error = %e, "L2 delete failed");
            }
        }
    }

    /// L1 lookup, falling back to an L2 fetch that populates L1 on success.
    async fn get(&self, id: &str) -> Option<T> {
        if let Some(value) = self.entries.read().await.get(id) {
            return Some(value.clone());
        }

        let backend = self.backend.as_ref()?;
        let json = match backend.load(self.kind, id).await {
            Ok(Some(json)) => json,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(kind = self.kind, id, error = %e, "L2 read-through failed");
                return None;
            }
        };

        match serde_json::from_value::<T>(json) {
            Ok(value) => {
                let mut entries = self.entries.write().await;
                // A concurrent writer may have repopulated L1 meanwhile; keep its copy.
                Some(entries.entry(id.to_owned()).or_insert(value).clone())
            }
            Err(e) => {
                tracing::warn!(kind = self.kind, id, error = %e, "undecodable L2 record ignored");
                None
            }
        }
    }

    /// Pull an entity into L1 if the backend has it. Used before atomic
    /// consume operations so the consume itself stays a single map op.
    async fn ensure_cached(&self, id: &str) {
        if self.backend.is_some() {
            let _ = self.get(id).await;
        }
    }

    /// Atomically mutate an entry under the write lock. The closure decides
    /// success; `None` leaves the entry untouched for error reporting.
    async fn modify<R>(&self, id: &str, f: impl FnOnce(&mut T) -> Option<R>) -> Option<R> {
        let mut entries = self.entries.write().await;
        entries.get_mut(id).and_then(f)
    }

    /// Atomically remove and return an entry if the predicate accepts it.
    async fn take_if(&self, id: &str, pred: impl FnOnce(&T) -> bool) -> Option<T> {
        let mut entries = self.entries.write().await;
        if entries.get(id).is_some_and(|value| pred(value)) {
            entries.remove(id)
        } else {
            None
        }
    }

    /// Drop entries rejected by the predicate (L1 only).
    async fn retain(&self, mut keep: impl FnMut(&T) -> bool) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, value| keep(value));
        before - entries.len()
    }
}

/// The four entity stores behind the authorization server.
pub struct OAuthStore {
    clients: CacheTable<ClientRecord>,
    sessions: CacheTable<PendingSession>,
    codes: CacheTable<AuthorizationCode>,
    refresh_tokens: CacheTable<RefreshTokenRecord>,
    session_ttl: Duration,
    auth_code_ttl: Duration,
    refresh_token_ttl: Duration,
}

impl OAuthStore {
    /// L1-only store with protocol-default lifetimes.
    #[must_use]
    pub fn new() -> Self {
        Self::build(None, defaults::SESSION_TTL, defaults::AUTH_CODE_TTL, defaults::REFRESH_TOKEN_TTL)
    }

    /// Store wired to an optional L2 backend, lifetimes from configuration.
    #[must_use]
    pub fn with_backend(backend: Option<Arc<dyn PersistenceBackend>>, config: &Config) -> Self {
        Self::build(backend, config.session_ttl, config.auth_code_ttl, config.refresh_token_ttl)
    }

    fn build(
        backend: Option<Arc<dyn PersistenceBackend>>,
        session_ttl: Duration,
        auth_code_ttl: Duration,
        refresh_token_ttl: Duration,
    ) -> Self {
        Self {
            clients: CacheTable::new("client", backend.clone()),
            sessions: CacheTable::new("session", backend.clone()),
            codes: CacheTable::new("auth_code", backend.clone()),
            refresh_tokens: CacheTable::new("refresh_token", backend),
            session_ttl,
            auth_code_ttl,
            refresh_token_ttl,
        }
    }

    /// Random opaque token: two UUIDs, 256 bits.
    fn generate_token() -> String {
        format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple())
    }

    /// Random client secret, URL-safe.
    fn generate_secret() -> String {
        use base64::Engine;
        use rand::RngCore;
        let mut buf = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut buf);
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
    }

    // ─── Client registry ─────────────────────────────────────────────────

    /// Register a new client (Dynamic Client Registration). The secret is
    /// generated here and never accepted from the caller.
    pub async fn register_client(
        &self,
        client_name: Option<String>,
        redirect_uris: Vec<String>,
    ) -> ClientRecord {
        let client = ClientRecord {
            client_id: uuid::Uuid::new_v4().simple().to_string(),
            client_secret: Self::generate_secret(),
            client_name,
            redirect_uris,
            created_at: Utc::now(),
        };
        self.clients.put(&client.client_id, &client).await;
        client
    }

    /// Lenient adoption: register a caller-presented client identifier as-is,
    /// trusting the presented redirect URI. Only reachable when the
    /// `lenient_registration` toggle is on.
    pub async fn adopt_client(&self, client_id: &str, redirect_uri: &str) -> ClientRecord {
        let client = ClientRecord {
            client_id: client_id.to_owned(),
            client_secret: Self::generate_secret(),
            client_name: None,
            redirect_uris: vec![redirect_uri.to_owned()],
            created_at: Utc::now(),
        };
        self.clients.put(client_id, &client).await;
        tracing::info!(client_id, "adopted unregistered client");
        client
    }

    /// Look up a client by id.
    pub async fn get_client(&self, client_id: &str) -> Option<ClientRecord> {
        self.clients.get(client_id).await
    }

    // ─── Pending sessions ────────────────────────────────────────────────

    /// Create a pending authorization session for a validated request.
    pub async fn create_session(
        &self,
        client_id: String,
        redirect_uri: String,
        state: String,
        code_challenge: String,
        code_challenge_method: String,
        scope: String,
    ) -> PendingSession {
        let session = PendingSession {
            session_id: Self::generate_token(),
            client_id,
            redirect_uri,
            state,
            code_challenge,
            code_challenge_method,
            scope,
            user_id: None,
            created_at: Utc::now(),
        };
        self.sessions.put(&session.session_id, &session).await;
        session
    }

    /// Consume a pending session (one-time use). Expired sessions read as
    /// absent even if never swept.
    pub async fn take_session(&self, session_id: &str) -> Option<PendingSession> {
        self.sessions.ensure_cached(session_id).await;
        let ttl = self.session_ttl;
        let session = self.sessions.take_if(session_id, |s| !s.is_expired(ttl)).await?;
        self.sessions.delete_backing(session_id).await;
        Some(session)
    }

    // ─── Authorization codes ─────────────────────────────────────────────

    /// Mint a single-use authorization code bound to the consumed session and
    /// the identity established by the completion hook.
    pub async fn create_auth_code(&self, session: &PendingSession, user: UserIdentity) -> String {
        let code = AuthorizationCode {
            code: Self::generate_token(),
            client_id: session.client_id.clone(),
            user,
            redirect_uri: session.redirect_uri.clone(),
            code_challenge: session.code_challenge.clone(),
            scope: session.scope.clone(),
            expires_at: Utc::now() + ttl_chrono(self.auth_code_ttl),
            used: false,
        };
        self.codes.put(&code.code, &code).await;
        code.code
    }

    /// Consume an authorization code. The used-flag flip happens under one
    /// write lock, so of N concurrent redemption attempts exactly one
    /// receives the code; the rest observe "already used". The flipped record
    /// is written back through so a restarted process sees it consumed too.
    pub async fn consume_auth_code(&self, code: &str) -> Option<AuthorizationCode> {
        self.codes.ensure_cached(code).await;
        let consumed = self
            .codes
            .modify(code, |entry| {
                if entry.used || entry.is_expired() {
                    return None;
                }
                entry.used = true;
                Some(entry.clone())
            })
            .await?;
        self.codes.write_through(code, &consumed).await;
        Some(consumed)
    }

    // ─── Refresh tokens ──────────────────────────────────────────────────

    /// Store a fresh refresh token for the given client and identity.
    pub async fn issue_refresh_token(
        &self,
        client_id: &str,
        user: UserIdentity,
        scope: &str,
    ) -> String {
        let record = RefreshTokenRecord {
            token: Self::generate_token(),
            client_id: client_id.to_owned(),
            user,
            scope: scope.to_owned(),
            expires_at: Utc::now() + ttl_chrono(self.refresh_token_ttl),
            revoked: false,
        };
        self.refresh_tokens.put(&record.token, &record).await;
        record.token
    }

    /// Atomically invalidate a presented refresh token, returning its record
    /// so the caller can issue a replacement (rotation). Fails for unknown,
    /// revoked, expired, or wrong-client tokens — and the failed attempt does
    /// not disturb the stored entry. The revoked record stays as a tombstone
    /// in both tiers, so a replay fails even when L2 serves stale reads.
    pub async fn rotate_refresh_token(
        &self,
        token: &str,
        client_id: &str,
    ) -> Option<RefreshTokenRecord> {
        self.refresh_tokens.ensure_cached(token).await;
        let record = self
            .refresh_tokens
            .modify(token, |entry| {
                if entry.revoked || entry.is_expired() || entry.client_id != client_id {
                    return None;
                }
                entry.revoked = true;
                Some(entry.clone())
            })
            .await?;
        self.refresh_tokens.write_through(token, &record).await;
        Some(record)
    }

    // ─── Maintenance ─────────────────────────────────────────────────────

    /// Start the background sweep for TTL-expired entries.
    pub fn start_cleanup_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(defaults::CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                self.cleanup_expired().await;
            }
        });
    }

    async fn cleanup_expired(&self) {
        let session_ttl = self.session_ttl;
        let sessions = self.sessions.retain(|s| !s.is_expired(session_ttl)).await;
        // Consumed codes and revoked tokens stay until TTL expiry; removing
        // them early would let a read-through resurrect a pre-consumption copy.
        let codes = self.codes.retain(|c| !c.is_expired()).await;
        let refresh = self.refresh_tokens.retain(|r| !r.is_expired()).await;
        if sessions + codes + refresh > 0 {
            tracing::debug!(sessions, codes, refresh, "swept expired entries");
        }
    }
}

impl Default for OAuthStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OAuthStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthStore").finish()
    }
}

fn ttl_chrono(ttl: Duration) -> ChronoDuration {
    ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(0))
}
