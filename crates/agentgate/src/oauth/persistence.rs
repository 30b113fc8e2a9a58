//! L2 persistence collaborator: the backing account service.
//!
//! The stores treat this backend as advisory, durable backing — L1 is
//! authoritative while the process lives, L2 catches restarts. Every call is
//! bounded by the configured upstream timeout so a slow backend degrades to
//! L1-only instead of hanging requests.

use async_trait::async_trait;
use url::Url;

use crate::error::UpstreamError;

/// Durable backing for an entity table. Object safe so stores can share one
/// backend behind an `Arc<dyn _>` and tests can substitute their own.
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Write-through: store (insert or overwrite) one entity.
    async fn store(
        &self,
        kind: &str,
        id: &str,
        value: serde_json::Value,
    ) -> Result<(), UpstreamError>;

    /// Read-through: fetch one entity, `None` if the backend has no record.
    async fn load(&self, kind: &str, id: &str)
    -> Result<Option<serde_json::Value>, UpstreamError>;

    /// Remove one entity. Deleting an absent record is not an error.
    async fn delete(&self, kind: &str, id: &str) -> Result<(), UpstreamError>;
}

/// HTTP implementation talking to the account service's internal state API:
/// `PUT/GET/DELETE {base}/internal/state/{kind}/{id}` with JSON bodies.
pub struct HttpPersistence {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpPersistence {
    /// Create a backend client with bounded timeouts.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is malformed or the HTTP client
    /// cannot be constructed.
    pub fn new(
        base_url: &str,
        connect_timeout: std::time::Duration,
        request_timeout: std::time::Duration,
    ) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()?;
        Ok(Self { http, base_url: Url::parse(base_url)? })
    }

    fn entity_url(&self, kind: &str, id: &str) -> Result<Url, UpstreamError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| UpstreamError::Url(url::ParseError::SetHostOnCannotBeABaseUrl))?
            .pop_if_empty()
            .extend(["internal", "state", kind, id]);
        Ok(url)
    }
}

#[async_trait]
impl PersistenceBackend for HttpPersistence {
    async fn store(
        &self,
        kind: &str,
        id: &str,
        value: serde_json::Value,
    ) -> Result<(), UpstreamError> {
        let url = self.entity_url(kind, id)?;
        let response = self.http.put(url).json(&value).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(UpstreamError::from_response("persistence write", response).await)
        }
    }

    async fn load(
        &self,
        kind: &str,
        id: &str,
    ) -> Result<Option<serde_json::Value>, UpstreamError> {
        let url = self.entity_url(kind, id)?;
        let response = self.http.get(url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(UpstreamError::from_response("persistence read", response).await);
        }
        let value = response.json().await?;
        Ok(Some(value))
    }

    async fn delete(&self, kind: &str, id: &str) -> Result<(), UpstreamError> {
        let url = self.entity_url(kind, id)?;
        let response = self.http.delete(url).send().await?;
        if response.status().is_success() || response.status() == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(UpstreamError::from_response("persistence delete", response).await)
        }
    }
}

impl std::fmt::Debug for HttpPersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPersistence").field("base_url", &self.base_url.as_str()).finish()
    }
}
