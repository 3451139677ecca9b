use super::error::{Error, Result};
use super::transport::{rejected, Transport};
use super::types::{
    CacheResponse, Content, CreateCacheRequest, Part, SystemInstruction, UpdateCacheRequest,
};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// A cached-content resource as the provider currently reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheView {
    pub id: String,
    pub expires_at: DateTime<Utc>,
}

/// Inputs for a new cached-content resource wrapping one uploaded file.
#[derive(Debug, Clone)]
pub struct CacheSpec<'a> {
    pub model: &'a str,
    pub display_name: &'a str,
    pub file_uri: &'a str,
    pub mime_type: &'a str,
    pub system_instruction: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct CacheManager {
    transport: Transport,
    ttl: Duration,
}

impl CacheManager {
    pub fn new(transport: Transport, ttl: Duration) -> Self {
        Self { transport, ttl }
    }

    /// Creates the cache, then sets its TTL in a second call.
    ///
    /// The two calls are not atomic: if the TTL update fails the cache keeps
    /// the provider's default lifetime. Only the create call can fail this.
    pub async fn create(&self, spec: CacheSpec<'_>) -> Result<CacheView> {
        let model = if spec.model.starts_with("models/") {
            spec.model.to_string()
        } else {
            format!("models/{}", spec.model)
        };
        let body = CreateCacheRequest {
            model,
            display_name: spec.display_name.to_string(),
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part::file(spec.file_uri, spec.mime_type)],
            }],
            system_instruction: SystemInstruction::from_text(spec.system_instruction),
        };

        let url = self.transport.endpoint("v1beta/cachedContents", &[])?;
        let resp = self
            .transport
            .send("cachedContents.create", |http| http.post(url.clone()).json(&body))
            .await?;
        if !resp.status().is_success() {
            let err = rejected(resp).await;
            return Err(Error::CacheCreation(err.to_string()));
        }

        let created: CacheResponse = serde_json::from_slice(&resp.bytes().await?)?;
        let Some(id) = created.name.filter(|n| !n.is_empty()) else {
            return Err(Error::CacheCreation("response carried no cache name".into()));
        };
        tracing::info!(cache = %id, display_name = spec.display_name, "created cached content");

        let expires_at = match self.update_ttl(&id).await {
            Ok(updated) => updated.expire_time.or(created.expire_time),
            Err(e) => {
                tracing::warn!(cache = %id, error = %e, "failed to set cache TTL; provider default applies");
                created.expire_time
            }
        };

        Ok(CacheView {
            expires_at: expires_at.unwrap_or_else(|| self.estimated_expiry()),
            id,
        })
    }

    async fn update_ttl(&self, cache_id: &str) -> Result<CacheResponse> {
        let body = UpdateCacheRequest {
            ttl: format!("{}s", self.ttl.as_secs()),
        };
        let url = self
            .transport
            .endpoint(&format!("v1beta/{cache_id}"), &[("updateMask", "ttl")])?;
        let resp = self
            .transport
            .send("cachedContents.patch", |http| http.patch(url.clone()).json(&body))
            .await?;
        if !resp.status().is_success() {
            return Err(rejected(resp).await);
        }
        let bytes = resp.bytes().await?;
        if bytes.is_empty() {
            return Ok(CacheResponse::default());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Current metadata for `cache_id`, or `None` if the provider rejects the lookup.
    pub async fn get(&self, cache_id: &str) -> Result<Option<CacheView>> {
        let url = self.transport.endpoint(&format!("v1beta/{cache_id}"), &[])?;
        let resp = self
            .transport
            .send("cachedContents.get", |http| http.get(url.clone()))
            .await?;
        if !resp.status().is_success() {
            tracing::debug!(cache = cache_id, status = resp.status().as_u16(), "cache lookup rejected");
            return Ok(None);
        }

        let body: CacheResponse = serde_json::from_slice(&resp.bytes().await?)?;
        Ok(Some(CacheView {
            id: body.name.unwrap_or_else(|| cache_id.to_string()),
            expires_at: body.expire_time.unwrap_or_else(|| self.estimated_expiry()),
        }))
    }

    fn estimated_expiry(&self) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::zero());
        Utc::now() + ttl
    }
}
