//! Gemini (Generative Language API) client.
//!
//! [`GeminiClient`] is what the calling layer talks to. It reads session
//! state but never writes it: results come back as values for the caller to
//! merge and persist.

pub mod cache;
pub mod completion;
pub mod error;
pub mod request;
pub mod stream;
pub mod transport;
pub mod types;
pub mod upload;

pub use cache::{CacheManager, CacheSpec, CacheView};
pub use completion::{Completion, CompletionClient};
pub use error::{Error, Result};
pub use request::RequestBuilder;
pub use stream::{StreamingClient, TextStream};
pub use transport::{GoogleAuth, RetryPolicy, Transport};
pub use upload::{Document, FileUploadCoordinator, UploadOptions};

use crate::session::Session;
use chrono::{DateTime, Utc};
use std::time::Duration;

pub const DEFAULT_BASE_URI: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-lite";

/// Resolved client settings.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub model: String,
    pub title_model: Option<String>,
    pub base_uri: String,
    pub use_caching: bool,
    pub cache_ttl: Duration,
    pub system_instruction: Option<String>,
    pub history_turn_limit: usize,
    pub upload: UploadOptions,
    pub retry: RetryPolicy,
    /// Per-attempt limit for buffered calls; `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            title_model: None,
            base_uri: DEFAULT_BASE_URI.to_string(),
            use_caching: true,
            cache_ttl: Duration::from_secs(60 * 60),
            system_instruction: None,
            history_turn_limit: 10,
            upload: UploadOptions::default(),
            retry: RetryPolicy::default(),
            request_timeout: Some(Duration::from_secs(120)),
        }
    }
}

/// What a successful document upload produced.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadResult {
    pub file_id: String,
    pub display_name: String,
    pub uploaded_at: DateTime<Utc>,
    pub cache_id: Option<String>,
    pub cache_expires_at: Option<DateTime<Utc>>,
    pub file_uri: Option<String>,
    pub mime_type: Option<String>,
    /// Instruction baked into the cache, if any.
    pub system_instruction: Option<String>,
    pub expiration_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    options: ClientOptions,
    builder: RequestBuilder,
    completion: CompletionClient,
    streaming: StreamingClient,
    uploads: FileUploadCoordinator,
    caches: CacheManager,
}

impl GeminiClient {
    pub fn new(http: reqwest::Client, auth: GoogleAuth, options: ClientOptions) -> Result<Self> {
        let transport = Transport::new(http, auth, &options.base_uri, options.retry)?
            .with_request_timeout(options.request_timeout);
        Ok(Self {
            builder: RequestBuilder {
                history_turn_limit: options.history_turn_limit,
                default_system_instruction: options.system_instruction.clone(),
            },
            completion: CompletionClient::new(transport.clone()),
            streaming: StreamingClient::new(transport.clone()),
            uploads: FileUploadCoordinator::new(transport.clone(), options.upload),
            caches: CacheManager::new(transport, options.cache_ttl),
            options,
        })
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub async fn generate(&self, session: &Session, message: &str) -> Result<Completion> {
        let req = self.builder.build(session, message, Utc::now());
        self.completion.generate(&self.options.model, &req).await
    }

    pub async fn generate_streaming(&self, session: &Session, message: &str) -> Result<TextStream> {
        let req = self.builder.build(session, message, Utc::now());
        self.streaming.stream(&self.options.model, &req).await
    }

    /// Best effort: any failure is logged and reported as `None`.
    pub async fn generate_title(&self, session: &Session, prompt: &str) -> Option<String> {
        let model = self
            .options
            .title_model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(&self.options.model);
        let req = completion::title_request(prompt);

        match self.completion.generate(model, &req).await {
            Ok(c) => completion::tidy_title(&c.text),
            Err(e) => {
                tracing::warn!(session = %session.id, error = %e, "title generation failed");
                None
            }
        }
    }

    /// Uploads `doc`, waits for it to become active and, when caching is
    /// enabled, wraps it in a cached-content resource.
    ///
    /// Cache creation failures are logged and leave the cache fields empty.
    pub async fn upload_document(
        &self,
        owner_id: &str,
        doc: &Document,
        system_instruction: Option<&str>,
    ) -> Result<UploadResult> {
        tracing::info!(owner = owner_id, file = %doc.file_name, bytes = doc.bytes.len(), "uploading document");
        let file = self.uploads.upload(doc).await?;

        let instruction = system_instruction
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .or_else(|| self.options.system_instruction.clone());

        let mut cache = None;
        if self.options.use_caching {
            match &file.uri {
                Some(uri) => {
                    let spec = CacheSpec {
                        model: &self.options.model,
                        display_name: &doc.file_name,
                        file_uri: uri,
                        mime_type: file.mime_type.as_deref().unwrap_or(&doc.mime_type),
                        system_instruction: instruction.as_deref(),
                    };
                    match self.caches.create(spec).await {
                        Ok(view) => cache = Some(view),
                        Err(e) => tracing::warn!(owner = owner_id, error = %e, "cache creation failed; continuing without cache"),
                    }
                }
                None => tracing::warn!(owner = owner_id, "uploaded file has no URI; skipping cache"),
            }
        }

        Ok(UploadResult {
            file_id: file.name.clone().unwrap_or_default(),
            display_name: file.display_name.clone().unwrap_or_else(|| doc.file_name.clone()),
            uploaded_at: Utc::now(),
            cache_id: cache.as_ref().map(|c| c.id.clone()),
            cache_expires_at: cache.map(|c| c.expires_at),
            file_uri: file.uri,
            mime_type: file.mime_type,
            system_instruction: instruction,
            expiration_time: file.expiration_time,
        })
    }

    pub async fn get_cache(&self, cache_id: &str) -> Result<Option<CacheView>> {
        self.caches.get(cache_id).await
    }
}
