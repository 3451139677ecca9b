use crate::provider::{self, ClientOptions, RetryPolicy, UploadOptions};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub gemini: GeminiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    /// API key; `GEMINI_API_KEY` takes precedence.
    pub api_key: Option<String>,
    pub model: String,
    /// Model for session titles; falls back to `model`.
    pub title_model: Option<String>,
    pub base_uri: String,
    pub use_caching: bool,
    pub cache_ttl_secs: u64,
    pub system_instruction: Option<String>,
    /// File holding the default system instruction, used when `system_instruction` is unset.
    /// Relative paths resolve against the config directory.
    pub system_instruction_path: Option<String>,
    pub history_turn_limit: usize,
    pub file_processing_timeout_secs: u64,
    pub file_processing_poll_secs: u64,
    pub retry_count: u32,
    pub retry_base_delay_ms: u64,
    /// Timeout for each buffered request attempt; 0 disables it.
    pub request_timeout_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: provider::DEFAULT_MODEL.to_string(),
            title_model: None,
            base_uri: provider::DEFAULT_BASE_URI.to_string(),
            use_caching: true,
            cache_ttl_secs: 3600,
            system_instruction: None,
            system_instruction_path: None,
            history_turn_limit: 10,
            file_processing_timeout_secs: 60,
            file_processing_poll_secs: 2,
            retry_count: 3,
            retry_base_delay_ms: 2000,
            request_timeout_secs: 120,
        }
    }
}

impl Config {
    /// Load config if the file exists, otherwise return Ok(None).
    pub fn load_optional(path: impl AsRef<Path>) -> anyhow::Result<Option<Self>> {
        let path = path.as_ref();
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("failed to read config: {}", path.display()))
            }
        };

        let s = String::from_utf8(bytes).context("config is not valid UTF-8")?;
        let cfg: Config = toml::from_str(&s)
            .with_context(|| format!("failed to parse TOML: {}", path.display()))?;
        Ok(Some(cfg))
    }
}

impl GeminiConfig {
    /// Resolves into client options, reading the instruction file if needed.
    pub fn client_options(&self, config_dir: &Path) -> anyhow::Result<ClientOptions> {
        let system_instruction = match (&self.system_instruction, &self.system_instruction_path) {
            (Some(text), _) if !text.trim().is_empty() => Some(text.clone()),
            (_, Some(file)) => {
                let path = config_dir.join(file);
                match std::fs::read_to_string(&path) {
                    Ok(text) => Some(text),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        tracing::warn!(path = %path.display(), "system instruction file not found");
                        None
                    }
                    Err(e) => {
                        return Err(anyhow::Error::new(e)).with_context(|| {
                            format!("failed to read system instruction: {}", path.display())
                        })
                    }
                }
            }
            _ => None,
        };

        Ok(ClientOptions {
            model: self.model.clone(),
            title_model: self.title_model.clone(),
            base_uri: self.base_uri.clone(),
            use_caching: self.use_caching,
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            system_instruction,
            history_turn_limit: self.history_turn_limit,
            upload: UploadOptions {
                poll_interval: Duration::from_secs(self.file_processing_poll_secs.max(1)),
                processing_timeout: Duration::from_secs(self.file_processing_timeout_secs),
            },
            retry: RetryPolicy {
                max_retries: self.retry_count,
                base_delay: Duration::from_millis(self.retry_base_delay_ms),
            },
            request_timeout: (self.request_timeout_secs > 0)
                .then(|| Duration::from_secs(self.request_timeout_secs)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.gemini.model, provider::DEFAULT_MODEL);
        assert_eq!(cfg.gemini.history_turn_limit, 10);
        assert!(cfg.gemini.use_caching);
    }

    #[test]
    fn partial_table_keeps_other_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [gemini]
            model = "gemini-2.5-pro"
            use_caching = false
            file_processing_poll_secs = 5
            "#,
        )
        .unwrap();
        let opts = cfg.gemini.client_options(Path::new(".")).unwrap();
        assert_eq!(opts.model, "gemini-2.5-pro");
        assert!(!opts.use_caching);
        assert_eq!(opts.upload.poll_interval, Duration::from_secs(5));
        assert_eq!(opts.upload.processing_timeout, Duration::from_secs(60));
        assert_eq!(opts.cache_ttl, Duration::from_secs(3600));
        assert_eq!(opts.request_timeout, Some(Duration::from_secs(120)));
    }

    #[test]
    fn zero_request_timeout_disables_it() {
        let cfg: Config = toml::from_str("[gemini]\nrequest_timeout_secs = 0\n").unwrap();
        let opts = cfg.gemini.client_options(Path::new(".")).unwrap();
        assert!(opts.request_timeout.is_none());
    }

    #[test]
    fn instruction_file_is_read_relative_to_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("instruction.txt"), "Answer from the rulebook.").unwrap();
        let cfg = GeminiConfig {
            system_instruction_path: Some("instruction.txt".into()),
            ..Default::default()
        };
        let opts = cfg.client_options(dir.path()).unwrap();
        assert_eq!(opts.system_instruction.as_deref(), Some("Answer from the rulebook."));
    }

    #[test]
    fn inline_instruction_wins_over_file() {
        let cfg = GeminiConfig {
            system_instruction: Some("inline".into()),
            system_instruction_path: Some("missing.txt".into()),
            ..Default::default()
        };
        let opts = cfg.client_options(Path::new("/nonexistent")).unwrap();
        assert_eq!(opts.system_instruction.as_deref(), Some("inline"));
    }

    #[test]
    fn missing_config_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load_optional(dir.path().join("config.toml")).unwrap().is_none());
    }
}
