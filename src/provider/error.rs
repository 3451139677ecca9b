use reqwest::StatusCode;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by the Gemini client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Non-2xx answer from a generate, cache or file endpoint.
    #[error("Gemini API error: HTTP {status}: {body}")]
    ProviderRejected { status: StatusCode, body: String },

    /// The provider emitted an in-band error while streaming.
    #[error("Gemini stream error: {0}")]
    Stream(String),

    /// The resumable upload handshake could not be completed.
    #[error("upload protocol error: {0}")]
    UploadProtocol(String),

    /// The uploaded file never left the PROCESSING state.
    #[error("file processing timed out after {attempts} status checks")]
    ProcessingTimeout { attempts: u32 },

    /// Creating the cached-content resource failed. Never fatal to an upload.
    #[error("cache creation failed: {0}")]
    CacheCreation(String),

    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode Gemini response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// True for the processing timeout, which callers can offer to retry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::ProcessingTimeout { .. })
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::ProviderRejected { status, .. } => Some(*status),
            Error::Transport(e) => e.status(),
            _ => None,
        }
    }
}
