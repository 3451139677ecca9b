//! Wire shapes for the Generative Language API (`v1beta`).
//!
//! Every response field is optional: the provider omits empty arrays and
//! unset metadata freely, so decoding must never depend on presence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<SystemInstruction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_content: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn text(role: &str, text: impl Into<String>) -> Self {
        Self {
            role: Some(role.to_string()),
            parts: vec![Part::text(text)],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_data: Option<FileData>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            file_data: None,
        }
    }

    pub fn file(file_uri: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            text: None,
            file_data: Some(FileData {
                file_uri: file_uri.into(),
                mime_type: mime_type.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    pub mime_type: String,
    pub file_uri: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInstruction {
    pub parts: Vec<Part>,
}

impl SystemInstruction {
    /// Blank instructions are omitted from the request entirely.
    pub fn from_text(text: Option<&str>) -> Option<Self> {
        let text = text?;
        if text.trim().is_empty() {
            return None;
        }
        Some(Self {
            parts: vec![Part::text(text)],
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub cached_content: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenates every text part, candidate order then part order.
    pub fn text(&self) -> String {
        self.fragments().collect()
    }

    /// Non-empty text parts in candidate order then part order.
    pub fn fragments(&self) -> impl Iterator<Item = &str> {
        self.candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| p.text.as_deref())
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
}

/// One decoded streaming event: either candidates or an in-band error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamEvent {
    #[serde(default)]
    pub candidates: Option<Vec<Candidate>>,
    #[serde(default)]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCacheRequest {
    pub model: String,
    pub display_name: String,
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<SystemInstruction>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateCacheRequest {
    pub ttl: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheResponse {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub ttl: Option<String>,
    #[serde(default)]
    pub expire_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartUploadRequest {
    pub file: StartUploadFile,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartUploadFile {
    pub display_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileUploadResponse {
    #[serde(default)]
    pub file: Option<FileResource>,
}

/// File metadata as returned by the upload finalize and `files.get` calls.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResource {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub expiration_time: Option<DateTime<Utc>>,
}

impl FileResource {
    /// Fills fields missing here from `older`.
    pub fn merged_over(self, older: &FileResource) -> FileResource {
        FileResource {
            name: self.name.or_else(|| older.name.clone()),
            uri: self.uri.or_else(|| older.uri.clone()),
            display_name: self.display_name.or_else(|| older.display_name.clone()),
            state: self.state.or_else(|| older.state.clone()),
            mime_type: self.mime_type.or_else(|| older.mime_type.clone()),
            expiration_time: self.expiration_time.or(older.expiration_time),
        }
    }

    /// Last path segment of `files/{id}`.
    pub fn id(&self) -> Option<&str> {
        let name = self.name.as_deref()?;
        name.rsplit('/').next().filter(|s| !s.is_empty())
    }
}
