//! Chat session state owned by the calling layer.
//!
//! The provider client only reads a [`Session`]; every mutation here is made
//! by the caller after an operation has completed.

use crate::provider::UploadResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_TITLE: &str = "New chat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// One exchange: an optional user message and an optional reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    #[serde(default)]
    pub user: Option<Message>,
    #[serde(default)]
    pub assistant: Option<Message>,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn is_empty(&self) -> bool {
        self.user.is_none() && self.assistant.is_none()
    }

    /// Messages present in this turn, user side first.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.user.iter().chain(self.assistant.iter())
    }
}

/// Which side of a turn to delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    User,
    Assistant,
}

#[derive(Debug, thiserror::Error)]
#[error("turn index {index} out of range ({len} turns)")]
pub struct TurnIndexError {
    pub index: usize,
    pub len: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    #[serde(default)]
    pub owner_id: Option<String>,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub turns: Vec<Turn>,

    #[serde(default)]
    pub cache_id: Option<String>,
    #[serde(default)]
    pub cache_expires_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_uri: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub file_expires_at: Option<DateTime<Utc>>,

    /// Local copy of the uploaded document, used to re-upload after expiry.
    #[serde(default)]
    pub source_path: Option<std::path::PathBuf>,

    #[serde(default)]
    pub system_instruction: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: None,
            title: DEFAULT_TITLE.to_string(),
            created_at: now,
            updated_at: now,
            turns: Vec::new(),
            cache_id: None,
            cache_expires_at: None,
            file_id: None,
            file_name: None,
            file_uri: None,
            mime_type: None,
            file_expires_at: None,
            source_path: None,
            system_instruction: None,
        }
    }

    /// Cache id, if one is set and has not passed its expiry.
    pub fn active_cache(&self, now: DateTime<Utc>) -> Option<&str> {
        let id = self.cache_id.as_deref().filter(|s| !s.is_empty())?;
        (!is_expired(now, self.cache_expires_at)).then_some(id)
    }

    /// File URI, if one is set and has not passed its expiry.
    pub fn active_file(&self, now: DateTime<Utc>) -> Option<&str> {
        let uri = self.file_uri.as_deref().filter(|s| !s.is_empty())?;
        (!is_expired(now, self.file_expires_at)).then_some(uri)
    }

    /// True when the provider file has expired, no live cache still holds the
    /// document, and a local copy exists to re-upload.
    pub fn needs_file_refresh(&self, now: DateTime<Utc>) -> bool {
        self.source_path.is_some()
            && self.file_expires_at.is_some()
            && is_expired(now, self.file_expires_at)
            && self.active_cache(now).is_none()
    }

    pub fn record_turn(&mut self, user: Message, assistant: Message) {
        let now = Utc::now();
        self.turns.push(Turn {
            user: Some(user),
            assistant: Some(assistant),
            timestamp: now,
        });
        self.updated_at = now;
    }

    /// Clears one side of the turn at `index`; a turn left with neither side is removed.
    pub fn delete_message(&mut self, index: usize, side: Side) -> Result<(), TurnIndexError> {
        let len = self.turns.len();
        let turn = self
            .turns
            .get_mut(index)
            .ok_or(TurnIndexError { index, len })?;

        match side {
            Side::User => turn.user = None,
            Side::Assistant => turn.assistant = None,
        }

        if turn.is_empty() {
            self.turns.remove(index);
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Folds a fresh upload into this session.
    ///
    /// An upload that produced no cache keeps the previous cache reference;
    /// its own expiry still governs whether it is used.
    pub fn apply_upload(&mut self, upload: &UploadResult) {
        self.file_id = Some(upload.file_id.clone());
        self.file_name = Some(upload.display_name.clone());
        self.file_uri = upload.file_uri.clone();
        self.mime_type = upload.mime_type.clone();
        self.file_expires_at = upload.expiration_time;
        if let Some(cache_id) = &upload.cache_id {
            self.cache_id = Some(cache_id.clone());
            self.cache_expires_at = upload.cache_expires_at;
        }
        if upload.system_instruction.is_some() {
            self.system_instruction = upload.system_instruction.clone();
        }
        self.updated_at = Utc::now();
    }

    pub fn has_default_title(&self) -> bool {
        self.title.trim().is_empty() || self.title.eq_ignore_ascii_case(DEFAULT_TITLE)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Expiry is a lower bound set by the provider; a reference past it is invalid.
/// No recorded expiry means nothing is known to have lapsed.
pub fn is_expired(now: DateTime<Utc>, expiry: Option<DateTime<Utc>>) -> bool {
    matches!(expiry, Some(at) if at <= now)
}
