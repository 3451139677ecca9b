use super::types::{Content, GenerateContentRequest, Part, SystemInstruction};
use crate::session::Session;
use chrono::{DateTime, Utc};

pub const DEFAULT_MIME_TYPE: &str = "application/pdf";

/// Turns session history plus a new message into a generate request.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    pub history_turn_limit: usize,
    pub default_system_instruction: Option<String>,
}

impl RequestBuilder {
    pub fn build(&self, session: &Session, message: &str, now: DateTime<Utc>) -> GenerateContentRequest {
        let skip = session.turns.len().saturating_sub(self.history_turn_limit);
        let mut contents: Vec<Content> = session.turns[skip..]
            .iter()
            .flat_map(|turn| turn.messages())
            .map(|m| Content::text(m.role.as_str(), m.text.clone()))
            .collect();

        let cache = session.active_cache(now);

        let mut parts = vec![Part::text(message)];
        // A live cache already embeds the document; otherwise every call must carry it.
        if cache.is_none() {
            if let Some(uri) = session.active_file(now) {
                let mime = session.mime_type.as_deref().unwrap_or(DEFAULT_MIME_TYPE);
                parts.push(Part::file(uri, mime));
            }
        }
        contents.push(Content {
            role: Some("user".to_string()),
            parts,
        });

        match (cache, session.file_uri.as_deref()) {
            (Some(id), _) => tracing::info!(session = %session.id, cache = id, "using cached content"),
            (None, Some(uri)) if session.active_file(now).is_some() => {
                tracing::info!(session = %session.id, file_uri = uri, "attaching file reference")
            }
            (None, Some(uri)) => {
                tracing::warn!(session = %session.id, file_uri = uri, "file reference expired; not attached")
            }
            (None, None) => tracing::warn!(session = %session.id, "no cached content or file reference"),
        }

        let instruction = session
            .system_instruction
            .as_deref()
            .or(self.default_system_instruction.as_deref());

        GenerateContentRequest {
            contents,
            system_instruction: SystemInstruction::from_text(instruction),
            cached_content: cache.map(str::to_string),
        }
    }
}
