use super::error::Result;
use super::transport::{rejected, Transport};
use super::types::{Content, GenerateContentRequest, GenerateContentResponse, SystemInstruction};

const TITLE_INSTRUCTION: &str =
    "You name chat sessions about a tabletop rulebook. Return only the title, three words or fewer.";

const MAX_TITLE_CHARS: usize = 60;

/// Result of a single-shot generate call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    /// Cache id echoed back by the provider, when it sends one.
    pub cache_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CompletionClient {
    transport: Transport,
}

impl CompletionClient {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    pub async fn generate(&self, model: &str, req: &GenerateContentRequest) -> Result<Completion> {
        let url = self
            .transport
            .endpoint(&format!("v1beta/models/{model}:generateContent"), &[])?;

        let resp = self
            .transport
            .send("generateContent", |http| http.post(url.clone()).json(req))
            .await?;

        if !resp.status().is_success() {
            let err = rejected(resp).await;
            tracing::error!(model, error = %err, "generate content failed");
            return Err(err);
        }

        let body = resp.bytes().await?;
        let parsed: GenerateContentResponse = if body.is_empty() {
            GenerateContentResponse::default()
        } else {
            serde_json::from_slice(&body)?
        };

        let text = parsed.text();
        tracing::debug!(model, chars = text.len(), "generate content finished");
        Ok(Completion {
            text,
            cache_id: parsed.cached_content,
        })
    }
}

/// Request for a short session title; carries no history or document.
pub fn title_request(prompt: &str) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content::text("user", prompt)],
        system_instruction: SystemInstruction::from_text(Some(TITLE_INSTRUCTION)),
        cached_content: None,
    }
}

/// Strips quotes and whitespace and clips overly long titles.
pub fn tidy_title(raw: &str) -> Option<String> {
    let title = raw
        .trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '\u{201c}' | '\u{201d}'))
        .trim();
    if title.is_empty() {
        return None;
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        let clipped: String = title.chars().take(MAX_TITLE_CHARS).collect();
        return Some(format!("{}\u{2026}", clipped.trim_end()));
    }
    Some(title.to_string())
}
