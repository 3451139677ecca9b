//! Shared helpers for the mock-provider tests.

#![allow(dead_code)]

use rulebook_chat::provider::{
    ClientOptions, GeminiClient, GoogleAuth, RetryPolicy, UploadOptions,
};
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::MockServer;

pub const API_KEY: &str = "test-key";
pub const MODEL: &str = "test-model";

/// Options pointed at `server` with no retries and fast polling.
pub fn options(server: &MockServer) -> ClientOptions {
    options_for(&server.uri())
}

pub fn options_for(base_uri: &str) -> ClientOptions {
    ClientOptions {
        model: MODEL.to_string(),
        base_uri: base_uri.to_string(),
        retry: RetryPolicy::none(),
        upload: UploadOptions {
            poll_interval: Duration::from_millis(10),
            processing_timeout: Duration::from_secs(1),
        },
        ..Default::default()
    }
}

pub fn client(options: ClientOptions) -> GeminiClient {
    GeminiClient::new(
        reqwest::Client::new(),
        GoogleAuth::ApiKey(API_KEY.to_string()),
        options,
    )
    .unwrap()
}

pub fn text_response(parts: &[&str]) -> Value {
    let parts: Vec<Value> = parts.iter().map(|t| json!({ "text": t })).collect();
    json!({
        "candidates": [
            { "content": { "role": "model", "parts": parts } }
        ]
    })
}

/// One `data:` line per event, blank line between, as `alt=sse` sends them.
pub fn sse_body(events: &[&str]) -> String {
    events
        .iter()
        .map(|e| format!("data: {e}\r\n\r\n"))
        .collect()
}

pub fn file_json(state: &str) -> Value {
    json!({
        "name": "files/abc123",
        "displayName": "rulebook.pdf",
        "mimeType": "application/pdf",
        "uri": "https://generativelanguage.googleapis.com/v1beta/files/abc123",
        "state": state,
        "expirationTime": "2030-01-02T03:04:05Z"
    })
}
