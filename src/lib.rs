//! Rulebook chat: conversational access to a large reference document
//! through the Gemini API, with resumable uploads and context caching.

pub mod config;
pub mod paths;
pub mod provider;
pub mod session;
pub mod store;
