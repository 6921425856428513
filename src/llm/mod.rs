//! Chat-completion boundary
//!
//! This module defines the request and response shapes the engine sends to a
//! chat-completion service, the [`ChatCompletionClient`] trait every backend
//! implements, and the OpenAI-compatible HTTP client used in production.
//!
//! The engine only depends on the trait. Tests drive the runner with a
//! scripted in-memory client instead of the network.

pub mod credentials;
pub mod providers;
pub mod sse;

#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tracing::debug;

pub use providers::openai::{OpenAIClient, OpenAIConfig};

/// Message roles on the wire. `System` only ever comes from an action's
/// system prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePayload {
    pub file_data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// One block of message content, tagged by `type` the way the
/// chat-completions API expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    File { file: FilePayload },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>) -> Self {
        ContentBlock::ImageUrl {
            image_url: ImageUrl { url: url.into() },
        }
    }

    pub fn file(file_data: impl Into<String>, filename: impl Into<String>) -> Self {
        ContentBlock::File {
            file: FilePayload {
                file_data: file_data.into(),
                filename: Some(filename.into()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: Vec<ContentBlock>,
}

/// Request sent for a single action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub stream: bool,
}

/// Final result of a non-streaming call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub model: String,
    pub content: String,
}

/// A model id offered by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub owned_by: Option<String>,
}

/// Error types for completion service operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LLMError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for completion service operations
pub type LLMResult<T> = Result<T, LLMError>;

/// Stream of text fragments from a streaming completion.
pub type TextStream = Pin<Box<dyn Stream<Item = LLMResult<String>> + Send>>;

/// A chat-completion backend.
///
/// ## Rust Learning Notes:
///
/// `#[async_trait]` boxes the returned futures so the trait can be used as
/// `Arc<dyn ChatCompletionClient>`. The `Send + Sync` bounds let the runner
/// share one client across every concurrently executing action.
#[async_trait]
pub trait ChatCompletionClient: Send + Sync {
    /// Single request, single final answer.
    async fn chat_completion(&self, request: &ChatRequest) -> LLMResult<ChatCompletion>;

    /// Streaming request. The stream yields text fragments in arrival order
    /// and ends when the service signals completion.
    async fn chat_completion_stream(&self, request: &ChatRequest) -> LLMResult<TextStream>;

    /// Models available to the configured credential.
    async fn list_models(&self) -> LLMResult<Vec<ModelInfo>>;
}

/// Drive a streaming completion to the end, handing each non-empty fragment
/// to `on_chunk`. Returns the concatenated text.
pub async fn stream_completion<F>(
    client: &dyn ChatCompletionClient,
    request: &ChatRequest,
    mut on_chunk: F,
) -> LLMResult<String>
where
    F: FnMut(&str) + Send,
{
    let mut stream = client.chat_completion_stream(request).await?;
    let mut full = String::new();
    let mut chunks = 0usize;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if chunk.is_empty() {
            continue;
        }
        chunks += 1;
        on_chunk(&chunk);
        full.push_str(&chunk);
    }

    debug!(model = %request.model, chunks, chars = full.len(), "stream finished");
    Ok(full)
}
