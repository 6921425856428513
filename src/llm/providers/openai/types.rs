//! OpenAI provider-specific types and structures
//! Request/response shapes for the chat-completions and models endpoints

use serde::{Deserialize, Serialize};

use crate::llm::ChatMessage;

/// OpenAI API request structure for chat completions
#[derive(Debug, Clone, Serialize)]
pub struct OpenAIRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

/// OpenAI API response structure
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<OpenAIChoice>,
}

/// Choice in OpenAI response
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIChoice {
    #[serde(default)]
    pub index: u32,
    pub message: OpenAIResponseMessage,
    pub finish_reason: Option<String>,
}

/// Assistant message returned in a choice. Content is plain text.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIResponseMessage {
    pub role: String,
    pub content: Option<String>,
}

/// OpenAI error response
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIError {
    pub error: OpenAIErrorDetails,
}

/// OpenAI error details
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIErrorDetails {
    pub message: String,
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

/// OpenAI model information
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIModel {
    pub id: String,
    #[serde(default)]
    pub owned_by: Option<String>,
}

/// OpenAI models list response
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIModelsResponse {
    pub data: Vec<OpenAIModel>,
}
