//! OpenAI provider module
//!
//! Speaks the OpenAI chat-completions wire format. Any compatible endpoint
//! works by pointing [`OpenAIConfig::base_url`] at it.

pub mod client;
pub mod config;
pub mod types;

pub use client::OpenAIClient;
pub use config::OpenAIConfig;
pub use types::{
    OpenAIChoice, OpenAIError, OpenAIErrorDetails, OpenAIModel, OpenAIModelsResponse,
    OpenAIRequest, OpenAIResponse,
};

/// Create a new OpenAI client with API key
pub fn create_client(api_key: String, base_url: Option<String>) -> OpenAIClient {
    let mut config = OpenAIConfig::default();
    config.api_key = api_key;

    if let Some(url) = base_url {
        config.base_url = url;
    }

    OpenAIClient::new(config)
}
