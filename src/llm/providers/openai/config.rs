//! OpenAI provider configuration

use serde::{Deserialize, Serialize};

/// Base URL used when none is configured.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    /// API key for authentication
    pub api_key: String,
    /// Base URL for API requests
    pub base_url: String,
    /// Organization ID (optional)
    pub organization: Option<String>,
    /// Timeout for chat-completion requests. Streaming requests only wait
    /// this long for the response headers.
    pub timeout_seconds: u64,
    /// Timeout for the models listing used to validate keys
    pub models_timeout_seconds: u64,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            organization: None,
            timeout_seconds: 120,
            models_timeout_seconds: 10,
        }
    }
}

impl OpenAIConfig {
    /// Endpoint URL with any trailing slash on the base removed.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_cleanly() {
        let mut config = OpenAIConfig::default();
        assert_eq!(
            config.endpoint("chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
        config.base_url = "http://localhost:8000/v1/".into();
        assert_eq!(config.endpoint("models"), "http://localhost:8000/v1/models");
    }
}
