//! OpenAI provider client implementation
//! This module contains the client that makes requests to an OpenAI-compatible API

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header::HeaderMap, header::HeaderValue, header::CONTENT_TYPE, Client};
use std::time::Duration;
use tracing::{debug, error};

use crate::llm::{
    sse::{openai::openai_event_to_text, response_to_sse_stream},
    ChatCompletion, ChatCompletionClient, ChatRequest, LLMError, LLMResult, ModelInfo, TextStream,
};

use super::config::OpenAIConfig;
use super::types::{OpenAIError, OpenAIModelsResponse, OpenAIRequest, OpenAIResponse};

/// OpenAI provider client
pub struct OpenAIClient {
    client: Client,
    config: OpenAIConfig,
}

impl OpenAIClient {
    /// Create a new OpenAI client with configuration
    pub fn new(config: OpenAIConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Create a new OpenAI client with default configuration
    pub fn with_api_key(api_key: String) -> Self {
        let mut config = OpenAIConfig::default();
        config.api_key = api_key;
        Self::new(config)
    }

    pub fn config(&self) -> &OpenAIConfig {
        &self.config
    }

    /// Build HTTP headers for requests
    fn build_headers(&self) -> LLMResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
                .map_err(|e| LLMError::Internal(format!("Invalid API key format: {}", e)))?,
        );

        if let Some(org) = &self.config.organization {
            headers.insert(
                "OpenAI-Organization",
                HeaderValue::from_str(org)
                    .map_err(|e| LLMError::Internal(format!("Invalid organization format: {}", e)))?,
            );
        }

        Ok(headers)
    }

    fn convert_request(&self, request: &ChatRequest, stream: bool) -> OpenAIRequest {
        OpenAIRequest {
            model: request.model.clone(),
            messages: request.messages.clone(),
            temperature: Some(request.temperature),
            stream: Some(stream),
        }
    }

    /// Handle error responses from OpenAI
    fn handle_error_response(&self, status_code: u16, error_text: &str) -> LLMError {
        let message = serde_json::from_str::<OpenAIError>(error_text)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| error_text.to_string());

        match status_code {
            401 | 403 => LLMError::AuthenticationFailed(message),
            429 => LLMError::RateLimitExceeded(message),
            400 | 404 | 422 => LLMError::InvalidRequest(message),
            408 | 504 => LLMError::Timeout(message),
            _ => LLMError::Provider(format!("HTTP {}: {}", status_code, message)),
        }
    }

    async fn post_chat(&self, request: &ChatRequest, stream: bool) -> LLMResult<reqwest::Response> {
        let headers = self.build_headers()?;
        let body = self.convert_request(request, stream);
        let request_url = self.config.endpoint("chat/completions");

        debug!("OpenAI API Request: URL={}, Model={}, stream={}", request_url, request.model, stream);

        let timeout = Duration::from_secs(self.config.timeout_seconds);
        let builder = self.client.post(&request_url).headers(headers).json(&body);

        // A request timeout covers the whole body, which would cut long
        // generations off mid-stream. Streams only bound the wait for headers.
        let response = if stream {
            tokio::time::timeout(timeout, builder.send())
                .await
                .map_err(|_| {
                    LLMError::Timeout(format!(
                        "no response from {} within {}s",
                        request_url, self.config.timeout_seconds
                    ))
                })?
                .map_err(map_transport_error)?
        } else {
            builder
                .timeout(timeout)
                .send()
                .await
                .map_err(map_transport_error)?
        };

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            error!("OpenAI API Error: {} - {}", status, error_text);
            return Err(self.handle_error_response(status.as_u16(), &error_text));
        }

        Ok(response)
    }
}

fn map_transport_error(e: reqwest::Error) -> LLMError {
    if e.is_timeout() {
        LLMError::Timeout(e.to_string())
    } else {
        LLMError::Network(e.to_string())
    }
}

#[async_trait]
impl ChatCompletionClient for OpenAIClient {
    async fn chat_completion(&self, request: &ChatRequest) -> LLMResult<ChatCompletion> {
        let response = self.post_chat(request, false).await?;

        let openai_response: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| LLMError::Serialization(e.to_string()))?;

        let content = openai_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        Ok(ChatCompletion {
            model: openai_response.model,
            content,
        })
    }

    async fn chat_completion_stream(&self, request: &ChatRequest) -> LLMResult<TextStream> {
        let response = self.post_chat(request, true).await?;

        // Convert response to SSE stream and pull the text deltas out
        let text_stream = response_to_sse_stream(response).filter_map(|sse_result| async move {
            match sse_result {
                Ok(event) => match openai_event_to_text(&event) {
                    Ok(Some(text)) => Some(Ok(text)),
                    Ok(None) => None,
                    Err(e) => Some(Err(e)),
                },
                Err(e) => Some(Err(e)),
            }
        });

        Ok(Box::pin(text_stream))
    }

    async fn list_models(&self) -> LLMResult<Vec<ModelInfo>> {
        let headers = self.build_headers()?;
        let request_url = self.config.endpoint("models");

        let response = self
            .client
            .get(&request_url)
            .headers(headers)
            .timeout(Duration::from_secs(self.config.models_timeout_seconds))
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(self.handle_error_response(status.as_u16(), &error_text));
        }

        let models: OpenAIModelsResponse = response
            .json()
            .await
            .map_err(|e| LLMError::Serialization(e.to_string()))?;

        let mut models: Vec<ModelInfo> = models
            .data
            .into_iter()
            .map(|m| ModelInfo {
                id: m.id,
                owned_by: m.owned_by,
            })
            .collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(models)
    }
}
