//! Credential validation
//!
//! A key is considered valid when the service will list models for it; the
//! returned list is also what actions may select from. [`ProviderState`]
//! tracks the outcome and keeps the persisted [`Preferences`] in step: a
//! validated key is stored, a rejected one is removed.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Preferences;
use crate::llm::{ChatCompletionClient, LLMError, LLMResult, ModelInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStatus {
    #[default]
    Idle,
    Validating,
    Valid,
    Invalid,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderState {
    pub api_key: Option<String>,
    pub status: ProviderStatus,
    pub models: Vec<ModelInfo>,
    pub last_error: Option<String>,
}

/// Ask the service for its model list using `client`, which must already
/// carry `api_key`.
pub async fn validate_api_key(
    client: &dyn ChatCompletionClient,
    api_key: &str,
) -> LLMResult<Vec<ModelInfo>> {
    if api_key.trim().is_empty() {
        return Err(LLMError::InvalidRequest("API key is required.".to_string()));
    }
    client.list_models().await
}

/// Turn a validation failure into a message fit for an end user.
pub fn friendly_message(err: &LLMError) -> String {
    let text = err.to_string();
    if text.contains("Incorrect API key provided") {
        "Incorrect OpenAI API Key provided.".to_string()
    } else if matches!(err, LLMError::AuthenticationFailed(_))
        || text.to_lowercase().contains("authentication")
    {
        "Authentication failed. Please check your OpenAI API Key.".to_string()
    } else if let LLMError::InvalidRequest(msg) = err {
        msg.clone()
    } else {
        "Failed to validate OpenAI API Key.".to_string()
    }
}

impl ProviderState {
    /// Seed from stored preferences. A stored key is assumed valid until it
    /// is checked again.
    pub fn from_preferences(prefs: &Preferences) -> Self {
        match &prefs.api_key {
            Some(key) if !key.is_empty() => Self {
                api_key: Some(key.clone()),
                status: ProviderStatus::Valid,
                ..Self::default()
            },
            _ => Self::default(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == ProviderStatus::Valid && self.api_key.is_some()
    }

    /// Validate `api_key` with a client built by `make_client` and record
    /// the outcome here and in `prefs`.
    pub async fn check_and_set<F>(
        &mut self,
        api_key: &str,
        make_client: F,
        prefs: &mut Preferences,
    ) -> Result<&[ModelInfo], String>
    where
        F: FnOnce(&str) -> Box<dyn ChatCompletionClient>,
    {
        self.status = ProviderStatus::Validating;
        self.models.clear();
        self.last_error = None;

        let client = make_client(api_key);
        match validate_api_key(client.as_ref(), api_key).await {
            Ok(models) => {
                info!(count = models.len(), "Model list fetched. API Key OK");
                self.api_key = Some(api_key.to_string());
                self.status = ProviderStatus::Valid;
                self.models = models;
                prefs.api_key = Some(api_key.to_string());
                Ok(&self.models)
            }
            Err(err) => {
                warn!("API key validation failed: {}", err);
                let message = friendly_message(&err);
                self.api_key = None;
                self.status = ProviderStatus::Invalid;
                self.last_error = Some(message.clone());
                prefs.api_key = None;
                Err(message)
            }
        }
    }

    /// Forget the key entirely.
    pub fn clear(&mut self, prefs: &mut Preferences) {
        *self = Self::default();
        prefs.api_key = None;
    }
}
