// Single model-call definitions

//! # Actions
//!
//! An [`Action`] is one chat-style model call: a model name, a temperature,
//! an optional system prompt, an optional structured-output hint and an
//! ordered list of [`ActionMessage`]s. Steps reference actions by id, so the
//! same collection can be shared across the steps of every flow.
//!
//! Message roles are limited to `user` and `assistant` here. The `system`
//! role only appears in compiled output, where it is synthesised from
//! [`Action::system_prompt`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Model selected for freshly created actions.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Temperature given to freshly created actions.
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionMessage {
    pub id: String,
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub files_enabled: bool,
    /// Ordered file ids; duplicates are ignored when adding.
    #[serde(default)]
    pub files: Vec<String>,
}

impl ActionMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            files_enabled: false,
            files: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Attach a file id, keeping the list free of duplicates.
    pub fn attach_file(&mut self, file_id: impl Into<String>) {
        let file_id = file_id.into();
        if !self.files.contains(&file_id) {
            self.files.push(file_id);
        }
        self.files_enabled = true;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: String,
    pub selected_model: String,
    pub temperature: f64,
    #[serde(default)]
    pub system_prompt_enabled: bool,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub structured_output_enabled: bool,
    #[serde(default)]
    pub structured_output: String,
    #[serde(default)]
    pub messages: Vec<ActionMessage>,
    #[serde(default)]
    pub collapsed: bool,
}

impl Action {
    /// A fresh action with the default model and one empty user message.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            selected_model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            system_prompt_enabled: false,
            system_prompt: String::new(),
            structured_output_enabled: false,
            structured_output: String::new(),
            messages: vec![ActionMessage::user("")],
            collapsed: false,
        }
    }

    /// Deep copy with a new action id and new message ids.
    pub fn clone_with_new_ids(&self) -> Self {
        let mut copy = self.clone();
        copy.id = Uuid::new_v4().to_string();
        for message in &mut copy.messages {
            message.id = Uuid::new_v4().to_string();
        }
        copy
    }

    pub fn set_temperature(&mut self, temperature: f64) {
        self.temperature = clamp_temperature(temperature);
    }

    pub fn message_mut(&mut self, message_id: &str) -> Option<&mut ActionMessage> {
        self.messages.iter_mut().find(|m| m.id == message_id)
    }
}

impl Default for Action {
    fn default() -> Self {
        Self::new()
    }
}

/// Clamp to the accepted `[0, 1]` range; NaN becomes the default.
pub fn clamp_temperature(temperature: f64) -> f64 {
    if temperature.is_nan() {
        DEFAULT_TEMPERATURE
    } else {
        temperature.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_action_defaults() {
        let action = Action::new();
        assert_eq!(action.selected_model, "gpt-4o");
        assert_eq!(action.temperature, 0.7);
        assert_eq!(action.messages.len(), 1);
        assert_eq!(action.messages[0].role, MessageRole::User);
        assert!(action.messages[0].content.is_empty());
    }

    #[test]
    fn test_clone_with_new_ids_rekeys_everything() {
        let mut action = Action::new();
        action.messages.push(ActionMessage::assistant("ok"));
        let copy = action.clone_with_new_ids();

        assert_ne!(copy.id, action.id);
        assert_eq!(copy.messages.len(), 2);
        for (a, b) in action.messages.iter().zip(&copy.messages) {
            assert_ne!(a.id, b.id);
            assert_eq!(a.content, b.content);
        }
    }

    #[test]
    fn test_temperature_is_clamped() {
        let mut action = Action::new();
        action.set_temperature(1.8);
        assert_eq!(action.temperature, 1.0);
        action.set_temperature(-0.2);
        assert_eq!(action.temperature, 0.0);
        action.set_temperature(f64::NAN);
        assert_eq!(action.temperature, DEFAULT_TEMPERATURE);
    }

    #[test]
    fn test_attach_file_dedupes() {
        let mut msg = ActionMessage::user("see attached");
        msg.attach_file("2");
        msg.attach_file("2");
        assert_eq!(msg.files, vec!["2".to_string()]);
        assert!(msg.files_enabled);
    }
}
