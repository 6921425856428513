//! # Execution Projector
//!
//! Compiles a flow definition into the requests its actions will send.
//!
//! - Dangling action ids inside a step are dropped silently.
//! - An enabled, non-empty system prompt becomes a leading `system` message.
//! - Each message yields a text block when its content is non-empty, plus one
//!   block per attached file when files are enabled: `image_url` for image
//!   MIME types, `file` otherwise. Messages that end up with no blocks are
//!   omitted.
//! - `structured_output` is emitted only when enabled and non-empty.
//!
//! [`ProjectionMode::Execute`] substitutes variables and inlines file
//! payloads. [`ProjectionMode::Preview`] leaves text as written and puts a
//! `file_id:<id>` reference where the payload would go.
//!
//! Back-references are never resolved here. They need a run, so the runner
//! resolves them when each action starts.
//!
//! Projection is a pure function of the definition store, so the same input
//! always compiles to the same output.

use serde::Serialize;

use crate::engine::definitions::DefinitionStore;
use crate::engine::resolver::Resolver;
use crate::llm::{ChatMessage, ChatRequest, ChatRole, ContentBlock};
use crate::models::{Action, FileAsset, MessageRole};

/// Placeholder shown instead of file payloads in debug output.
pub const MASKED_PAYLOAD: &str = "base64,...";

/// Prefix of the reference token used instead of a payload in preview mode.
pub const FILE_REFERENCE_PREFIX: &str = "file_id:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionMode {
    /// Tokens left visible, files referenced by id.
    Preview,
    /// Variables substituted, file payloads inlined.
    Execute,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledFlow {
    pub steps: Vec<CompiledStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledStep {
    pub actions: Vec<CompiledAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledAction {
    /// Definition the action was compiled from.
    #[serde(skip)]
    pub action_id: String,
    pub model: String,
    pub temperature: f64,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_output: Option<String>,
}

impl CompiledAction {
    /// Streaming request for this action.
    pub fn to_request(&self) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: self.messages.clone(),
            temperature: self.temperature,
            stream: true,
        }
    }
}

impl CompiledFlow {
    pub fn action(&self, step_index: usize, action_index: usize) -> Option<&CompiledAction> {
        self.steps
            .get(step_index)
            .and_then(|s| s.actions.get(action_index))
    }
}

/// Compile `flow_id`. Returns `None` when the flow does not exist.
pub fn project(store: &DefinitionStore, flow_id: &str, mode: ProjectionMode) -> Option<CompiledFlow> {
    let flow = store.flow(flow_id)?;
    let resolver = Resolver::new(store.variables());

    let steps = flow
        .steps
        .iter()
        .map(|step| CompiledStep {
            actions: step
                .action_ids
                .iter()
                .filter_map(|id| store.action(id))
                .map(|action| compile_action(store, action, &resolver, mode))
                .collect(),
        })
        .collect();

    Some(CompiledFlow { steps })
}

fn compile_action(
    store: &DefinitionStore,
    action: &Action,
    resolver: &Resolver<'_>,
    mode: ProjectionMode,
) -> CompiledAction {
    let text = |raw: &str| match mode {
        ProjectionMode::Execute => resolver.resolve_variables(raw),
        ProjectionMode::Preview => raw.to_string(),
    };

    let mut messages = Vec::with_capacity(action.messages.len() + 1);

    if action.system_prompt_enabled && !action.system_prompt.is_empty() {
        messages.push(ChatMessage {
            role: ChatRole::System,
            content: vec![ContentBlock::text(text(&action.system_prompt))],
        });
    }

    for message in &action.messages {
        let mut content = Vec::new();

        let body = text(&message.content);
        if !body.is_empty() {
            content.push(ContentBlock::text(body));
        }

        if message.files_enabled {
            for file in message.files.iter().filter_map(|id| store.file(id)) {
                content.push(file_block(file, mode));
            }
        }

        if content.is_empty() {
            continue;
        }

        messages.push(ChatMessage {
            role: match message.role {
                MessageRole::User => ChatRole::User,
                MessageRole::Assistant => ChatRole::Assistant,
            },
            content,
        });
    }

    let structured_output = (action.structured_output_enabled
        && !action.structured_output.is_empty())
    .then(|| text(&action.structured_output));

    CompiledAction {
        action_id: action.id.clone(),
        model: if action.selected_model.is_empty() {
            "unknown".to_string()
        } else {
            action.selected_model.clone()
        },
        temperature: action.temperature,
        messages,
        structured_output,
    }
}

fn file_block(file: &FileAsset, mode: ProjectionMode) -> ContentBlock {
    let data = match mode {
        ProjectionMode::Execute => file.content.clone(),
        ProjectionMode::Preview => format!("{}{}", FILE_REFERENCE_PREFIX, file.id),
    };
    if file.is_image() {
        ContentBlock::image(data)
    } else {
        ContentBlock::file(data, file.name.clone())
    }
}

/// Pretty JSON rendering of a compiled flow with every file payload masked,
/// in either mode. Reference tokens and empty values are shown as they are.
pub fn to_debug_string(flow: &CompiledFlow) -> String {
    let mut masked = flow.clone();
    for action in masked.steps.iter_mut().flat_map(|s| s.actions.iter_mut()) {
        for block in action.messages.iter_mut().flat_map(|m| m.content.iter_mut()) {
            match block {
                ContentBlock::ImageUrl { image_url } => mask(&mut image_url.url),
                ContentBlock::File { file } => mask(&mut file.file_data),
                ContentBlock::Text { .. } => {}
            }
        }
    }
    serde_json::to_string_pretty(&masked).unwrap_or_else(|e| format!("<unrenderable flow: {}>", e))
}

fn mask(payload: &mut String) {
    if !payload.is_empty() && !payload.starts_with(FILE_REFERENCE_PREFIX) {
        *payload = MASKED_PAYLOAD.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActionMessage;

    /// Store with one flow: step 1 has a rich action plus a dangling id,
    /// step 2 has a plain action.
    fn store() -> (DefinitionStore, String) {
        let mut store = DefinitionStore::new();
        let flow_id = store.active_flow_id().to_string();
        let first = store.flow(&flow_id).unwrap().steps[0].action_ids[0].clone();

        let topic = store.add_variable();
        store.rename_variable(&topic, "$topic").unwrap();
        store.set_variable_value(&topic, "otters").unwrap();

        let image = store.add_file();
        store.upload_file(&image, b"\x89PNG", "image/png").unwrap();
        let doc = store.add_file();
        store.upload_file(&doc, b"hello", "text/plain").unwrap();

        {
            let action = store.action_mut(&first).unwrap();
            action.system_prompt_enabled = true;
            action.system_prompt = "You know about {{ $topic }}.".into();
            action.structured_output_enabled = true;
            action.structured_output = "{\"about\": \"{ $topic }\"}".into();
            action.messages[0].content = "Tell me about {{ $topic }}".into();
            let mut with_files = ActionMessage::user("");
            with_files.attach_file(image.clone());
            with_files.attach_file(doc.clone());
            with_files.attach_file("missing");
            action.messages.push(with_files);
            action.messages.push(ActionMessage::assistant(""));
        }

        store.flow_mut(&flow_id).unwrap().steps[0]
            .action_ids
            .push("dangling".into());
        let second_step = store.add_step(&flow_id).unwrap();
        let second_action =
            store.flow(&flow_id).unwrap().step(&second_step).unwrap().action_ids[0].clone();
        store.action_mut(&second_action).unwrap().messages[0].content =
            "Summarise {{ $step1.action1.output }}".into();

        (store, flow_id)
    }

    #[test]
    fn test_unknown_flow_is_none() {
        let store = DefinitionStore::new();
        assert!(project(&store, "nope", ProjectionMode::Execute).is_none());
    }

    #[test]
    fn test_execute_mode_substitutes_and_inlines() {
        let (store, flow_id) = store();
        let flow = project(&store, &flow_id, ProjectionMode::Execute).unwrap();

        assert_eq!(flow.steps.len(), 2);
        assert_eq!(flow.steps[0].actions.len(), 1, "dangling id is dropped");

        let action = &flow.steps[0].actions[0];
        assert_eq!(action.model, "gpt-4o");
        assert_eq!(action.messages.len(), 3, "empty assistant message is omitted");
        assert_eq!(action.messages[0].role, ChatRole::System);
        assert_eq!(
            action.messages[0].content,
            vec![ContentBlock::text("You know about otters.")]
        );
        assert_eq!(
            action.messages[1].content,
            vec![ContentBlock::text("Tell me about otters")]
        );

        let files = &action.messages[2].content;
        assert_eq!(files.len(), 2);
        assert_eq!(files[0], ContentBlock::image("data:image/png;base64,iVBORw=="));
        assert_eq!(
            files[1],
            ContentBlock::file("data:text/plain;base64,aGVsbG8=", "file_3")
        );
        assert_eq!(
            action.structured_output.as_deref(),
            Some("{\"about\": \"otters\"}")
        );

        // Back-references wait for the runner.
        assert_eq!(
            flow.steps[1].actions[0].messages[0].content,
            vec![ContentBlock::text("Summarise {{ $step1.action1.output }}")]
        );
    }

    #[test]
    fn test_preview_mode_keeps_tokens_and_references_files() {
        let (store, flow_id) = store();
        let flow = project(&store, &flow_id, ProjectionMode::Preview).unwrap();
        let action = &flow.steps[0].actions[0];

        assert_eq!(
            action.messages[1].content,
            vec![ContentBlock::text("Tell me about {{ $topic }}")]
        );
        assert_eq!(action.messages[2].content[0], ContentBlock::image("file_id:2"));
        assert_eq!(
            action.messages[2].content[1],
            ContentBlock::file("file_id:3", "file_3")
        );
    }

    #[test]
    fn test_projection_is_deterministic() {
        let (store, flow_id) = store();
        let a = to_debug_string(&project(&store, &flow_id, ProjectionMode::Execute).unwrap());
        let b = to_debug_string(&project(&store, &flow_id, ProjectionMode::Execute).unwrap());
        assert_eq!(a, b);
    }

    #[test]
    fn test_debug_string_masks_payloads() {
        let (store, flow_id) = store();

        let execute = to_debug_string(&project(&store, &flow_id, ProjectionMode::Execute).unwrap());
        assert!(!execute.contains("iVBORw=="));
        assert!(!execute.contains("aGVsbG8="));
        assert!(execute.contains(MASKED_PAYLOAD));
        assert!(!execute.contains("action_id"));

        let preview = to_debug_string(&project(&store, &flow_id, ProjectionMode::Preview).unwrap());
        assert!(preview.contains("file_id:2"));
        assert!(!preview.contains("base64,"));
    }

    #[test]
    fn test_disabled_files_and_prompts_are_skipped() {
        let (mut store, flow_id) = store();
        let first = store.flow(&flow_id).unwrap().steps[0].action_ids[0].clone();
        {
            let action = store.action_mut(&first).unwrap();
            action.system_prompt_enabled = false;
            action.structured_output_enabled = false;
            action.messages[1].files_enabled = false;
        }
        let flow = project(&store, &flow_id, ProjectionMode::Execute).unwrap();
        let action = &flow.steps[0].actions[0];
        assert_eq!(action.messages.len(), 1);
        assert_eq!(action.messages[0].role, ChatRole::User);
        assert!(action.structured_output.is_none());
    }
}
