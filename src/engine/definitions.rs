// Definition store for flows, actions, variables and files

//! # Definition Store
//!
//! Owns every editable definition of a workspace:
//!
//! - **Flows** in creation order, each owning its steps inline
//! - **Actions** in a shared collection, referenced from steps by id
//! - **Variables** and **files**, with counter-based ids and default names
//!
//! Every editing operation is a single method that leaves the store
//! consistent on return. Forking a flow, for instance, deep-clones each
//! referenced action under a new id and installs the copy in one call.
//!
//! The whole store (de)serializes as one JSON workspace document.
//!
//! ## Rust Learning Notes:
//!
//! Lookups return `Option<&T>` and mutations return `Result<()>` with
//! [`PromptFlowError::NotFound`] for unknown ids, so callers choose between
//! ignoring a miss and propagating it with `?`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

use crate::models::{
    Action, ActionMessage, FileAsset, Flow, MessageRole, Step, StepLayout, Variable,
    DEFAULT_FILE_ID,
};
use crate::{PromptFlowError, Result};

/// Name of the flow in a fresh workspace.
pub const DEFAULT_FLOW_NAME: &str = "Main";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionStore {
    flows: Vec<Flow>,
    active_flow_id: Option<String>,
    actions: Vec<Action>,
    variables: Vec<Variable>,
    last_variable_id: u64,
    files: Vec<FileAsset>,
    last_file_id: u64,
}

impl Default for DefinitionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DefinitionStore {
    /// A workspace with one "Main" flow holding one step with one action,
    /// the protected default variable and a placeholder file.
    pub fn new() -> Self {
        let action = Action::new();
        let mut flow = Flow::new(DEFAULT_FLOW_NAME);
        flow.steps.push(Step::new("", vec![action.id.clone()]));

        Self {
            active_flow_id: Some(flow.id.clone()),
            flows: vec![flow],
            actions: vec![action],
            variables: vec![Variable::default_variable()],
            last_variable_id: 1,
            files: vec![FileAsset::new(DEFAULT_FILE_ID, "file_1")],
            last_file_id: 1,
        }
    }

    /// Load a workspace document from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let store: DefinitionStore = serde_json::from_str(&text)?;
        debug!(
            flows = store.flows.len(),
            actions = store.actions.len(),
            "workspace loaded from {}",
            path.display()
        );
        Ok(store)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    // ---- flows -------------------------------------------------------------

    pub fn flows(&self) -> &[Flow] {
        &self.flows
    }

    pub fn flow(&self, flow_id: &str) -> Option<&Flow> {
        self.flows.iter().find(|f| f.id == flow_id)
    }

    pub fn flow_mut(&mut self, flow_id: &str) -> Option<&mut Flow> {
        self.flows.iter_mut().find(|f| f.id == flow_id)
    }

    fn require_flow_mut(&mut self, flow_id: &str) -> Result<&mut Flow> {
        self.flow_mut(flow_id)
            .ok_or_else(|| PromptFlowError::NotFound(format!("flow {}", flow_id)))
    }

    /// Id of the active flow, falling back to the first flow.
    pub fn active_flow_id(&self) -> &str {
        self.active_flow().map(|f| f.id.as_str()).unwrap_or_default()
    }

    pub fn active_flow(&self) -> Option<&Flow> {
        self.active_flow_id
            .as_deref()
            .and_then(|id| self.flow(id))
            .or_else(|| self.flows.first())
    }

    pub fn set_active_flow(&mut self, flow_id: &str) -> Result<()> {
        if self.flow(flow_id).is_none() {
            return Err(PromptFlowError::NotFound(format!("flow {}", flow_id)));
        }
        self.active_flow_id = Some(flow_id.to_string());
        Ok(())
    }

    /// Add a flow with one step holding a fresh action. Returns its id.
    pub fn add_flow(&mut self, name: &str) -> String {
        let action = Action::new();
        let mut flow = Flow::new(name);
        flow.steps.push(Step::new("", vec![action.id.clone()]));
        let id = flow.id.clone();

        self.actions.push(action);
        self.flows.push(flow);
        if self.active_flow_id.is_none() {
            self.active_flow_id = Some(id.clone());
        }
        id
    }

    /// Remove a flow and any actions nothing else references.
    pub fn remove_flow(&mut self, flow_id: &str) -> Result<()> {
        let index = self
            .flows
            .iter()
            .position(|f| f.id == flow_id)
            .ok_or_else(|| PromptFlowError::NotFound(format!("flow {}", flow_id)))?;
        self.flows.remove(index);

        if self.active_flow_id.as_deref() == Some(flow_id) {
            self.active_flow_id = self.flows.first().map(|f| f.id.clone());
        }
        self.drop_unreferenced_actions();
        Ok(())
    }

    pub fn rename_flow(&mut self, flow_id: &str, name: &str) -> Result<()> {
        self.require_flow_mut(flow_id)?.name = name.to_string();
        Ok(())
    }

    /// Deep copy of a flow. Steps get new ids, every referenced action is
    /// cloned under a new id, dangling ids are dropped. The copy is named
    /// `"<name> (copy)"` and becomes the active flow.
    pub fn fork_flow(&mut self, flow_id: &str) -> Result<String> {
        let source = self
            .flow(flow_id)
            .ok_or_else(|| PromptFlowError::NotFound(format!("flow {}", flow_id)))?;

        let mut cloned_actions = Vec::new();
        let mut fork = Flow::new(if source.name.is_empty() {
            "(copy)".to_string()
        } else {
            format!("{} (copy)", source.name)
        });

        for step in &source.steps {
            let mut action_ids = Vec::with_capacity(step.action_ids.len());
            for action in step.action_ids.iter().filter_map(|id| self.action(id)) {
                let copy = action.clone_with_new_ids();
                action_ids.push(copy.id.clone());
                cloned_actions.push(copy);
            }
            fork.steps.push(Step::new(step.name.clone(), action_ids));
        }

        let fork_id = fork.id.clone();
        info!(source = %flow_id, fork = %fork_id, actions = cloned_actions.len(), "flow forked");
        self.actions.extend(cloned_actions);
        self.flows.push(fork);
        self.active_flow_id = Some(fork_id.clone());
        Ok(fork_id)
    }

    /// Step and action ids a run of `flow_id` is laid out from. Dangling
    /// action ids are left out so indices line up with the compiled flow.
    pub fn execution_layout(&self, flow_id: &str) -> Option<Vec<StepLayout>> {
        let flow = self.flow(flow_id)?;
        Some(
            flow.steps
                .iter()
                .map(|step| StepLayout {
                    id: step.id.clone(),
                    action_ids: step
                        .action_ids
                        .iter()
                        .filter(|id| self.action(id).is_some())
                        .cloned()
                        .collect(),
                })
                .collect(),
        )
    }

    // ---- steps -------------------------------------------------------------

    /// Append a step holding one fresh action. Returns the step id.
    pub fn add_step(&mut self, flow_id: &str) -> Result<String> {
        let action = Action::new();
        let step = Step::new("", vec![action.id.clone()]);
        let step_id = step.id.clone();

        self.require_flow_mut(flow_id)?.steps.push(step);
        self.actions.push(action);
        Ok(step_id)
    }

    pub fn remove_step(&mut self, flow_id: &str, step_id: &str) -> Result<()> {
        let flow = self.require_flow_mut(flow_id)?;
        let before = flow.steps.len();
        flow.steps.retain(|s| s.id != step_id);
        if flow.steps.len() == before {
            return Err(PromptFlowError::NotFound(format!("step {}", step_id)));
        }
        self.drop_unreferenced_actions();
        Ok(())
    }

    pub fn rename_step(&mut self, flow_id: &str, step_id: &str, name: &str) -> Result<()> {
        self.step_mut(flow_id, step_id)?.name = name.to_string();
        Ok(())
    }

    fn step_mut(&mut self, flow_id: &str, step_id: &str) -> Result<&mut Step> {
        self.require_flow_mut(flow_id)?
            .step_mut(step_id)
            .ok_or_else(|| PromptFlowError::NotFound(format!("step {}", step_id)))
    }

    /// Create a fresh action at the end of a step. Returns the action id.
    pub fn add_action_to_step(&mut self, flow_id: &str, step_id: &str) -> Result<String> {
        let action = Action::new();
        let action_id = action.id.clone();
        self.step_mut(flow_id, step_id)?
            .action_ids
            .push(action_id.clone());
        self.actions.push(action);
        Ok(action_id)
    }

    pub fn remove_action_from_step(
        &mut self,
        flow_id: &str,
        step_id: &str,
        action_id: &str,
    ) -> Result<()> {
        self.step_mut(flow_id, step_id)?
            .action_ids
            .retain(|id| id != action_id);
        self.drop_unreferenced_actions();
        Ok(())
    }

    fn drop_unreferenced_actions(&mut self) {
        let referenced: HashSet<&str> = self
            .flows
            .iter()
            .flat_map(|f| f.steps.iter())
            .flat_map(|s| s.action_ids.iter().map(String::as_str))
            .collect();
        let before = self.actions.len();
        self.actions.retain(|a| referenced.contains(a.id.as_str()));
        if self.actions.len() != before {
            debug!(removed = before - self.actions.len(), "dropped unreferenced actions");
        }
    }

    // ---- actions -----------------------------------------------------------

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn action(&self, action_id: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.id == action_id)
    }

    pub fn action_mut(&mut self, action_id: &str) -> Option<&mut Action> {
        self.actions.iter_mut().find(|a| a.id == action_id)
    }

    fn require_action_mut(&mut self, action_id: &str) -> Result<&mut Action> {
        self.action_mut(action_id)
            .ok_or_else(|| PromptFlowError::NotFound(format!("action {}", action_id)))
    }

    /// Add a detached action. It runs once a step references it.
    pub fn add_action(&mut self, action: Action) -> String {
        let id = action.id.clone();
        self.actions.push(action);
        id
    }

    /// Delete an action and every step reference to it.
    pub fn remove_action(&mut self, action_id: &str) -> Result<()> {
        let before = self.actions.len();
        self.actions.retain(|a| a.id != action_id);
        if self.actions.len() == before {
            return Err(PromptFlowError::NotFound(format!("action {}", action_id)));
        }
        for step in self.flows.iter_mut().flat_map(|f| f.steps.iter_mut()) {
            step.action_ids.retain(|id| id != action_id);
        }
        Ok(())
    }

    /// Edit an action in place. The temperature is clamped afterwards.
    pub fn update_action<F>(&mut self, action_id: &str, edit: F) -> Result<()>
    where
        F: FnOnce(&mut Action),
    {
        let action = self.require_action_mut(action_id)?;
        edit(action);
        let temperature = action.temperature;
        action.set_temperature(temperature);
        Ok(())
    }

    /// Append an empty message. Returns the message id.
    pub fn add_message(&mut self, action_id: &str, role: MessageRole) -> Result<String> {
        let message = ActionMessage::new(role, "");
        let id = message.id.clone();
        self.require_action_mut(action_id)?.messages.push(message);
        Ok(id)
    }

    pub fn remove_message(&mut self, action_id: &str, message_id: &str) -> Result<()> {
        let action = self.require_action_mut(action_id)?;
        let before = action.messages.len();
        action.messages.retain(|m| m.id != message_id);
        if action.messages.len() == before {
            return Err(PromptFlowError::NotFound(format!("message {}", message_id)));
        }
        Ok(())
    }

    pub fn update_message(&mut self, action_id: &str, message_id: &str, content: &str) -> Result<()> {
        self.require_action_mut(action_id)?
            .message_mut(message_id)
            .ok_or_else(|| PromptFlowError::NotFound(format!("message {}", message_id)))?
            .content = content.to_string();
        Ok(())
    }

    // ---- variables ---------------------------------------------------------

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn variable(&self, id: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.id == id)
    }

    fn require_variable_mut(&mut self, id: &str) -> Result<&mut Variable> {
        self.variables
            .iter_mut()
            .find(|v| v.id == id)
            .ok_or_else(|| PromptFlowError::NotFound(format!("variable {}", id)))
    }

    /// Add an empty variable named `$variable<N>`. Returns its id.
    pub fn add_variable(&mut self) -> String {
        let mut counter = self.last_variable_id;
        let mut name = format!("$variable{}", counter);
        while self.variables.iter().any(|v| v.name == name) {
            counter += 1;
            name = format!("$variable{}", counter);
        }

        self.last_variable_id += 1;
        let id = self.last_variable_id.to_string();
        self.variables.push(Variable::new(id.clone(), name));
        id
    }

    /// Rename a variable. The name must be valid and unused.
    pub fn rename_variable(&mut self, id: &str, name: &str) -> Result<()> {
        if !Variable::is_valid_name(name) {
            return Err(PromptFlowError::InvalidInput(format!(
                "variable name {:?} must be '$' followed by letters, digits, '_' or '-'",
                name
            )));
        }
        if self.variables.iter().any(|v| v.name == name && v.id != id) {
            return Err(PromptFlowError::DuplicateName(name.to_string()));
        }
        self.require_variable_mut(id)?.name = name.to_string();
        Ok(())
    }

    pub fn set_variable_value(&mut self, id: &str, value: &str) -> Result<()> {
        self.require_variable_mut(id)?.value = value.to_string();
        Ok(())
    }

    pub fn delete_variable(&mut self, id: &str) -> Result<()> {
        let variable = self
            .variable(id)
            .ok_or_else(|| PromptFlowError::NotFound(format!("variable {}", id)))?;
        if variable.is_protected() {
            return Err(PromptFlowError::Protected(format!(
                "variable {} cannot be deleted",
                variable.name
            )));
        }
        self.variables.retain(|v| v.id != id);
        Ok(())
    }

    // ---- files -------------------------------------------------------------

    pub fn files(&self) -> &[FileAsset] {
        &self.files
    }

    pub fn file(&self, id: &str) -> Option<&FileAsset> {
        self.files.iter().find(|f| f.id == id)
    }

    fn require_file_mut(&mut self, id: &str) -> Result<&mut FileAsset> {
        self.files
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| PromptFlowError::NotFound(format!("file {}", id)))
    }

    /// Add an empty file named `file_<N>`. Returns its id.
    pub fn add_file(&mut self) -> String {
        self.last_file_id += 1;
        let id = self.last_file_id.to_string();
        let mut name = format!("file_{}", self.last_file_id);
        let mut suffix = 1;
        while self.files.iter().any(|f| f.name == name) {
            suffix += 1;
            name = format!("file_{}_{}", self.last_file_id, suffix);
        }
        self.files.push(FileAsset::new(id.clone(), name));
        id
    }

    pub fn rename_file(&mut self, id: &str, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(PromptFlowError::InvalidInput("file name is empty".to_string()));
        }
        if self.files.iter().any(|f| f.name == name && f.id != id) {
            return Err(PromptFlowError::DuplicateName(name.to_string()));
        }
        self.require_file_mut(id)?.name = name.to_string();
        Ok(())
    }

    /// Store `bytes` as the file's content.
    pub fn upload_file(&mut self, id: &str, bytes: &[u8], mime_type: &str) -> Result<()> {
        let file = self.require_file_mut(id)?;
        file.set_content(bytes, mime_type);
        debug!(file = %file.name, size = file.size_bytes, mime = %file.mime_type, "file uploaded");
        Ok(())
    }

    /// Delete a file and detach it from every message.
    pub fn delete_file(&mut self, id: &str) -> Result<()> {
        let before = self.files.len();
        self.files.retain(|f| f.id != id);
        if self.files.len() == before {
            return Err(PromptFlowError::NotFound(format!("file {}", id)));
        }
        for message in self.actions.iter_mut().flat_map(|a| a.messages.iter_mut()) {
            message.files.retain(|f| f != id);
        }
        Ok(())
    }
}
