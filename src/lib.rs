// Prompt Flow - Rust Edition
// An execution engine for multi-step LLM prompt pipelines

//! # Prompt Flow Library
//!
//! This is the library root for Prompt Flow, an engine that turns "flows"
//! (ordered steps, each holding one or more chat-model calls) into API
//! requests and tracks every execution in versioned runs.
//!
//! ## Core Components
//!
//! ### Definitions
//! - [`DefinitionStore`]: flows, steps, actions, variables and files, with the
//!   editing operations that keep them consistent (fork, rename, upload...)
//!
//! ### Compilation
//! - [`Resolver`]: substitutes `{{ $name }}` variables and
//!   `{{ $stepN.actionM.output }}` back-references in a single pass
//! - [`project`]: compiles a flow into API-ready requests, in preview or
//!   execute mode, with a masked debug rendering via [`to_debug_string`]
//!
//! ### Execution
//! - [`RunStore`]: run records with start, stream, complete, fail and cancel
//!   transitions, plus cloning for partial re-execution
//! - [`FlowRunner`]: runs whole flows, single steps or single actions against
//!   a [`ChatCompletionClient`]
//!
//! ### Observation
//! - [`EventBus`]: broadcast of every run state change
//! - [`LogFeed`]: human-readable log lines tagged with the run id
//!
//! ## Rust Learning Notes:
//!
//! ### Re-exports
//! `pub use` statements create shortcuts so users don't need to know the
//! internal module structure. Instead of
//! `use promptflow::engine::runner::FlowRunner`, users can write
//! `use promptflow::FlowRunner`.

// Core domain models
pub mod models;

// Definition store, resolver, projector, run store and runner
pub mod engine;

// Chat-completion client boundary
pub mod llm;

// Runtime configuration and persisted preferences
pub mod config;

pub use models::{
    Action, ActionMessage, ActionRun, FileAsset, Flow, MessageRole, Run, RunStatus, Step,
    StepLayout, StepRun, Variable,
};

pub use engine::{
    definitions::DefinitionStore,
    events::{EventBus, RunEvent, RunEventKind},
    logs::{LogEntry, LogFeed, LogLevel},
    projector::{project, to_debug_string, CompiledAction, CompiledFlow, ProjectionMode},
    resolver::{Resolution, Resolver},
    runner::{FlowRunner, RunnerConfig},
    state::AppState,
    storage::RunStore,
};

pub use llm::{ChatCompletionClient, ChatRequest, ContentBlock, LLMError, LLMResult};

pub use config::{AppConfig, Preferences};

// Core error types
use thiserror::Error;

/// Errors raised by Prompt Flow operations
///
/// ## Rust Learning Notes:
///
/// ### The `thiserror` Crate
/// - `#[derive(Error)]` implements the `std::error::Error` trait
/// - `#[error("...")]` provides human-readable error messages
/// - `#[from]` enables automatic conversion from other error types
/// - `#[source]` exposes the underlying cause without converting from it
#[derive(Error, Debug)]
pub enum PromptFlowError {
    /// A flow, step, action, variable, file or run does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Rename would collide with an existing variable or file name
    #[error("Duplicate name: {0}")]
    DuplicateName(String),

    /// Attempt to delete the built-in default variable
    #[error("Protected: {0}")]
    Protected(String),

    /// The completion service rejected an action. The failure is already
    /// recorded on the run identified by `run_id`.
    #[error("Step {} action {} of run {run_id} failed: {source}", .step_index + 1, .action_index + 1)]
    ExternalService {
        run_id: String,
        step_index: usize,
        action_index: usize,
        #[source]
        source: llm::LLMError,
    },

    /// The runner stopped a flow at a failed step
    #[error("Run {run_id} stopped after step {} failed: {message}", .step_index + 1)]
    StepFailed {
        run_id: String,
        step_index: usize,
        message: String,
    },

    /// Completion service errors outside of a run
    #[error("LLM error: {0}")]
    Llm(#[from] llm::LLMError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for PromptFlowError {
    fn from(err: std::io::Error) -> Self {
        PromptFlowError::Io(err.to_string())
    }
}

impl From<::config::ConfigError> for PromptFlowError {
    fn from(err: ::config::ConfigError) -> Self {
        PromptFlowError::Config(err.to_string())
    }
}

/// Type alias for Results that use our custom error type
pub type Result<T> = std::result::Result<T, PromptFlowError>;
