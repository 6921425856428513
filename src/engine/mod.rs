// Prompt Flow engine
// Definitions, compilation, run tracking and execution

//! # Engine Module
//!
//! The layer between the domain models and the completion service.
//!
//! ## Data flow
//!
//! ```text
//! DefinitionStore --project--> CompiledFlow --FlowRunner--> ChatCompletionClient
//!                                                 |
//!                                                 v
//!                                   RunStore --> EventBus / LogFeed
//! ```
//!
//! ## Engine Components
//!
//! ### Definitions (`definitions`)
//! - Flows, steps, actions, variables and files with their editing operations
//! - Fork, rename and delete keep cross references consistent
//!
//! ### Compilation (`resolver`, `projector`)
//! - Placeholder substitution with forward-reference rejection
//! - Flow projection into API requests, in preview or execute mode
//!
//! ### Runs (`storage`, `events`, `logs`)
//! - Versioned run records and their status machine
//! - A broadcast of every status change and a human-readable log feed
//!
//! ### Execution (`runner`, `state`)
//! - Step-sequential, action-parallel execution against a completion client
//! - The shared state object handed to the runner and observers

pub mod definitions;
pub mod events;
pub mod logs;
pub mod projector;
pub mod resolver;
pub mod runner;
pub mod state;
pub mod storage;

pub use definitions::DefinitionStore;
pub use events::{EventBus, RunEvent, RunEventKind};
pub use logs::{LogEntry, LogFeed, LogLevel};
pub use projector::{project, to_debug_string, CompiledAction, CompiledFlow, ProjectionMode};
pub use resolver::{Placeholder, Resolution, Resolver};
pub use runner::{FlowRunner, RunnerConfig};
pub use state::AppState;
pub use storage::RunStore;
