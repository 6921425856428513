// Core domain models for prompt flows

//! # Domain Models Module
//!
//! Plain data for the two halves of the system:
//!
//! - **Definitions**: [`Flow`], [`Step`], [`Action`], [`Variable`] and
//!   [`FileAsset`], edited through the definition store.
//! - **Execution records**: [`Run`], [`StepRun`] and [`ActionRun`], written by
//!   the flow runner through the run store.
//!
//! Runs never point back into definitions beyond the step and action ids
//! they were laid out from.
//!
//! ## Rust Learning Notes:
//!
//! Every type derives `Serialize`/`Deserialize` with `camelCase` field names
//! so a saved workspace reads like the JSON the editor produces.

pub mod action;
pub mod file;
pub mod flow;
pub mod run;
pub mod variable;

pub use action::{Action, ActionMessage, MessageRole, DEFAULT_MODEL, DEFAULT_TEMPERATURE};
pub use file::{FileAsset, DEFAULT_FILE_ID};
pub use flow::{Flow, Step, StepLayout};
pub use run::{ActionRun, Run, RunStatus, StepRun};
pub use variable::{Variable, DEFAULT_VARIABLE_ID, VARIABLE_SIGIL};
