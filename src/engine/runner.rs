// Flow runner: drives compiled flows against a completion client

//! # Flow Runner
//!
//! Three entry points share one execution primitive:
//!
//! - [`FlowRunner::run_flow`] always starts a fresh version-1 run and walks
//!   the steps in order. Before each step it re-reads the run's live status
//!   and stops scheduling once the run was cancelled.
//! - [`FlowRunner::run_step`] and [`FlowRunner::run_action`] re-execute one
//!   step or one action. They clone the flow's latest run when its layout
//!   still matches the flow up to the target step, so back-references keep
//!   seeing earlier results, and start a fresh run otherwise.
//!
//! Actions within a step run concurrently and the step settles once all of
//! them have. Each action resolves its back-references against the live run
//! at the moment it starts, streams every chunk into the run store and the
//! log feed, then records the client's aggregated text as the final output.
//!
//! A failing action is recorded on the run *and* returned to the caller as
//! [`PromptFlowError::ExternalService`]. `run_flow` logs step failures and
//! moves on when `continue_on_step_failure` is set; otherwise it fails the
//! run and returns [`PromptFlowError::StepFailed`].

use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::config::AppConfig;
use crate::engine::definitions::DefinitionStore;
use crate::engine::projector::{project, CompiledAction, CompiledFlow, CompiledStep, ProjectionMode};
use crate::engine::resolver::Resolver;
use crate::engine::state::AppState;
use crate::llm::{stream_completion, ChatCompletionClient, ChatRequest, ContentBlock};
use crate::models::{Run, RunStatus, StepLayout};
use crate::{PromptFlowError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Keep executing later steps after one fails.
    pub continue_on_step_failure: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            continue_on_step_failure: true,
        }
    }
}

impl From<&AppConfig> for RunnerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            continue_on_step_failure: config.continue_on_step_failure,
        }
    }
}

/// A flow compiled for execution together with the layout its runs use.
struct Prepared {
    name: String,
    compiled: CompiledFlow,
    layout: Vec<StepLayout>,
}

#[derive(Clone)]
pub struct FlowRunner {
    state: Arc<AppState>,
    client: Arc<dyn ChatCompletionClient>,
    config: RunnerConfig,
}

impl FlowRunner {
    pub fn new(state: Arc<AppState>, client: Arc<dyn ChatCompletionClient>) -> Self {
        Self::with_config(state, client, RunnerConfig::default())
    }

    pub fn with_config(
        state: Arc<AppState>,
        client: Arc<dyn ChatCompletionClient>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            state,
            client,
            config,
        }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    async fn prepare(&self, flow_id: &str) -> Result<Prepared> {
        let definitions = self.state.definitions.read().await;
        prepare(&definitions, flow_id)
    }

    /// Run every step of a flow in a new run. Returns the run id.
    #[instrument(skip(self))]
    pub async fn run_flow(&self, flow_id: &str) -> Result<String> {
        let prepared = self.prepare(flow_id).await?;
        let runs = &self.state.runs;
        let logs = &self.state.logs;

        let run_id = runs.start_run(flow_id, &prepared.layout);
        logs.info(
            format!(
                "Starting flow \"{}\" ({} steps)",
                prepared.name,
                prepared.compiled.steps.len()
            ),
            Some(&run_id),
        );

        for (step_index, step) in prepared.compiled.steps.iter().enumerate() {
            if runs.run_status(&run_id) != Some(RunStatus::Running) {
                logs.warn(
                    format!("Run cancelled before step {}", step_index + 1),
                    Some(&run_id),
                );
                return Ok(run_id);
            }

            if let Err(e) = self.execute_step(&run_id, step_index, step).await {
                logs.error(format!("Step {} failed: {}", step_index + 1, e), Some(&run_id));
                if !self.config.continue_on_step_failure {
                    runs.fail_run(&run_id)?;
                    return Err(PromptFlowError::StepFailed {
                        run_id,
                        step_index,
                        message: e.to_string(),
                    });
                }
            }
        }

        runs.finalize_run_if_settled(&run_id)?;
        if let Some(run) = runs.get_run(&run_id) {
            logs.info(
                format!(
                    "Flow \"{}\" finished: {}{}",
                    prepared.name,
                    run.status,
                    duration_suffix(run.duration_ms)
                ),
                Some(&run_id),
            );
        }
        Ok(run_id)
    }

    /// Re-execute every action of one step. Returns the run id used.
    #[instrument(skip(self))]
    pub async fn run_step(&self, flow_id: &str, step_index: usize) -> Result<String> {
        let prepared = self.prepare(flow_id).await?;
        let step = prepared.compiled.steps.get(step_index).ok_or_else(|| {
            PromptFlowError::NotFound(format!("step {} in flow {}", step_index + 1, flow_id))
        })?;

        let run_id = self.select_run(flow_id, &prepared.layout, step_index, None);
        let result = self.execute_step(&run_id, step_index, step).await;
        self.state.runs.conclude_run(&run_id)?;
        result.map(|_| run_id)
    }

    /// Re-execute a single action. Returns the run id used.
    #[instrument(skip(self))]
    pub async fn run_action(
        &self,
        flow_id: &str,
        step_index: usize,
        action_index: usize,
    ) -> Result<String> {
        let prepared = self.prepare(flow_id).await?;
        let action = prepared
            .compiled
            .action(step_index, action_index)
            .ok_or_else(|| {
                PromptFlowError::NotFound(format!(
                    "action {} of step {} in flow {}",
                    action_index + 1,
                    step_index + 1,
                    flow_id
                ))
            })?;

        let runs = &self.state.runs;
        let run_id = self.select_run(flow_id, &prepared.layout, step_index, Some(action_index));
        runs.start_step_run(&run_id, step_index)?;
        let result = self
            .execute_action(&run_id, step_index, action_index, action)
            .await;
        // Settles only if every sibling is terminal; conclude idles it otherwise.
        runs.complete_step_run(&run_id, step_index)?;
        runs.conclude_run(&run_id)?;
        result.map(|_| run_id)
    }

    /// Cancel a run. In-flight calls are not interrupted; their results
    /// land on the cancelled run without changing its status.
    pub fn cancel_execution(&self, run_id: &str) -> Result<bool> {
        let cancelled = self.state.runs.cancel_run(run_id)?;
        if cancelled {
            self.state.logs.warn("Run cancelled", Some(run_id));
        }
        Ok(cancelled)
    }

    /// Clone the latest run when it still lines up with `layout` through
    /// `step_index`, otherwise start a fresh one.
    fn select_run(
        &self,
        flow_id: &str,
        layout: &[StepLayout],
        step_index: usize,
        action_index: Option<usize>,
    ) -> String {
        let runs = &self.state.runs;
        let logs = &self.state.logs;

        if let Some(latest) = runs.latest_run_for_flow(flow_id) {
            if latest.matches_layout_through(layout, step_index) {
                if let Some(run_id) = runs.clone_run(&latest.id, step_index, action_index) {
                    logs.info(
                        format!(
                            "Re-running from run {} as version {}",
                            latest.id,
                            latest.version + 1
                        ),
                        Some(&run_id),
                    );
                    return run_id;
                }
            } else {
                logs.warn(
                    format!(
                        "Flow changed since run {}; starting a fresh run",
                        latest.id
                    ),
                    Some(&latest.id),
                );
            }
        }
        runs.start_run(flow_id, layout)
    }

    async fn execute_step(&self, run_id: &str, step_index: usize, step: &CompiledStep) -> Result<()> {
        let runs = &self.state.runs;
        let logs = &self.state.logs;

        if !runs.start_step_run(run_id, step_index)? {
            debug!(run_id, step = step_index, "run no longer running, step skipped");
            return Ok(());
        }
        logs.info(format!("Executing step {}", step_index + 1), Some(run_id));

        let results = join_all(
            step.actions
                .iter()
                .enumerate()
                .map(|(action_index, action)| {
                    self.execute_action(run_id, step_index, action_index, action)
                }),
        )
        .await;

        runs.complete_step_run(run_id, step_index)?;

        if let Some(step_run) = runs.get_run(run_id).and_then(|r| r.steps.get(step_index).cloned()) {
            let line = format!(
                "Finished step {}: {}{}",
                step_index + 1,
                step_run.status,
                duration_suffix(step_run.duration_ms)
            );
            if step_run.status == RunStatus::Completed {
                logs.info(line, Some(run_id));
            } else {
                logs.warn(line, Some(run_id));
            }
        }

        results.into_iter().collect::<Result<Vec<_>>>().map(|_| ())
    }

    /// Run one compiled action inside `run_id`. Returns the final output.
    async fn execute_action(
        &self,
        run_id: &str,
        step_index: usize,
        action_index: usize,
        action: &CompiledAction,
    ) -> Result<String> {
        let runs = &self.state.runs;
        let logs = &self.state.logs;
        let label = format!("Step {} action {}", step_index + 1, action_index + 1);

        if !runs.start_action_run(run_id, step_index, action_index)? {
            debug!(run_id, step = step_index, action = action_index, "run no longer running, action skipped");
            return Ok(String::new());
        }

        let snapshot = runs
            .get_run(run_id)
            .ok_or_else(|| PromptFlowError::NotFound(format!("run {}", run_id)))?;
        let (request, rejected) = bind_back_references(action, &snapshot, step_index);
        for diagnostic in rejected {
            logs.warn(format!("{}: {}", label, diagnostic), Some(run_id));
        }

        let stream_log = logs.info(format!("{} ({}): ", label, request.model), Some(run_id));
        let streamed = stream_completion(self.client.as_ref(), &request, |chunk| {
            if let Err(e) = runs.update_action_output(run_id, step_index, action_index, chunk, true) {
                debug!(run_id, error = %e, "dropped streamed chunk");
            }
            logs.append(&stream_log, chunk);
        })
        .await;

        match streamed {
            Ok(output) => {
                runs.complete_action_run(run_id, step_index, action_index, &output)?;
                let duration = runs
                    .get_run(run_id)
                    .and_then(|r| r.action(step_index, action_index).ok().map(|a| a.duration_ms))
                    .flatten();
                logs.info(
                    format!("Completed {}{}", label.to_lowercase(), duration_suffix(duration)),
                    Some(run_id),
                );
                Ok(output)
            }
            Err(source) => {
                let message = source.to_string();
                runs.fail_action_run(run_id, step_index, action_index, &message)?;
                logs.error(format!("{} failed: {}", label, message), Some(run_id));
                warn!(run_id, step = step_index, action = action_index, error = %message, "action failed");
                Err(PromptFlowError::ExternalService {
                    run_id: run_id.to_string(),
                    step_index,
                    action_index,
                    source,
                })
            }
        }
    }
}

fn prepare(definitions: &DefinitionStore, flow_id: &str) -> Result<Prepared> {
    let not_found = || PromptFlowError::NotFound(format!("flow {}", flow_id));
    let compiled = project(definitions, flow_id, ProjectionMode::Execute).ok_or_else(not_found)?;
    let layout = definitions.execution_layout(flow_id).ok_or_else(not_found)?;
    let name = definitions
        .flow(flow_id)
        .map(|f| f.name.clone())
        .unwrap_or_default();
    info!(flow_id, steps = compiled.steps.len(), "flow compiled");
    Ok(Prepared {
        name,
        compiled,
        layout,
    })
}

/// Request for `action` with back-references resolved against `run`, plus
/// a diagnostic for every reference that was dropped.
fn bind_back_references(action: &CompiledAction, run: &Run, step_index: usize) -> (ChatRequest, Vec<String>) {
    let resolver = Resolver::new(&[]).with_run(run, step_index);
    let mut request = action.to_request();
    let mut rejected = Vec::new();

    for block in request.messages.iter_mut().flat_map(|m| m.content.iter_mut()) {
        if let ContentBlock::Text { text } = block {
            let resolution = resolver.resolve_back_references(text);
            *text = resolution.text;
            rejected.extend(resolution.rejected);
        }
    }
    (request, rejected)
}

fn duration_suffix(duration_ms: Option<i64>) -> String {
    duration_ms
        .map(|ms| format!(" in {}ms", ms))
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
