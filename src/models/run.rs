// Execution records for flows

//! # Runs
//!
//! A [`Run`] is the execution-time shadow of a flow. It holds one [`StepRun`]
//! per step and one [`ActionRun`] per action, laid out from the flow's shape
//! at the moment the run was created. Later edits to the flow never resize
//! an existing run.
//!
//! ## Status machine
//!
//! Every level moves through the same states:
//!
//! ```text
//! idle --start--> running --complete--> completed
//!                 running --fail------> failed
//!                 running --cancel----> cancelled
//! ```
//!
//! Terminal states are only left by [`Run::fork`], which works on a copy.
//!
//! ## Cascades
//!
//! - Completing an action completes its step once every action in the step
//!   is terminal, and the step's completion in turn re-evaluates the run.
//! - Failing an action fails its step immediately. The run is left alone;
//!   it settles when the step loop finalises the step.
//! - A settled run is `failed` if any step failed, `cancelled` if any step
//!   was cancelled, and `completed` otherwise.
//!
//! Results that arrive for a node that is no longer `running` (typically
//! after cancellation) are recorded as output or error but never move it.
//!
//! ## Rust Learning Notes:
//!
//! The transition methods take `now` as a parameter instead of reading the
//! clock. That keeps them deterministic, so the tests below can assert exact
//! durations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::flow::StepLayout;
use crate::{PromptFlowError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn elapsed_ms(start: Option<DateTime<Utc>>, end: DateTime<Utc>) -> i64 {
    start
        .map(|start| (end - start).num_milliseconds().max(0))
        .unwrap_or(0)
}

/// Status a group of settled children rolls up to.
fn aggregate<I: IntoIterator<Item = RunStatus>>(statuses: I) -> RunStatus {
    let mut result = RunStatus::Completed;
    for status in statuses {
        match status {
            RunStatus::Failed => return RunStatus::Failed,
            RunStatus::Cancelled => result = RunStatus::Cancelled,
            _ => {}
        }
    }
    result
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRun {
    pub id: String,
    pub action_id: String,
    pub status: RunStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub output: String,
    pub streaming_output: bool,
    pub error: Option<String>,
}

impl ActionRun {
    pub fn new(action_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            action_id: action_id.into(),
            status: RunStatus::Idle,
            start_time: None,
            end_time: None,
            duration_ms: None,
            output: String::new(),
            streaming_output: false,
            error: None,
        }
    }

    /// Back to the idle shape, keeping `id` and `action_id`.
    pub fn reset(&mut self) {
        self.status = RunStatus::Idle;
        self.start_time = None;
        self.end_time = None;
        self.duration_ms = None;
        self.output.clear();
        self.streaming_output = false;
        self.error = None;
    }

    fn settle(&mut self, status: RunStatus, now: DateTime<Utc>) {
        self.status = status;
        self.end_time = Some(now);
        self.duration_ms = Some(elapsed_ms(self.start_time, now));
        self.streaming_output = false;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRun {
    pub id: String,
    pub step_id: String,
    pub status: RunStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub actions: Vec<ActionRun>,
}

impl StepRun {
    pub fn new(layout: &StepLayout) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            step_id: layout.id.clone(),
            status: RunStatus::Idle,
            start_time: None,
            end_time: None,
            duration_ms: None,
            actions: layout.action_ids.iter().map(ActionRun::new).collect(),
        }
    }

    fn reset_timing(&mut self) {
        self.status = RunStatus::Idle;
        self.start_time = None;
        self.end_time = None;
        self.duration_ms = None;
    }

    fn settle(&mut self, status: RunStatus, now: DateTime<Utc>) {
        self.status = status;
        self.end_time = Some(now);
        self.duration_ms = Some(elapsed_ms(self.start_time, now));
    }

    pub fn all_actions_terminal(&self) -> bool {
        self.actions.iter().all(|a| a.status.is_terminal())
    }

    pub fn action_ids(&self) -> Vec<String> {
        self.actions.iter().map(|a| a.action_id.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    pub flow_id: String,
    pub version: u32,
    pub status: RunStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub steps: Vec<StepRun>,
}

impl Run {
    /// A fresh version-1 run in `running` state with every step and action idle.
    pub fn new(flow_id: impl Into<String>, layout: &[StepLayout], now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            flow_id: flow_id.into(),
            version: 1,
            status: RunStatus::Running,
            start_time: Some(now),
            end_time: None,
            duration_ms: None,
            steps: layout.iter().map(StepRun::new).collect(),
        }
    }

    /// Copy this run for a targeted re-execution.
    ///
    /// The copy gets a new id, the next version and a fresh start time. Only
    /// the step at `step_index` is reset, and within it either every action
    /// or only `action_index`. Everything else keeps its previous status,
    /// output and timing, so back-references still see earlier results.
    pub fn fork(
        &self,
        step_index: usize,
        action_index: Option<usize>,
        now: DateTime<Utc>,
    ) -> Result<Run> {
        let mut copy = self.clone();
        copy.id = Uuid::new_v4().to_string();
        copy.version = self.version + 1;
        copy.status = RunStatus::Running;
        copy.start_time = Some(now);
        copy.end_time = None;
        copy.duration_ms = None;

        // Nothing drives the source's in-flight nodes in the copy.
        for step in &mut copy.steps {
            if step.status == RunStatus::Running {
                step.reset_timing();
            }
            for action in &mut step.actions {
                if action.status == RunStatus::Running {
                    action.reset();
                }
            }
        }

        let step = copy.step_mut(step_index)?;
        step.reset_timing();
        match action_index {
            Some(index) => {
                let len = step.actions.len();
                step.actions
                    .get_mut(index)
                    .ok_or_else(|| action_not_found(step_index, index, len))?
                    .reset();
            }
            None => step.actions.iter_mut().for_each(ActionRun::reset),
        }
        Ok(copy)
    }

    pub fn step(&self, step_index: usize) -> Result<&StepRun> {
        let len = self.steps.len();
        self.steps
            .get(step_index)
            .ok_or_else(|| step_not_found(step_index, len))
    }

    fn step_mut(&mut self, step_index: usize) -> Result<&mut StepRun> {
        let len = self.steps.len();
        self.steps
            .get_mut(step_index)
            .ok_or_else(|| step_not_found(step_index, len))
    }

    pub fn action(&self, step_index: usize, action_index: usize) -> Result<&ActionRun> {
        let step = self.step(step_index)?;
        step.actions
            .get(action_index)
            .ok_or_else(|| action_not_found(step_index, action_index, step.actions.len()))
    }

    fn action_mut(&mut self, step_index: usize, action_index: usize) -> Result<&mut ActionRun> {
        let step = self.step_mut(step_index)?;
        let len = step.actions.len();
        step.actions
            .get_mut(action_index)
            .ok_or_else(|| action_not_found(step_index, action_index, len))
    }

    /// The shape this run was laid out from.
    pub fn layout(&self) -> Vec<StepLayout> {
        self.steps
            .iter()
            .map(|s| StepLayout {
                id: s.step_id.clone(),
                action_ids: s.action_ids(),
            })
            .collect()
    }

    /// Whether steps `0..=step_index` of this run still line up with
    /// `layout`, so positional back-references keep pointing at the same
    /// actions.
    pub fn matches_layout_through(&self, layout: &[StepLayout], step_index: usize) -> bool {
        if step_index >= self.steps.len() || step_index >= layout.len() {
            return false;
        }
        self.steps
            .iter()
            .zip(layout)
            .take(step_index + 1)
            .all(|(run_step, def)| {
                run_step.step_id == def.id && run_step.action_ids() == def.action_ids
            })
    }

    pub fn start_step(&mut self, step_index: usize, now: DateTime<Utc>) -> Result<bool> {
        if self.status.is_terminal() {
            return Ok(false);
        }
        let step = self.step_mut(step_index)?;
        if step.status.is_terminal() {
            return Ok(false);
        }
        step.status = RunStatus::Running;
        step.start_time = Some(now);
        step.end_time = None;
        step.duration_ms = None;
        Ok(true)
    }

    /// Close out a running step once all of its actions are terminal, then
    /// settle the run if every step is done.
    pub fn complete_step(&mut self, step_index: usize, now: DateTime<Utc>) -> Result<bool> {
        let step = self.step_mut(step_index)?;
        if step.status != RunStatus::Running {
            self.finalize_if_settled(now);
            return Ok(false);
        }
        if !step.all_actions_terminal() {
            return Ok(false);
        }
        let status = if step.actions.iter().any(|a| a.status == RunStatus::Failed) {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        step.settle(status, now);
        self.finalize_if_settled(now);
        Ok(true)
    }

    /// Settle the run once every step is terminal.
    pub fn finalize_if_settled(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != RunStatus::Running {
            return false;
        }
        if !self.steps.iter().all(|s| s.status.is_terminal()) {
            return false;
        }
        self.settle(aggregate(self.steps.iter().map(|s| s.status)), now);
        true
    }

    /// Settle the run after a partial re-execution, ignoring steps that
    /// never ran in it.
    ///
    /// A step where only some actions ran goes back to `idle`; the outcome
    /// of the actions that did run still counts toward the run status.
    pub fn conclude(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != RunStatus::Running {
            return false;
        }
        let mut statuses = Vec::new();
        for step in &mut self.steps {
            if step.status.is_terminal() {
                statuses.push(step.status);
                continue;
            }
            if step.status == RunStatus::Running {
                step.reset_timing();
            }
            statuses.extend(
                step.actions
                    .iter()
                    .map(|a| a.status)
                    .filter(|s| s.is_terminal()),
            );
        }
        self.settle(aggregate(statuses), now);
        true
    }

    fn settle(&mut self, status: RunStatus, now: DateTime<Utc>) {
        self.status = status;
        self.end_time = Some(now);
        self.duration_ms = Some(elapsed_ms(self.start_time, now));
    }

    /// Mark the action running with cleared output. Refused once the run
    /// itself is terminal.
    pub fn start_action(
        &mut self,
        step_index: usize,
        action_index: usize,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if self.status.is_terminal() {
            // Still validate the indices.
            self.action(step_index, action_index)?;
            return Ok(false);
        }
        let action = self.action_mut(step_index, action_index)?;
        action.reset();
        action.status = RunStatus::Running;
        action.start_time = Some(now);
        Ok(true)
    }

    pub fn update_output(
        &mut self,
        step_index: usize,
        action_index: usize,
        text: &str,
        append: bool,
    ) -> Result<()> {
        let action = self.action_mut(step_index, action_index)?;
        if append {
            action.output.push_str(text);
        } else {
            action.output = text.to_string();
        }
        action.streaming_output = true;
        Ok(())
    }

    /// Record the authoritative output. Cascades to the step and run when
    /// the action was still running.
    pub fn complete_action(
        &mut self,
        step_index: usize,
        action_index: usize,
        output: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let action = self.action_mut(step_index, action_index)?;
        action.output = output.to_string();
        action.streaming_output = false;
        if action.status != RunStatus::Running {
            return Ok(false);
        }
        action.settle(RunStatus::Completed, now);

        let step = self.step_mut(step_index)?;
        if step.status == RunStatus::Running && step.all_actions_terminal() {
            self.complete_step(step_index, now)?;
        }
        Ok(true)
    }

    /// Record the error and fail the owning step. The run is not touched.
    pub fn fail_action(
        &mut self,
        step_index: usize,
        action_index: usize,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let action = self.action_mut(step_index, action_index)?;
        action.error = Some(error.to_string());
        if action.status != RunStatus::Running {
            action.streaming_output = false;
            return Ok(false);
        }
        action.settle(RunStatus::Failed, now);

        let step = self.step_mut(step_index)?;
        if !step.status.is_terminal() {
            step.settle(RunStatus::Failed, now);
        }
        Ok(true)
    }

    /// Cancel the run and every node currently running in it.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.settle(RunStatus::Cancelled, now);
        for step in &mut self.steps {
            if step.status == RunStatus::Running {
                step.settle(RunStatus::Cancelled, now);
            }
            for action in &mut step.actions {
                if action.status == RunStatus::Running {
                    action.settle(RunStatus::Cancelled, now);
                }
            }
        }
        true
    }

    /// Force the run to `failed`, cancelling anything still running.
    pub fn fail(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        for step in &mut self.steps {
            for action in &mut step.actions {
                if action.status == RunStatus::Running {
                    action.settle(RunStatus::Cancelled, now);
                }
            }
            if step.status == RunStatus::Running {
                step.settle(RunStatus::Cancelled, now);
            }
        }
        self.settle(RunStatus::Failed, now);
        true
    }

    pub fn clear_action(&mut self, step_index: usize, action_index: usize) -> Result<()> {
        self.action_mut(step_index, action_index)?.reset();
        Ok(())
    }
}

fn step_not_found(step_index: usize, len: usize) -> PromptFlowError {
    PromptFlowError::NotFound(format!(
        "step index {} (run has {} steps)",
        step_index, len
    ))
}

fn action_not_found(step_index: usize, action_index: usize, len: usize) -> PromptFlowError {
    PromptFlowError::NotFound(format!(
        "action index {} in step {} (step has {} actions)",
        action_index, step_index, len
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn layout() -> Vec<StepLayout> {
        vec![
            StepLayout {
                id: "s1".into(),
                action_ids: vec!["a1".into(), "a2".into()],
            },
            StepLayout {
                id: "s2".into(),
                action_ids: vec!["a3".into()],
            },
        ]
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn at(ms: i64) -> DateTime<Utc> {
        t0() + Duration::milliseconds(ms)
    }

    fn finished_run() -> Run {
        let mut run = Run::new("flow", &layout(), t0());
        run.start_step(0, at(1)).unwrap();
        run.start_action(0, 0, at(1)).unwrap();
        run.start_action(0, 1, at(1)).unwrap();
        run.complete_action(0, 0, "a", at(10)).unwrap();
        run.complete_action(0, 1, "b", at(20)).unwrap();
        run.start_step(1, at(21)).unwrap();
        run.start_action(1, 0, at(21)).unwrap();
        run.complete_action(1, 0, "c", at(30)).unwrap();
        run
    }

    #[test]
    fn test_new_run_is_idle_inside() {
        let run = Run::new("flow", &layout(), t0());
        assert_eq!(run.version, 1);
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.steps.len(), 2);
        assert_eq!(run.steps[0].actions.len(), 2);
        assert!(run
            .steps
            .iter()
            .flat_map(|s| &s.actions)
            .all(|a| a.status == RunStatus::Idle));
    }

    #[test]
    fn test_completion_cascades_to_step_and_run() {
        let run = finished_run();
        assert_eq!(run.steps[0].status, RunStatus::Completed);
        assert_eq!(run.steps[0].duration_ms, Some(19));
        assert_eq!(run.steps[0].actions[1].duration_ms, Some(19));
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.duration_ms, Some(30));
    }

    #[test]
    fn test_step_waits_for_every_action() {
        let mut run = Run::new("flow", &layout(), t0());
        run.start_step(0, at(0)).unwrap();
        run.start_action(0, 0, at(0)).unwrap();
        run.start_action(0, 1, at(0)).unwrap();
        run.complete_action(0, 0, "a", at(5)).unwrap();
        assert_eq!(run.steps[0].status, RunStatus::Running);
    }

    #[test]
    fn test_failure_fails_step_but_not_run() {
        let mut run = Run::new("flow", &layout(), t0());
        run.start_step(0, at(0)).unwrap();
        run.start_action(0, 0, at(0)).unwrap();
        run.start_action(0, 1, at(0)).unwrap();

        run.fail_action(0, 0, "boom", at(3)).unwrap();
        assert_eq!(run.steps[0].actions[0].status, RunStatus::Failed);
        assert_eq!(run.steps[0].status, RunStatus::Failed);
        assert_eq!(run.status, RunStatus::Running);

        // Sibling still finishes and records output, step stays failed.
        run.complete_action(0, 1, "b", at(8)).unwrap();
        assert_eq!(run.steps[0].actions[1].status, RunStatus::Completed);
        assert_eq!(run.steps[0].status, RunStatus::Failed);
        assert_eq!(run.status, RunStatus::Running);
    }

    #[test]
    fn test_run_with_failed_step_settles_as_failed() {
        let mut run = Run::new("flow", &layout(), t0());
        run.start_step(0, at(0)).unwrap();
        run.start_action(0, 0, at(0)).unwrap();
        run.start_action(0, 1, at(0)).unwrap();
        run.fail_action(0, 0, "boom", at(3)).unwrap();
        run.complete_action(0, 1, "b", at(4)).unwrap();
        run.complete_step(0, at(4)).unwrap();
        assert_eq!(run.status, RunStatus::Running);

        run.start_step(1, at(5)).unwrap();
        run.start_action(1, 0, at(5)).unwrap();
        run.complete_action(1, 0, "c", at(9)).unwrap();
        assert_eq!(run.steps[1].status, RunStatus::Completed);
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.duration_ms, Some(9));
    }

    #[test]
    fn test_fork_resets_only_target_step() {
        let run = finished_run();
        let fork = run.fork(0, None, at(100)).unwrap();

        assert_ne!(fork.id, run.id);
        assert_eq!(fork.version, 2);
        assert_eq!(fork.status, RunStatus::Running);
        assert_eq!(fork.start_time, Some(at(100)));
        assert_eq!(fork.steps[1], run.steps[1]);
        assert_eq!(fork.steps[0].status, RunStatus::Idle);
        assert_eq!(fork.steps[0].id, run.steps[0].id);
        for action in &fork.steps[0].actions {
            assert_eq!(action.status, RunStatus::Idle);
            assert!(action.output.is_empty());
            assert_eq!(action.duration_ms, None);
        }
        // Source is untouched.
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.steps[0].actions[0].output, "a");
    }

    #[test]
    fn test_fork_single_action() {
        let run = finished_run();
        let fork = run.fork(0, Some(1), at(100)).unwrap();
        assert_eq!(fork.steps[0].actions[0], run.steps[0].actions[0]);
        assert_eq!(fork.steps[0].actions[1].status, RunStatus::Idle);
        assert_eq!(fork.steps[0].actions[1].id, run.steps[0].actions[1].id);
        assert_eq!(fork.steps[0].actions[1].action_id, "a2");
    }

    #[test]
    fn test_fork_rejects_bad_indices() {
        let run = finished_run();
        assert!(matches!(
            run.fork(5, None, at(1)),
            Err(PromptFlowError::NotFound(_))
        ));
        assert!(matches!(
            run.fork(1, Some(3), at(1)),
            Err(PromptFlowError::NotFound(_))
        ));
    }

    #[test]
    fn test_cancel_only_touches_running_nodes() {
        let mut run = Run::new("flow", &layout(), t0());
        run.start_step(0, at(0)).unwrap();
        run.start_action(0, 0, at(0)).unwrap();
        run.start_action(0, 1, at(0)).unwrap();
        run.complete_action(0, 0, "a", at(2)).unwrap();

        assert!(run.cancel(at(7)));
        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(run.duration_ms, Some(7));
        assert_eq!(run.steps[0].status, RunStatus::Cancelled);
        assert_eq!(run.steps[0].actions[0].status, RunStatus::Completed);
        assert_eq!(run.steps[0].actions[1].status, RunStatus::Cancelled);
        assert_eq!(run.steps[0].actions[1].duration_ms, Some(7));
        assert_eq!(run.steps[1].status, RunStatus::Idle);

        // A late result is recorded but does not revive anything.
        run.complete_action(0, 1, "late", at(9)).unwrap();
        assert_eq!(run.steps[0].actions[1].status, RunStatus::Cancelled);
        assert_eq!(run.steps[0].actions[1].output, "late");
        assert_eq!(run.status, RunStatus::Cancelled);

        assert!(!run.start_step(1, at(10)).unwrap());
        assert!(!run.cancel(at(11)));
    }

    #[test]
    fn test_start_action_resets_previous_state() {
        let mut run = Run::new("flow", &layout(), t0());
        run.start_step(0, at(0)).unwrap();
        run.start_action(0, 0, at(0)).unwrap();
        run.update_output(0, 0, "par", true).unwrap();
        run.update_output(0, 0, "tial", true).unwrap();
        assert_eq!(run.steps[0].actions[0].output, "partial");
        assert!(run.steps[0].actions[0].streaming_output);

        run.start_action(0, 0, at(4)).unwrap();
        let action = &run.steps[0].actions[0];
        assert!(action.output.is_empty());
        assert_eq!(action.start_time, Some(at(4)));
        assert_eq!(action.status, RunStatus::Running);
    }

    #[test]
    fn test_final_output_overrides_stream() {
        let mut run = Run::new("flow", &layout(), t0());
        run.start_step(1, at(0)).unwrap();
        run.start_action(1, 0, at(0)).unwrap();
        run.update_output(1, 0, "drifted", true).unwrap();
        run.complete_action(1, 0, "final", at(3)).unwrap();
        assert_eq!(run.steps[1].actions[0].output, "final");
        assert!(!run.steps[1].actions[0].streaming_output);
    }

    #[test]
    fn test_clear_action_keeps_identity() {
        let mut run = finished_run();
        let before = run.steps[0].actions[0].clone();
        run.clear_action(0, 0).unwrap();
        let after = &run.steps[0].actions[0];
        assert_eq!(after.id, before.id);
        assert_eq!(after.action_id, before.action_id);
        assert_eq!(after.status, RunStatus::Idle);
        assert!(after.output.is_empty());
    }

    #[test]
    fn test_layout_matching() {
        let run = finished_run();
        let mut current = layout();
        assert!(run.matches_layout_through(&current, 1));

        current[1].action_ids.push("a4".into());
        assert!(run.matches_layout_through(&current, 0));
        assert!(!run.matches_layout_through(&current, 1));
        assert!(!run.matches_layout_through(&current, 2));
    }

    #[test]
    fn test_complete_step_waits_for_idle_siblings() {
        let mut run = Run::new("flow", &layout(), t0());
        run.start_step(0, at(0)).unwrap();
        run.start_action(0, 0, at(0)).unwrap();
        run.complete_action(0, 0, "a", at(3)).unwrap();

        assert!(!run.complete_step(0, at(4)).unwrap());
        assert_eq!(run.steps[0].status, RunStatus::Running);
        assert_eq!(run.steps[0].actions[1].status, RunStatus::Idle);
        assert_eq!(run.status, RunStatus::Running);
    }

    #[test]
    fn test_conclude_idles_partially_run_step() {
        let mut run = Run::new("flow", &layout(), t0());
        run.start_step(0, at(0)).unwrap();
        run.start_action(0, 1, at(0)).unwrap();
        run.complete_action(0, 1, "b", at(3)).unwrap();
        run.complete_step(0, at(3)).unwrap();

        assert!(run.conclude(at(5)));
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.steps[0].status, RunStatus::Idle);
        assert_eq!(run.steps[0].start_time, None);
        assert_eq!(run.steps[0].actions[1].status, RunStatus::Completed);
        assert_eq!(run.steps[0].actions[1].output, "b");
    }

    #[test]
    fn test_fork_of_running_run_idles_in_flight_nodes() {
        let mut run = Run::new("flow", &layout(), t0());
        run.start_step(0, at(0)).unwrap();
        run.start_action(0, 0, at(0)).unwrap();
        run.start_action(0, 1, at(0)).unwrap();
        run.complete_action(0, 0, "a", at(2)).unwrap();
        run.update_output(0, 1, "half", true).unwrap();

        let mut fork = run.fork(1, None, at(10)).unwrap();
        assert_eq!(fork.steps[0].status, RunStatus::Idle);
        assert_eq!(fork.steps[0].actions[0].status, RunStatus::Completed);
        assert_eq!(fork.steps[0].actions[0].output, "a");
        assert_eq!(fork.steps[0].actions[1].status, RunStatus::Idle);
        assert!(fork.steps[0].actions[1].output.is_empty());
        // Source keeps running.
        assert_eq!(run.steps[0].actions[1].status, RunStatus::Running);

        fork.start_step(1, at(11)).unwrap();
        fork.start_action(1, 0, at(11)).unwrap();
        fork.complete_action(1, 0, "c", at(15)).unwrap();
        assert!(fork.conclude(at(16)));
        assert!(fork
            .steps
            .iter()
            .flat_map(|s| std::iter::once(s.status).chain(s.actions.iter().map(|a| a.status)))
            .all(|status| status != RunStatus::Running));
        assert_eq!(fork.status, RunStatus::Completed);
    }

    #[test]
    fn test_conclude_ignores_untouched_steps() {
        let mut run = Run::new("flow", &layout(), t0());
        run.start_step(1, at(0)).unwrap();
        run.start_action(1, 0, at(0)).unwrap();
        run.complete_action(1, 0, "c", at(4)).unwrap();
        assert_eq!(run.status, RunStatus::Running);

        assert!(run.conclude(at(5)));
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.steps[0].status, RunStatus::Idle);
    }
}
