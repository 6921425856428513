// Run store for flow executions

//! # Run Store
//!
//! Holds every [`Run`] keyed by id, plus a per-flow history in creation
//! order. All mutations go through the transition methods on [`Run`]; the
//! store adds the clock, the bookkeeping and event publication.
//!
//! ## Atomicity
//!
//! Each operation takes the write lock once, applies its whole transition
//! (including cascades) and releases it before any event is published.
//! No lock is ever held across an `.await`, so concurrent actions streaming
//! into the same run interleave at operation granularity only.
//!
//! ## Events
//!
//! After a mutation the store diffs node statuses before and after and
//! publishes one [`RunEventKind`] per change, so observers see cascades
//! (action -> step -> run) as separate events in the order they happened.
//!
//! ## History cap
//!
//! At most `max_runs_per_flow` runs are kept per flow. When the cap is
//! exceeded the oldest settled runs are evicted; runs still executing are
//! never dropped.
//!
//! ## Rust Learning Notes:
//!
//! `std::sync::RwLock` is enough here because no operation suspends while
//! holding it. A poisoned lock is recovered with `into_inner()`: every
//! transition validates before it writes, so a panic cannot leave a run
//! half-updated.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use crate::engine::events::{EventBus, RunEventKind};
use crate::models::{Run, RunStatus, StepLayout};
use crate::{PromptFlowError, Result};

#[derive(Default)]
struct RunIndex {
    runs: HashMap<String, Run>,
    /// Run ids per flow, oldest first.
    by_flow: HashMap<String, Vec<String>>,
}

/// Status of every node in a run, for diffing.
struct StatusSnapshot {
    run: RunStatus,
    steps: Vec<(RunStatus, Vec<RunStatus>)>,
}

impl StatusSnapshot {
    fn of(run: &Run) -> Self {
        Self {
            run: run.status,
            steps: run
                .steps
                .iter()
                .map(|s| (s.status, s.actions.iter().map(|a| a.status).collect()))
                .collect(),
        }
    }

    /// Events for every status that differs between `self` and `run`, in
    /// cascade order: actions, then their step, then the run.
    fn diff(&self, run: &Run) -> Vec<RunEventKind> {
        let mut events = Vec::new();
        for (step_index, (step, (old_step, old_actions))) in
            run.steps.iter().zip(&self.steps).enumerate()
        {
            if step.status != *old_step && step.status == RunStatus::Running {
                events.push(RunEventKind::StepStarted { step_index });
            }
            for (action_index, (action, old)) in step.actions.iter().zip(old_actions).enumerate() {
                if action.status == *old {
                    continue;
                }
                if action.status == RunStatus::Running {
                    events.push(RunEventKind::ActionStarted {
                        step_index,
                        action_index,
                    });
                } else if action.status.is_terminal() {
                    events.push(RunEventKind::ActionFinished {
                        step_index,
                        action_index,
                        status: action.status,
                        error: action.error.clone(),
                    });
                }
            }
            if step.status != *old_step && step.status.is_terminal() {
                events.push(RunEventKind::StepFinished {
                    step_index,
                    status: step.status,
                    duration_ms: step.duration_ms,
                });
            }
        }
        if run.status != self.run && run.status.is_terminal() {
            events.push(RunEventKind::RunFinished {
                status: run.status,
                duration_ms: run.duration_ms,
            });
        }
        events
    }
}

pub struct RunStore {
    index: RwLock<RunIndex>,
    events: Arc<EventBus>,
    max_runs_per_flow: usize,
}

impl RunStore {
    pub fn new(events: Arc<EventBus>, max_runs_per_flow: usize) -> Self {
        Self {
            index: RwLock::new(RunIndex::default()),
            events,
            max_runs_per_flow: max_runs_per_flow.max(1),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RunIndex> {
        self.index.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RunIndex> {
        self.index.write().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(&self, run: Run) {
        let run_id = run.id.clone();
        let flow_id = run.flow_id.clone();
        let version = run.version;

        let evicted = {
            let mut index = self.write();
            index.runs.insert(run_id.clone(), run);
            let RunIndex { runs, by_flow } = &mut *index;
            let history = by_flow.entry(flow_id.clone()).or_default();
            history.push(run_id.clone());

            let mut evicted = Vec::new();
            while history.len() > self.max_runs_per_flow {
                let oldest_settled = history.iter().position(|id| {
                    runs.get(id)
                        .map(|r| r.status.is_terminal())
                        .unwrap_or(true)
                });
                match oldest_settled {
                    Some(pos) => {
                        let id = history.remove(pos);
                        runs.remove(&id);
                        evicted.push(id);
                    }
                    None => break,
                }
            }
            evicted
        };

        if !evicted.is_empty() {
            debug!(flow_id = %flow_id, evicted = evicted.len(), "run history trimmed");
        }
        self.events
            .emit(&run_id, &flow_id, RunEventKind::RunStarted { version });
    }

    /// Apply `change` to one run and publish the resulting status events.
    fn mutate<T, F>(&self, run_id: &str, change: F) -> Result<T>
    where
        F: FnOnce(&mut Run) -> Result<T>,
    {
        let (value, flow_id, events) = {
            let mut index = self.write();
            let run = index
                .runs
                .get_mut(run_id)
                .ok_or_else(|| PromptFlowError::NotFound(format!("run {}", run_id)))?;
            let before = StatusSnapshot::of(run);
            let value = change(run)?;
            (value, run.flow_id.clone(), before.diff(run))
        };
        for kind in events {
            self.events.emit(run_id, &flow_id, kind);
        }
        Ok(value)
    }

    /// Create a version-1 run laid out from `layout`. Returns its id.
    pub fn start_run(&self, flow_id: &str, layout: &[StepLayout]) -> String {
        let run = Run::new(flow_id, layout, Utc::now());
        let id = run.id.clone();
        info!(run_id = %id, flow_id, steps = layout.len(), "run started");
        self.insert(run);
        id
    }

    /// Copy `run_id` for a targeted re-execution of one step, or of one
    /// action within it. Returns `None` when the source run or the target
    /// indices do not exist.
    pub fn clone_run(
        &self,
        run_id: &str,
        step_index: usize,
        action_index: Option<usize>,
    ) -> Option<String> {
        let source = self.get_run(run_id)?;
        let copy = match source.fork(step_index, action_index, Utc::now()) {
            Ok(copy) => copy,
            Err(e) => {
                debug!(run_id, error = %e, "clone skipped");
                return None;
            }
        };
        let id = copy.id.clone();
        info!(
            run_id = %id,
            source = run_id,
            version = copy.version,
            "run cloned"
        );
        self.insert(copy);
        Some(id)
    }

    /// Returns false when the run is already terminal.
    pub fn start_step_run(&self, run_id: &str, step_index: usize) -> Result<bool> {
        self.mutate(run_id, |run| run.start_step(step_index, Utc::now()))
    }

    pub fn complete_step_run(&self, run_id: &str, step_index: usize) -> Result<bool> {
        self.mutate(run_id, |run| run.complete_step(step_index, Utc::now()))
    }

    /// Returns false when the run is already terminal and the action was
    /// left untouched.
    pub fn start_action_run(&self, run_id: &str, step_index: usize, action_index: usize) -> Result<bool> {
        self.mutate(run_id, |run| {
            run.start_action(step_index, action_index, Utc::now())
        })
    }

    pub fn update_action_output(
        &self,
        run_id: &str,
        step_index: usize,
        action_index: usize,
        text: &str,
        append: bool,
    ) -> Result<()> {
        self.mutate(run_id, |run| {
            run.update_output(step_index, action_index, text, append)
        })?;
        if let Some(flow_id) = self.flow_of(run_id) {
            self.events.emit(
                run_id,
                &flow_id,
                RunEventKind::ActionOutput {
                    step_index,
                    action_index,
                    chunk: text.to_string(),
                },
            );
        }
        Ok(())
    }

    pub fn complete_action_run(
        &self,
        run_id: &str,
        step_index: usize,
        action_index: usize,
        output: &str,
    ) -> Result<bool> {
        self.mutate(run_id, |run| {
            run.complete_action(step_index, action_index, output, Utc::now())
        })
    }

    pub fn fail_action_run(
        &self,
        run_id: &str,
        step_index: usize,
        action_index: usize,
        error: &str,
    ) -> Result<bool> {
        self.mutate(run_id, |run| {
            run.fail_action(step_index, action_index, error, Utc::now())
        })
    }

    /// Returns false when the run had already settled.
    pub fn cancel_run(&self, run_id: &str) -> Result<bool> {
        let cancelled = self.mutate(run_id, |run| Ok(run.cancel(Utc::now())))?;
        if cancelled {
            info!(run_id, "run cancelled");
        }
        Ok(cancelled)
    }

    /// Force a run to `failed`, cancelling whatever is still running in it.
    pub fn fail_run(&self, run_id: &str) -> Result<bool> {
        self.mutate(run_id, |run| Ok(run.fail(Utc::now())))
    }

    pub fn finalize_run_if_settled(&self, run_id: &str) -> Result<bool> {
        self.mutate(run_id, |run| Ok(run.finalize_if_settled(Utc::now())))
    }

    /// Settle a run after a partial re-execution.
    pub fn conclude_run(&self, run_id: &str) -> Result<bool> {
        self.mutate(run_id, |run| Ok(run.conclude(Utc::now())))
    }

    pub fn clear_action_run(&self, run_id: &str, step_index: usize, action_index: usize) -> Result<()> {
        self.mutate(run_id, |run| run.clear_action(step_index, action_index))?;
        if let Some(flow_id) = self.flow_of(run_id) {
            self.events.emit(
                run_id,
                &flow_id,
                RunEventKind::ActionCleared {
                    step_index,
                    action_index,
                },
            );
        }
        Ok(())
    }

    /// Drop the history of one flow. Returns how many runs were removed.
    pub fn clear_runs(&self, flow_id: &str) -> usize {
        let mut index = self.write();
        let ids = index.by_flow.remove(flow_id).unwrap_or_default();
        for id in &ids {
            index.runs.remove(id);
        }
        ids.len()
    }

    /// Snapshot of a run.
    pub fn get_run(&self, run_id: &str) -> Option<Run> {
        self.read().runs.get(run_id).cloned()
    }

    pub fn run_status(&self, run_id: &str) -> Option<RunStatus> {
        self.read().runs.get(run_id).map(|r| r.status)
    }

    /// Runs of a flow, oldest first.
    pub fn runs_for_flow(&self, flow_id: &str) -> Vec<Run> {
        let index = self.read();
        index
            .by_flow
            .get(flow_id)
            .map(|ids| ids.iter().filter_map(|id| index.runs.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    pub fn latest_run_for_flow(&self, flow_id: &str) -> Option<Run> {
        let index = self.read();
        index
            .by_flow
            .get(flow_id)?
            .last()
            .and_then(|id| index.runs.get(id).cloned())
    }

    fn flow_of(&self, run_id: &str) -> Option<String> {
        self.read().runs.get(run_id).map(|r| r.flow_id.clone())
    }
}
