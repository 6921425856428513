// Run event bus

//! # Event System
//!
//! Every state change the run store applies is published here as a
//! [`RunEvent`]. Observers (the CLI, tests, anything rendering live
//! progress) subscribe to a broadcast channel and receive events in the
//! order they were applied.
//!
//! Slow subscribers that fall more than the channel capacity behind lose the
//! oldest events; publishing never blocks the runner.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::trace;

use crate::models::RunStatus;

/// Events buffered per subscriber before the oldest are dropped.
const CHANNEL_CAPACITY: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEventKind {
    RunStarted {
        version: u32,
    },
    StepStarted {
        step_index: usize,
    },
    StepFinished {
        step_index: usize,
        status: RunStatus,
        duration_ms: Option<i64>,
    },
    ActionStarted {
        step_index: usize,
        action_index: usize,
    },
    /// A streamed chunk was applied to the action's output.
    ActionOutput {
        step_index: usize,
        action_index: usize,
        chunk: String,
    },
    ActionFinished {
        step_index: usize,
        action_index: usize,
        status: RunStatus,
        error: Option<String>,
    },
    RunFinished {
        status: RunStatus,
        duration_ms: Option<i64>,
    },
    ActionCleared {
        step_index: usize,
        action_index: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunEvent {
    pub run_id: String,
    pub flow_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: RunEventKind,
}

/// Broadcast hub for [`RunEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RunEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish to every current subscriber. Having none is not an error.
    pub fn publish(&self, event: RunEvent) {
        trace!(run_id = %event.run_id, kind = ?event.kind, "run event");
        let _ = self.sender.send(event);
    }

    pub fn emit(&self, run_id: &str, flow_id: &str, kind: RunEventKind) {
        self.publish(RunEvent {
            run_id: run_id.to_string(),
            flow_id: flow_id.to_string(),
            timestamp: Utc::now(),
            kind,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }

    /// Subscription as a `Stream`. Lagged notices surface as `Err` items.
    pub fn stream(&self) -> BroadcastStream<RunEvent> {
        BroadcastStream::new(self.sender.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
