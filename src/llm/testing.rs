//! Scripted in-memory completion client for tests.
//!
//! Replies are keyed by model name, so a test gives each action its own
//! model id and scripts what that "model" streams back.

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use crate::llm::{
    ChatCompletion, ChatCompletionClient, ChatRequest, LLMError, LLMResult, ModelInfo, TextStream,
};

/// Pause before each streamed chunk so durations are measurable.
const CHUNK_DELAY: Duration = Duration::from_millis(5);

/// Handles for a reply that blocks until the test releases it.
#[derive(Clone, Default)]
pub struct Gate {
    pub started: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[derive(Clone)]
pub enum ScriptedReply {
    /// Stream these chunks, then end.
    Chunks(Vec<String>),
    /// Reject the call before streaming anything.
    Fail(LLMError),
    /// Stream these chunks, then yield an error.
    FailMidStream(Vec<String>, LLMError),
    /// Signal `started`, wait for `release`, then stream the chunks.
    Gated(Gate, Vec<String>),
}

impl ScriptedReply {
    pub fn chunks(chunks: &[&str]) -> Self {
        ScriptedReply::Chunks(chunks.iter().map(|c| c.to_string()).collect())
    }

    pub fn text(text: &str) -> Self {
        Self::chunks(&[text])
    }

    pub fn gated(chunks: &[&str]) -> (Self, Gate) {
        let gate = Gate::default();
        let reply = ScriptedReply::Gated(gate.clone(), chunks.iter().map(|c| c.to_string()).collect());
        (reply, gate)
    }
}

#[derive(Default)]
pub struct ScriptedClient {
    replies: Mutex<HashMap<String, ScriptedReply>>,
    requests: Mutex<Vec<ChatRequest>>,
    models: Vec<ModelInfo>,
    models_error: Option<LLMError>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_models(mut self, ids: &[&str]) -> Self {
        self.models = ids
            .iter()
            .map(|id| ModelInfo {
                id: id.to_string(),
                owned_by: None,
            })
            .collect();
        self
    }

    pub fn with_models_error(mut self, err: LLMError) -> Self {
        self.models_error = Some(err);
        self
    }

    pub fn script(&self, model: &str, reply: ScriptedReply) {
        self.replies
            .lock()
            .unwrap()
            .insert(model.to_string(), reply);
    }

    /// Every request received, in arrival order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_for(&self, model: &str) -> Option<ChatRequest> {
        self.requests().into_iter().find(|r| r.model == model)
    }

    fn record(&self, request: &ChatRequest) -> ScriptedReply {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .get(&request.model)
            .cloned()
            .unwrap_or_else(|| ScriptedReply::text("ok"))
    }
}

fn delayed(chunks: Vec<String>) -> impl futures::Stream<Item = LLMResult<String>> + Send {
    futures::stream::iter(chunks).then(|chunk| async move {
        tokio::time::sleep(CHUNK_DELAY).await;
        Ok(chunk)
    })
}

#[async_trait]
impl ChatCompletionClient for ScriptedClient {
    async fn chat_completion(&self, request: &ChatRequest) -> LLMResult<ChatCompletion> {
        let content = match self.record(request) {
            ScriptedReply::Chunks(chunks) => chunks.concat(),
            ScriptedReply::Fail(err) | ScriptedReply::FailMidStream(_, err) => return Err(err),
            ScriptedReply::Gated(gate, chunks) => {
                gate.started.notify_one();
                gate.release.notified().await;
                chunks.concat()
            }
        };
        Ok(ChatCompletion {
            model: request.model.clone(),
            content,
        })
    }

    async fn chat_completion_stream(&self, request: &ChatRequest) -> LLMResult<TextStream> {
        match self.record(request) {
            ScriptedReply::Chunks(chunks) => Ok(Box::pin(delayed(chunks))),
            ScriptedReply::Fail(err) => {
                tokio::time::sleep(CHUNK_DELAY).await;
                Err(err)
            }
            ScriptedReply::FailMidStream(chunks, err) => Ok(Box::pin(
                delayed(chunks).chain(futures::stream::once(async move { Err(err) })),
            )),
            ScriptedReply::Gated(gate, chunks) => {
                gate.started.notify_one();
                gate.release.notified().await;
                Ok(Box::pin(delayed(chunks)))
            }
        }
    }

    async fn list_models(&self) -> LLMResult<Vec<ModelInfo>> {
        match &self.models_error {
            Some(err) => Err(err.clone()),
            None => Ok(self.models.clone()),
        }
    }
}
