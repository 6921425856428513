//! Server-Sent Events (SSE) parsing for streaming completions
//!
//! Bytes arrive in arbitrary slices, so [`SSEParser`] buffers until it sees
//! a blank-line event boundary. [`response_to_sse_stream`] turns a
//! `reqwest::Response` into a stream of parsed events, and the [`openai`]
//! submodule extracts the text delta from each event.

use futures::{Stream, StreamExt};
use tracing::{debug, error};

use crate::llm::{LLMError, LLMResult};

/// SSE event structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SSEEvent {
    pub event_type: Option<String>,
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u32>,
}

/// SSE stream parser that converts bytes into SSE events
///
/// Raw bytes are buffered and only complete event blocks are decoded, so a
/// multi-byte character split across network chunks survives.
#[derive(Debug, Default)]
pub struct SSEParser {
    buffer: Vec<u8>,
}

impl SSEParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse bytes into SSE events
    pub fn parse_chunk(&mut self, chunk: &[u8]) -> LLMResult<Vec<SSEEvent>> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();

        while let Some((end, delimiter)) = find_boundary(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..end + delimiter).collect();
            let block = std::str::from_utf8(&block[..end])
                .map_err(|e| LLMError::Parse(format!("Invalid UTF-8 in SSE stream: {}", e)))?;

            if !block.trim().is_empty() {
                let event = Self::parse_event_block(&block.replace("\r\n", "\n"));
                if event.data.is_empty() && event.event_type.is_none() {
                    continue;
                }
                events.push(event);
            }
        }

        Ok(events)
    }

    /// Parse a single event block
    fn parse_event_block(block: &str) -> SSEEvent {
        let mut event_type = None;
        let mut data_lines = Vec::new();
        let mut id = None;
        let mut retry = None;

        for line in block.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(':') {
                continue; // Skip empty lines and comments
            }

            if let Some((field, value)) = line.split_once(':') {
                let value = value.trim_start();
                match field {
                    "event" => event_type = Some(value.to_string()),
                    "data" => data_lines.push(value.to_string()),
                    "id" => id = Some(value.to_string()),
                    "retry" => retry = value.parse().ok(),
                    _ => {} // Ignore unknown fields
                }
            } else {
                data_lines.push(line.to_string());
            }
        }

        SSEEvent {
            event_type,
            data: data_lines.join("\n"),
            id,
            retry,
        }
    }

    /// Check if there's remaining data in the buffer
    pub fn has_remaining_data(&self) -> bool {
        self.buffer.iter().any(|b| !b.is_ascii_whitespace())
    }
}

/// Position and length of the first blank-line boundary, `\n\n` or
/// `\r\n\r\n`.
fn find_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n");
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) if b < a => Some((b, 4)),
        (Some(a), _) => Some((a, 2)),
        (None, Some(b)) => Some((b, 4)),
        (None, None) => None,
    }
}

/// Convert a reqwest Response into an SSE event stream
pub fn response_to_sse_stream(
    response: reqwest::Response,
) -> impl Stream<Item = LLMResult<SSEEvent>> + Send + Unpin {
    let byte_stream = response.bytes_stream();
    let mut parser = SSEParser::new();

    Box::pin(
        byte_stream
            .map(move |chunk_result| match chunk_result {
                Ok(chunk) => parser.parse_chunk(&chunk),
                Err(e) => {
                    error!("SSE transport error: {}", e);
                    Err(LLMError::Network(e.to_string()))
                }
            })
            .flat_map(|events_result| {
                futures::stream::iter(match events_result {
                    Ok(events) => events.into_iter().map(Ok).collect::<Vec<_>>(),
                    Err(e) => vec![Err(e)],
                })
            }),
    )
}

/// OpenAI-specific SSE parsing
pub mod openai {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct OpenAIStreamChunk {
        #[serde(default)]
        pub choices: Vec<OpenAIStreamChoice>,
        #[serde(default)]
        pub error: Option<OpenAIStreamError>,
    }

    #[derive(Debug, Deserialize)]
    pub struct OpenAIStreamChoice {
        #[serde(default)]
        pub index: u32,
        #[serde(default)]
        pub delta: OpenAIDelta,
        pub finish_reason: Option<String>,
    }

    #[derive(Debug, Default, Deserialize)]
    pub struct OpenAIDelta {
        pub role: Option<String>,
        pub content: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct OpenAIStreamError {
        pub message: String,
    }

    /// Whether the event is the terminal `[DONE]` marker.
    pub fn is_done(event: &SSEEvent) -> bool {
        event.data.trim() == "[DONE]"
    }

    /// Extract the text delta carried by an OpenAI SSE event.
    ///
    /// Returns `Ok(None)` for keep-alives, role-only deltas and the `[DONE]`
    /// marker. An in-band `error` object becomes [`LLMError::Provider`].
    pub fn openai_event_to_text(event: &SSEEvent) -> LLMResult<Option<String>> {
        let data = event.data.trim();
        if data.is_empty() || data == "[DONE]" {
            return Ok(None);
        }

        let chunk: OpenAIStreamChunk = serde_json::from_str(data)
            .map_err(|e| LLMError::Parse(format!("Failed to parse OpenAI stream chunk: {}", e)))?;

        if let Some(err) = chunk.error {
            return Err(LLMError::Provider(err.message));
        }

        match chunk.choices.into_iter().next() {
            Some(choice) => {
                if let Some(reason) = &choice.finish_reason {
                    debug!("OpenAI stream finished: {}", reason);
                }
                Ok(choice.delta.content.filter(|c| !c.is_empty()))
            }
            None => Ok(None),
        }
    }
}
