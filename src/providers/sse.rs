//! Server-sent event parsing for streamed chat completions
//!
//! The provider sends one JSON delta per `data:` line and a literal
//! `data: [DONE]` at the end. Tool calls arrive in pieces keyed by index;
//! `ToolCallAssembler` stitches them back together.

use serde::Deserialize;
use std::collections::BTreeMap;

use crate::dialogue::ToolCall;
use crate::error::{VoiceError, VoiceResult};

const DONE: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Text(String),
    ToolDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    },
    /// `[DONE]` or a finish reason
    Done,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: ChoiceDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChoiceDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

/// Parse one line of the event stream
///
/// Blank lines, comments and non-data fields yield nothing.
pub fn parse_sse_line(line: &str) -> VoiceResult<Vec<SseEvent>> {
    let line = line.trim_end();
    let Some(payload) = line.strip_prefix("data:") else {
        return Ok(Vec::new());
    };
    let payload = payload.trim_start();
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    if payload == DONE {
        return Ok(vec![SseEvent::Done]);
    }

    let delta: Delta = serde_json::from_str(payload)
        .map_err(|e| VoiceError::Generation(format!("unparseable stream delta: {}", e)))?;

    let mut events = Vec::new();
    let Some(choice) = delta.choices.into_iter().next() else {
        return Ok(events);
    };
    if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
        events.push(SseEvent::Text(text));
    }
    for call in choice.delta.tool_calls.unwrap_or_default() {
        let (name, arguments) = match call.function {
            Some(f) => (f.name, f.arguments),
            None => (None, None),
        };
        events.push(SseEvent::ToolDelta {
            index: call.index,
            id: call.id,
            name,
            arguments,
        });
    }
    if choice.finish_reason.is_some() {
        events.push(SseEvent::Done);
    }
    Ok(events)
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulates streamed tool-call fragments by index
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    calls: BTreeMap<usize, PartialCall>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, index: usize, id: Option<String>, name: Option<String>, arguments: Option<String>) {
        let call = self.calls.entry(index).or_default();
        if let Some(id) = id {
            call.id = id;
        }
        if let Some(name) = name {
            call.name.push_str(&name);
        }
        if let Some(arguments) = arguments {
            call.arguments.push_str(&arguments);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Completed calls in index order; nameless fragments are dropped
    pub fn finish(&mut self) -> Vec<ToolCall> {
        std::mem::take(&mut self.calls)
            .into_iter()
            .filter(|(_, call)| !call.name.is_empty())
            .map(|(index, call)| ToolCall {
                id: if call.id.is_empty() {
                    format!("call_{}", index)
                } else {
                    call.id
                },
                name: call.name,
                arguments: if call.arguments.trim().is_empty() {
                    "{}".to_string()
                } else {
                    call.arguments
                },
            })
            .collect()
    }
}
