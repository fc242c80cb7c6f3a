//! Server-sent-event plumbing for the streaming strategy.
//!
//! [`SseLineBuffer`] turns arbitrary byte chunks into complete lines, and
//! [`BlockAssembler`] folds decoded Messages API events into content blocks.
//! One assembler lives for exactly one provider call.

use folio_core::error::ProviderError;
use folio_core::message::ContentBlock;
use folio_core::provider::{ProviderChunk, StopReason, TurnResponse, Usage};
use folio_core::tool::ToolInput;
use tracing::{debug, trace, warn};

/// Splits a byte stream into lines. Bytes are buffered until a newline so a
/// multi-byte character split across chunks is decoded intact.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and return every line completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            lines.push(line.trim_end_matches('\r').to_string());
        }
        lines
    }

    /// Whatever is left once the stream closes without a trailing newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.pending).trim_end().to_string();
        self.pending.clear();
        (!rest.is_empty()).then_some(rest)
    }
}

/// A decoded `data:` line.
#[derive(Debug, Clone, PartialEq)]
pub enum SseData {
    /// The literal `[DONE]` sentinel
    Done,
    Event(serde_json::Value),
}

/// Decode one SSE line. Comments, `event:` lines and blank lines yield `None`;
/// so does a `data:` payload that is not valid JSON.
pub fn parse_data_line(line: &str) -> Option<SseData> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(SseData::Done);
    }
    match serde_json::from_str(data) {
        Ok(value) => Some(SseData::Event(value)),
        Err(e) => {
            trace!(error = %e, data = %data, "Ignoring unparseable SSE payload");
            None
        }
    }
}

/// Map a Messages API `stop_reason` onto [`StopReason`].
pub fn map_stop_reason(reason: &str) -> StopReason {
    match reason {
        "end_turn" | "stop_sequence" => StopReason::EndTurn,
        "tool_use" => StopReason::ToolUse,
        "max_tokens" => StopReason::MaxTokens,
        other => StopReason::Other(other.to_string()),
    }
}

/// Parse an accumulated tool-input buffer. Anything other than a JSON object
/// becomes an empty input.
pub fn parse_tool_input(tool_name: &str, buffer: &str) -> ToolInput {
    let trimmed = buffer.trim();
    if trimmed.is_empty() {
        return ToolInput::new();
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Object(map)) => map,
        Ok(other) => {
            warn!(
                tool = tool_name,
                kind = %json_kind(&other),
                "Tool input is not an object, using {{}}"
            );
            ToolInput::new()
        }
        Err(e) => {
            warn!(
                tool = tool_name,
                error = %e,
                bytes = trimmed.len(),
                "Malformed tool input JSON, using {{}}"
            );
            ToolInput::new()
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// The block currently receiving deltas.
#[derive(Debug)]
enum OpenBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
        signature: String,
    },
    ToolUse {
        id: String,
        name: String,
        partial_json: String,
        initial_input: ToolInput,
    },
}

impl OpenBlock {
    fn close(self) -> Option<ContentBlock> {
        match self {
            Self::Text { text } => (!text.is_empty()).then_some(ContentBlock::Text { text }),
            Self::Thinking {
                thinking,
                signature,
            } => Some(ContentBlock::Thinking {
                thinking,
                signature: (!signature.is_empty()).then_some(signature),
            }),
            Self::ToolUse {
                id,
                name,
                partial_json,
                initial_input,
            } => {
                let input = if partial_json.trim().is_empty() {
                    initial_input
                } else {
                    parse_tool_input(&name, &partial_json)
                };
                Some(ContentBlock::ToolUse { id, name, input })
            }
        }
    }
}

/// Per-call accumulator for Messages API stream events.
///
/// At most one block is open at a time; it is closed on
/// `content_block_stop`, on the next `content_block_start`, or by
/// [`BlockAssembler::finish`].
#[derive(Debug, Default)]
pub struct BlockAssembler {
    content: Vec<ContentBlock>,
    open: Option<OpenBlock>,
    stop_reason: Option<StopReason>,
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
    finished: bool,
}

impl BlockAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `message_stop` has been seen.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Name and buffered byte count of the tool-use block still accumulating.
    pub fn open_tool(&self) -> Option<(&str, usize)> {
        match &self.open {
            Some(OpenBlock::ToolUse {
                name, partial_json, ..
            }) => Some((name.as_str(), partial_json.len())),
            _ => None,
        }
    }

    /// Fold one decoded event. Returns the chunk to forward to the caller,
    /// if the event produced one.
    pub fn handle(
        &mut self,
        event: &serde_json::Value,
    ) -> std::result::Result<Option<ProviderChunk>, ProviderError> {
        let event_type = event["type"].as_str().unwrap_or("");

        match event_type {
            "message_start" => {
                let usage = &event["message"]["usage"];
                if let Some(input) = usage["input_tokens"].as_u64() {
                    self.input_tokens = Some(input as u32);
                }
                if let Some(output) = usage["output_tokens"].as_u64() {
                    self.output_tokens = Some(output as u32);
                }
                Ok(None)
            }
            "content_block_start" => {
                self.close_open();
                let block = &event["content_block"];
                match block["type"].as_str().unwrap_or("") {
                    "text" => {
                        let text = block["text"].as_str().unwrap_or("").to_string();
                        let chunk = (!text.is_empty()).then(|| ProviderChunk::TextDelta {
                            text: text.clone(),
                        });
                        self.open = Some(OpenBlock::Text { text });
                        Ok(chunk)
                    }
                    "thinking" => {
                        self.open = Some(OpenBlock::Thinking {
                            thinking: block["thinking"].as_str().unwrap_or("").to_string(),
                            signature: block["signature"].as_str().unwrap_or("").to_string(),
                        });
                        Ok(None)
                    }
                    "tool_use" => {
                        let id = block["id"].as_str().unwrap_or("").to_string();
                        let name = block["name"].as_str().unwrap_or("").to_string();
                        let initial_input = block["input"].as_object().cloned().unwrap_or_default();
                        self.open = Some(OpenBlock::ToolUse {
                            id: id.clone(),
                            name: name.clone(),
                            partial_json: String::new(),
                            initial_input,
                        });
                        Ok(Some(ProviderChunk::ToolUseStarted { id, name }))
                    }
                    other => {
                        debug!(block_type = other, "Skipping unsupported content block");
                        Ok(None)
                    }
                }
            }
            "content_block_delta" => Ok(self.apply_delta(&event["delta"])),
            "content_block_stop" => {
                self.close_open();
                Ok(None)
            }
            "message_delta" => {
                if let Some(reason) = event["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(map_stop_reason(reason));
                }
                let usage = &event["usage"];
                if let Some(output) = usage["output_tokens"].as_u64() {
                    self.output_tokens = Some(output as u32);
                }
                if let Some(input) = usage["input_tokens"].as_u64() {
                    self.input_tokens = Some(input as u32);
                }
                Ok(None)
            }
            "message_stop" => {
                self.close_open();
                self.finished = true;
                Ok(None)
            }
            "error" => {
                let error = &event["error"];
                let kind = error["type"].as_str().unwrap_or("error");
                let message = error["message"].as_str().unwrap_or("unknown stream error");
                let status_code = match kind {
                    "overloaded_error" => 529,
                    "rate_limit_error" => 429,
                    "authentication_error" => 401,
                    "not_found_error" => 404,
                    "invalid_request_error" => 400,
                    _ => 500,
                };
                Err(ProviderError::ApiError {
                    status_code,
                    message: format!("{kind}: {message}"),
                })
            }
            _ => Ok(None),
        }
    }

    fn apply_delta(&mut self, delta: &serde_json::Value) -> Option<ProviderChunk> {
        let delta_type = delta["type"].as_str().unwrap_or("");
        match (delta_type, self.open.as_mut()) {
            ("text_delta", Some(OpenBlock::Text { text })) => {
                let piece = delta["text"].as_str()?;
                text.push_str(piece);
                Some(ProviderChunk::TextDelta {
                    text: piece.to_string(),
                })
            }
            ("thinking_delta", Some(OpenBlock::Thinking { thinking, .. })) => {
                let piece = delta["thinking"].as_str()?;
                thinking.push_str(piece);
                Some(ProviderChunk::ThinkingDelta {
                    thinking: piece.to_string(),
                })
            }
            ("signature_delta", Some(OpenBlock::Thinking { signature, .. })) => {
                signature.push_str(delta["signature"].as_str()?);
                None
            }
            ("input_json_delta", Some(OpenBlock::ToolUse { partial_json, .. })) => {
                partial_json.push_str(delta["partial_json"].as_str()?);
                None
            }
            (other, _) => {
                trace!(delta_type = other, "Delta does not match the open block, ignoring");
                None
            }
        }
    }

    fn close_open(&mut self) {
        if let Some(block) = self.open.take().and_then(OpenBlock::close) {
            self.content.push(block);
        }
    }

    /// Close whatever is still open and produce the canonical response.
    ///
    /// Works whether or not `message_stop` was seen; a missing stop reason
    /// is inferred from the assembled blocks.
    pub fn finish(mut self) -> TurnResponse {
        self.close_open();
        let stop_reason = self.stop_reason.take().unwrap_or_else(|| {
            if self.content.iter().any(ContentBlock::is_tool_use) {
                StopReason::ToolUse
            } else {
                StopReason::EndTurn
            }
        });
        let usage = match (self.input_tokens, self.output_tokens) {
            (None, None) => None,
            (input, output) => Some(Usage::new(input.unwrap_or(0), output.unwrap_or(0))),
        };
        TurnResponse {
            content: self.content,
            stop_reason,
            usage,
        }
    }
}
