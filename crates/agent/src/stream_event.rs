//! Agent-level streaming events.
//!
//! `AgentEvent` is the only thing a run exposes to its caller. The type
//! names are a wire vocabulary other layers depend on:
//! - `text`         — assistant text, forwarded as it streams
//! - `thinking`     — reasoning trace, forwarded as it streams
//! - `tool_call`    — a tool is about to run
//! - `tool_result`  — a tool finished
//! - `agent_spawn`  — a sub-agent is about to run
//! - `agent_result` — a sub-agent finished
//! - `error`        — the run failed; always terminal
//! - `done`         — the run finished; always terminal

use folio_core::message::Message;
use folio_core::provider::Usage;
use folio_core::tool::ToolInput;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Text { text: String },

    Thinking { thinking: String },

    ToolCall {
        id: String,
        name: String,
        input: ToolInput,
    },

    ToolResult {
        id: String,
        name: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    AgentSpawn {
        id: String,
        task: String,
        depth: usize,
    },

    AgentResult {
        id: String,
        success: bool,
        output: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// The run failed. `messages` holds whatever the run appended before it
    /// failed so the caller can still persist it.
    Error {
        message: String,
        #[serde(default)]
        messages: Vec<Message>,
    },

    /// The run finished. `messages` holds everything the run appended.
    Done {
        iterations: usize,
        tool_calls_made: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
        #[serde(default)]
        messages: Vec<Message>,
    },
}

impl AgentEvent {
    /// Wire name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Thinking { .. } => "thinking",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::AgentSpawn { .. } => "agent_spawn",
            Self::AgentResult { .. } => "agent_result",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
        }
    }

    /// `error` and `done` end the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Done { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization_text() {
        let event = AgentEvent::Text {
            text: "Hello".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"text""#));
        assert!(json.contains(r#""text":"Hello""#));
    }

    #[test]
    fn event_serialization_tool_call() {
        let mut input = ToolInput::new();
        input.insert("path".into(), serde_json::json!("main.tex"));
        let event = AgentEvent::ToolCall {
            id: "call_1".into(),
            name: "compile_latex".into(),
            input,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool_call""#));
        assert!(json.contains(r#""name":"compile_latex""#));
    }

    #[test]
    fn event_serialization_done() {
        let event = AgentEvent::Done {
            iterations: 2,
            tool_calls_made: 1,
            usage: Some(Usage::new(10, 20)),
            messages: vec![Message::assistant_text("ok")],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"done""#));
        assert!(json.contains(r#""iterations":2"#));
        assert!(json.contains(r#""total_tokens":30"#));
    }

    #[test]
    fn event_type_names() {
        let cases = [
            (AgentEvent::Text { text: "x".into() }, "text"),
            (
                AgentEvent::Thinking {
                    thinking: "x".into(),
                },
                "thinking",
            ),
            (
                AgentEvent::ToolCall {
                    id: "a".into(),
                    name: "b".into(),
                    input: ToolInput::new(),
                },
                "tool_call",
            ),
            (
                AgentEvent::ToolResult {
                    id: "a".into(),
                    name: "b".into(),
                    success: true,
                    output: None,
                    error: None,
                },
                "tool_result",
            ),
            (
                AgentEvent::AgentSpawn {
                    id: "a".into(),
                    task: "t".into(),
                    depth: 1,
                },
                "agent_spawn",
            ),
            (
                AgentEvent::AgentResult {
                    id: "a".into(),
                    success: true,
                    output: String::new(),
                    error: None,
                },
                "agent_result",
            ),
            (
                AgentEvent::Error {
                    message: "x".into(),
                    messages: vec![],
                },
                "error",
            ),
            (
                AgentEvent::Done {
                    iterations: 0,
                    tool_calls_made: 0,
                    usage: None,
                    messages: vec![],
                },
                "done",
            ),
        ];
        for (event, name) in cases {
            assert_eq!(event.event_type(), name);
            assert_eq!(event.is_terminal(), name == "error" || name == "done");
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], name);
        }
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"error","message":"boom"}"#;
        let event: AgentEvent = serde_json::from_str(json).unwrap();
        assert!(event.is_terminal());
        match event {
            AgentEvent::Error { message, messages } => {
                assert_eq!(message, "boom");
                assert!(messages.is_empty());
            }
            _ => panic!("Wrong variant"),
        }
    }
}
