//! Wire types for the agent-server protocol
//!
//! `AgentServerEvent` is the decoded `data: <json>` body of one SSE
//! frame: a top-level `type` discriminator plus a `properties` object
//! whose shape depends on that type. `RunnerMessage` is the *output* of
//! translation (`translate::translate_event`), not the wire shape —
//! see the translation table this mirrors.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A tool part's progress, nested under `Part` when `Part::kind == "tool"`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolState {
    pub status: String,
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub output: serde_json::Value,
}

/// One sub-unit of an agent message: a text chunk, a reasoning chunk,
/// or a tool invocation/result.
#[derive(Debug, Clone, Deserialize)]
pub struct Part {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(rename = "callID", default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub state: Option<ToolState>,
}

/// The `properties` object of a decoded SSE frame; which fields are
/// populated depends on the frame's `type`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventProperties {
    #[serde(default)]
    pub part: Option<Part>,
    #[serde(rename = "messageID", default)]
    pub message_id: Option<String>,
}

/// One decoded SSE frame, ready for translation. `raw` preserves the
/// whole frame body for `Observer::on_event`, which fires for every
/// frame regardless of whether it translates to a message.
#[derive(Debug, Clone)]
pub struct AgentServerEvent {
    pub kind: String,
    pub properties: EventProperties,
    pub raw: serde_json::Value,
}

/// Output of translating one `AgentServerEvent`. One variant per row of
/// the SSE translation table; delivered to `Observer::on_message`.
#[derive(Debug, Clone)]
pub enum RunnerMessage {
    Text {
        content: String,
    },
    Reasoning {
        content: String,
    },
    ToolCall {
        call_id: String,
        name: String,
        args: serde_json::Value,
    },
    ToolResult {
        call_id: String,
        name: String,
        result: serde_json::Value,
        is_error: bool,
    },
    Complete {
        message_id: Option<String>,
    },
    SessionAborted,
}

impl RunnerMessage {
    /// The text this message contributes to `accumulatedOutput`, if any.
    /// Only `Text` and `Reasoning` parts accumulate; everything else
    /// returns `None`.
    #[must_use]
    pub fn accumulable_text(&self) -> Option<&str> {
        match self {
            Self::Text { content } | Self::Reasoning { content } => Some(content.as_str()),
            _ => None,
        }
    }
}
