//! SSE-frame-to-`RunnerMessage` translation.
//!
//! One function, one table: every inbound frame either produces exactly
//! one `RunnerMessage` or is skipped. Anything not covered by a row
//! below — unknown event types, tool states other than
//! pending/running/completed/error — falls through to `None` and is
//! still delivered verbatim to `Observer::on_event`, just never to
//! `Observer::on_message`.

use super::types::{AgentServerEvent, Part, RunnerMessage};

#[must_use]
pub fn translate_event(event: &AgentServerEvent) -> Option<RunnerMessage> {
    match event.kind.as_str() {
        "message.part.updated" => translate_part(event),
        "message.completed" => Some(RunnerMessage::Complete {
            message_id: event.properties.message_id.clone(),
        }),
        "session.aborted" => Some(RunnerMessage::SessionAborted),
        _ => None,
    }
}

fn translate_part(event: &AgentServerEvent) -> Option<RunnerMessage> {
    let part = event.properties.part.as_ref()?;
    match part.kind.as_str() {
        "text" => Some(RunnerMessage::Text {
            content: part.text.clone().unwrap_or_default(),
        }),
        "reasoning" => Some(RunnerMessage::Reasoning {
            content: part.text.clone().unwrap_or_default(),
        }),
        "tool" => translate_tool(part),
        _ => None,
    }
}

fn translate_tool(part: &Part) -> Option<RunnerMessage> {
    let state = part.state.as_ref()?;
    let call_id = part.call_id.clone().unwrap_or_default();
    let name = part.tool.clone().unwrap_or_default();
    match state.status.as_str() {
        "pending" | "running" => Some(RunnerMessage::ToolCall {
            call_id,
            name,
            args: state.input.clone(),
        }),
        "completed" => Some(RunnerMessage::ToolResult {
            call_id,
            name,
            result: state.output.clone(),
            is_error: false,
        }),
        "error" => Some(RunnerMessage::ToolResult {
            call_id,
            name,
            result: state.output.clone(),
            is_error: true,
        }),
        _ => None,
    }
}
