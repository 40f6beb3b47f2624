//! Context diff engine
//!
//! Maintains a running snapshot of the model's effective context (last-seen
//! tool schema plus last-seen message list) and emits events by diffing
//! canonical messages across intercepted calls.
//!
//! Diffs are line-based, not token- or structural-based: a line that merely
//! moved is reported as one removal plus one addition. The output is a
//! human audit trail, not a minimal edit script.

use crate::error::Result;
use crate::normalize::{mark_injected, normalize};
use crate::types::{CanonicalMessage, LlmCall, MessagePart, SequenceEvent, Source};
use similar::{ChangeTag, TextDiff};
use std::collections::HashSet;

// ============================================
// Rendering
// ============================================

/// Render one message to flat line-oriented text: one line per content line,
/// one line per tool call, each prefixed with the part and role tags.
pub fn render_message(message: &CanonicalMessage) -> String {
    let tag = format!("[{}:{}]", message.part.as_str(), message.role);
    let mut lines = Vec::new();

    for part in &message.content {
        for line in part.as_text().lines() {
            lines.push(format!("{} {}", tag, line));
        }
    }

    for call in message.tool_calls.iter().flatten() {
        let args = serde_json::Value::Object(call.arguments.clone());
        lines.push(format!("{} tool_call {}({})", tag, call.name, args));
    }

    lines.join("\n")
}

fn render_messages(messages: &[CanonicalMessage]) -> String {
    messages
        .iter()
        .map(render_message)
        .filter(|rendered| !rendered.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Line-based addition/removal delta between two texts
fn line_diff(old: &str, new: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    let mut delta = Vec::new();
    for change in diff.iter_all_changes() {
        let line = change.value().trim_end_matches('\n');
        match change.tag() {
            ChangeTag::Delete => delta.push(format!("- {}", line)),
            ChangeTag::Insert => delta.push(format!("+ {}", line)),
            ChangeTag::Equal => {}
        }
    }
    delta.join("\n")
}

// ============================================
// Tracker
// ============================================

/// Running context snapshot: the last-seen tool-schema text and the
/// last-seen ordered message list.
///
/// Scoped to one reconstruction pass over one conversation's call sequence;
/// discarded after use.
#[derive(Default)]
pub struct ContextTracker {
    tools_schema: String,
    messages: Vec<CanonicalMessage>,
}

impl ContextTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the snapshot from an earlier, now-superseded call without
    /// emitting events. Used when reconstructing only the new portion of a
    /// sequence appended after a previously known state.
    pub fn seed(&mut self, messages: Vec<CanonicalMessage>, tools_schema: String) {
        self.messages = messages;
        self.tools_schema = tools_schema;
    }

    /// Absorb a new request context.
    ///
    /// Emits at most one `context_change` for the tool schema and one for
    /// the message list; identical inputs emit nothing.
    pub fn update(
        &mut self,
        new_request_messages: Vec<CanonicalMessage>,
        new_tools_schema: String,
    ) -> Vec<SequenceEvent> {
        let mut events = Vec::new();

        if new_tools_schema != self.tools_schema {
            events.push(SequenceEvent::ContextChange {
                delta: line_diff(&self.tools_schema, &new_tools_schema),
            });
            self.tools_schema = new_tools_schema;
        }

        let old_rendering = render_messages(&self.messages);
        let new_rendering = render_messages(&new_request_messages);
        if old_rendering != new_rendering {
            events.push(SequenceEvent::ContextChange {
                delta: line_diff(&old_rendering, &new_rendering),
            });
        }
        self.messages = new_request_messages;

        events
    }

    /// Append response messages to the snapshot, one `message` event each.
    pub fn push_response(&mut self, response_messages: Vec<CanonicalMessage>) -> Vec<SequenceEvent> {
        let mut events = Vec::with_capacity(response_messages.len());
        for message in response_messages {
            events.push(SequenceEvent::Message {
                content: render_message(&message),
            });
            self.messages.push(message);
        }
        events
    }
}

// ============================================
// Sequence reconstruction
// ============================================

/// Result of reconstructing a call sequence.
///
/// `warnings` carries calls that could not be normalized (skip-and-flag:
/// a malformed call never aborts the rest of the sequence, and never
/// disappears silently).
#[derive(Debug, Default)]
pub struct Reconstruction {
    pub events: Vec<SequenceEvent>,
    pub warnings: Vec<String>,
}

/// Normalize one call into (request-part messages, response-part messages,
/// tool schema), with injected flags applied.
fn normalize_call(
    call: &LlmCall,
    source: Source,
    visible_texts: &HashSet<String>,
) -> Result<(Vec<CanonicalMessage>, Vec<CanonicalMessage>, String)> {
    let (mut messages, tools_schema) = normalize(
        call.request_body.as_str(),
        call.response_body.as_ref().map(|b| b.as_str()),
        source,
    )?;
    mark_injected(&mut messages, visible_texts);

    let (request, response): (Vec<_>, Vec<_>) = messages
        .into_iter()
        .partition(|m| m.part == MessagePart::Request);
    Ok((request, response, tools_schema))
}

/// Reconstruct the ordered event sequence for a list of calls in store order.
///
/// An optional `prior_baseline` call seeds the snapshot before the first
/// update; no events are ever emitted for the baseline itself.
pub fn reconstruct_sequence(
    calls: &[LlmCall],
    prior_baseline: Option<&LlmCall>,
    source: Source,
    visible_texts: &HashSet<String>,
) -> Reconstruction {
    let mut tracker = ContextTracker::new();
    let mut result = Reconstruction::default();

    if let Some(baseline) = prior_baseline {
        match normalize_call(baseline, source, visible_texts) {
            Ok((mut messages, response, tools_schema)) => {
                messages.extend(response);
                tracker.seed(messages, tools_schema);
            }
            Err(e) => {
                tracing::warn!(call_id = %baseline.id, error = %e, "Skipping unparsable baseline call");
                result
                    .warnings
                    .push(format!("baseline call {}: {}", baseline.id, e));
            }
        }
    }

    for call in calls {
        let (request, response, tools_schema) =
            match normalize_call(call, source, visible_texts) {
                Ok(parts) => parts,
                Err(e) => {
                    tracing::warn!(call_id = %call.id, error = %e, "Skipping unparsable call");
                    result.warnings.push(format!("call {}: {}", call.id, e));
                    continue;
                }
            };

        result.events.extend(tracker.update(request, tools_schema));
        result.events.extend(tracker.push_response(response));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentPart, RawBody};
    use chrono::Utc;

    fn msg(part: MessagePart, role: &str, text: &str) -> CanonicalMessage {
        CanonicalMessage {
            part,
            message_id: None,
            role: role.to_string(),
            content: vec![ContentPart::text(text)],
            tool_calls: None,
            injected: false,
        }
    }

    fn call(request: &str, response: Option<&str>) -> LlmCall {
        LlmCall {
            id: uuid::Uuid::new_v4().to_string(),
            ts: Utc::now(),
            path: "api/v0/chat/completions".to_string(),
            method: "POST".to_string(),
            request_body: RawBody::new(request),
            response_status: response.map(|_| 200),
            response_body: response.map(RawBody::new),
            duration_ms: response.map(|_| 10),
            turn_id: None,
        }
    }

    #[test]
    fn test_render_message_lines() {
        let message = msg(MessagePart::Request, "user", "line one\nline two");
        assert_eq!(
            render_message(&message),
            "[request:user] line one\n[request:user] line two"
        );
    }

    #[test]
    fn test_render_tool_call_deterministic() {
        let mut arguments = serde_json::Map::new();
        arguments.insert("q".to_string(), serde_json::json!("rust"));
        arguments.insert("n".to_string(), serde_json::json!(3));
        let message = CanonicalMessage {
            part: MessagePart::Response,
            message_id: None,
            role: "assistant".to_string(),
            content: vec![],
            tool_calls: Some(vec![crate::types::ToolCall {
                id: "c1".to_string(),
                call_type: "function".to_string(),
                name: "web_search".to_string(),
                arguments,
            }]),
            injected: false,
        };
        // Map keys render sorted, so the output never depends on insert order
        assert_eq!(
            render_message(&message),
            r#"[response:assistant] tool_call web_search({"n":3,"q":"rust"})"#
        );
    }

    #[test]
    fn test_first_update_emits_context() {
        let mut tracker = ContextTracker::new();
        let events = tracker.update(
            vec![msg(MessagePart::Request, "system", "PROMPT")],
            "[]".to_string(),
        );
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], SequenceEvent::ContextChange { delta } if delta == "+ []"));
        assert!(matches!(
            &events[1],
            SequenceEvent::ContextChange { delta } if delta == "+ [request:system] PROMPT"
        ));
    }

    #[test]
    fn test_update_idempotent() {
        let mut tracker = ContextTracker::new();
        let messages = vec![msg(MessagePart::Request, "user", "Hello")];
        tracker.update(messages.clone(), "[]".to_string());
        let events = tracker.update(messages, "[]".to_string());
        assert!(events.is_empty());
    }

    #[test]
    fn test_schema_change_emits_delta() {
        let mut tracker = ContextTracker::new();
        tracker.update(vec![], "tools: a".to_string());
        let events = tracker.update(vec![], "tools: b".to_string());
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            SequenceEvent::ContextChange { delta } if delta == "- tools: a\n+ tools: b"
        ));
    }

    #[test]
    fn test_moved_line_is_removal_plus_addition() {
        let delta = line_diff("a\nb\nc", "b\nc\na");
        assert!(delta.contains("- a"));
        assert!(delta.contains("+ a"));
    }

    #[test]
    fn test_push_response_emits_message_events() {
        let mut tracker = ContextTracker::new();
        tracker.update(vec![msg(MessagePart::Request, "user", "Hi")], "[]".to_string());
        let events =
            tracker.push_response(vec![msg(MessagePart::Response, "assistant", "Hello!")]);
        assert_eq!(
            events,
            vec![SequenceEvent::Message {
                content: "[response:assistant] Hello!".to_string()
            }]
        );

        // The response is now part of the snapshot: re-sending the same
        // request context diffs against request + response.
        let events = tracker.update(vec![msg(MessagePart::Request, "user", "Hi")], "[]".to_string());
        assert_eq!(events.len(), 1);
    }

    const REQ_1: &str = r#"{"messages": [{"role": "system", "content": "P"}, {"role": "user", "content": "Hello"}]}"#;
    const RESP_1: &str = r#"{"id": "r1", "choices": [{"message": {"role": "assistant", "content": "Hi"}}]}"#;
    const REQ_2: &str = r#"{"messages": [{"role": "system", "content": "P"}, {"role": "user", "content": "Hello"}, {"role": "assistant", "content": "Hi"}, {"role": "user", "content": "More"}]}"#;
    const RESP_2: &str = r#"{"id": "r2", "choices": [{"message": {"role": "assistant", "content": "Sure"}}]}"#;

    #[test]
    fn test_reconstruct_sequence_deterministic() {
        let calls = vec![call(REQ_1, Some(RESP_1)), call(REQ_2, Some(RESP_2))];
        let visible = HashSet::new();

        let first = reconstruct_sequence(&calls, None, Source::Plain, &visible);
        let second = reconstruct_sequence(&calls, None, Source::Plain, &visible);
        assert_eq!(
            serde_json::to_string(&first.events).unwrap(),
            serde_json::to_string(&second.events).unwrap()
        );
        assert!(first.warnings.is_empty());

        // Two responses, so exactly two message events
        let message_count = first
            .events
            .iter()
            .filter(|e| matches!(e, SequenceEvent::Message { .. }))
            .count();
        assert_eq!(message_count, 2);
    }

    #[test]
    fn test_baseline_seeds_without_events() {
        let baseline = call(REQ_1, Some(RESP_1));
        let next = call(REQ_2, Some(RESP_2));
        let visible = HashSet::new();

        let result =
            reconstruct_sequence(std::slice::from_ref(&next), Some(&baseline), Source::Plain, &visible);

        // No events for the baseline itself; the next call diffs against it
        let full = reconstruct_sequence(
            &[baseline.clone(), next],
            None,
            Source::Plain,
            &visible,
        );
        let baseline_only =
            reconstruct_sequence(std::slice::from_ref(&baseline), None, Source::Plain, &visible);
        assert_eq!(
            result.events.len(),
            full.events.len() - baseline_only.events.len()
        );
    }

    #[test]
    fn test_malformed_call_skipped_and_flagged() {
        let bad = call(
            r#"{"messages": [{"role": "assistant", "content": null, "tool_calls": [
                {"id": "c", "type": "function", "function": {"name": "t", "arguments": "{bad"}}]}]}"#,
            None,
        );
        let good = call(REQ_1, Some(RESP_1));
        let visible = HashSet::new();

        let result = reconstruct_sequence(&[bad, good], None, Source::Plain, &visible);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("malformed tool arguments"));
        // The good call still produced its events
        assert!(result
            .events
            .iter()
            .any(|e| matches!(e, SequenceEvent::Message { .. })));
    }

    #[test]
    fn test_incomplete_call_contributes_context_only() {
        let pending = call(REQ_1, None);
        let visible = HashSet::new();
        let result = reconstruct_sequence(&[pending], None, Source::Plain, &visible);
        assert!(result
            .events
            .iter()
            .all(|e| matches!(e, SequenceEvent::ContextChange { .. })));
    }
}
