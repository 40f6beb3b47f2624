//! Message normalizer
//!
//! Parses raw provider request/response bodies into [`CanonicalMessage`]s.
//!
//! # Error Handling
//!
//! - **Unsupported content modalities** (images etc.) are dropped by design;
//!   only `text`-typed parts survive.
//! - **Malformed tool-call argument JSON** is a hard failure
//!   ([`Error::MalformedToolArguments`]), never a silent drop.
//!
//! # Backend post-processing
//!
//! Some agent backends smuggle the visible reply inside a tool call. That
//! convention is backend-specific, so it is dispatched through the
//! [`SourceAdapter`] strategy keyed on [`Source`]; adding a backend means
//! adding an adapter, not touching the parser.

use crate::error::{Error, Result};
use crate::types::{
    CanonicalMessage, ContentPart, MessagePart, Source, ToolCall, VisibleMessage,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;

// ============================================
// Raw wire types (serde deserialization)
// ============================================

/// Provider chat-completion request body.
///
/// Uses `#[serde(default)]` liberally: bodies come from arbitrary backends
/// and missing fields should degrade, not fail.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawRequest {
    messages: Vec<RawMessage>,
    tools: Value,
}

/// Provider chat-completion response body
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawResponse {
    id: Option<String>,
    choices: Vec<RawChoice>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawChoice {
    message: RawMessage,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawMessage {
    id: Option<String>,
    role: String,
    content: Value,
    tool_calls: Option<Vec<RawToolCall>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: RawFunction,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawFunction {
    name: String,
    arguments: String,
}

// ============================================
// Normalization
// ============================================

/// Parse a raw request body (and optional response body) into canonical
/// messages plus the serialized tool-schema text.
///
/// Request messages come out in wire order as `part=request`; a present
/// response body appends exactly one `part=response` message built from the
/// response's single top-level choice.
pub fn normalize(
    request_body: &str,
    response_body: Option<&str>,
    source: Source,
) -> Result<(Vec<CanonicalMessage>, String)> {
    let request: RawRequest = serde_json::from_str(request_body)?;

    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    for raw in request.messages {
        messages.push(canonicalize(raw, MessagePart::Request, None)?);
    }

    if let Some(body) = response_body {
        let response: RawResponse = serde_json::from_str(body)?;
        let message_id = response.id;
        if let Some(choice) = response.choices.into_iter().next() {
            messages.push(canonicalize(choice.message, MessagePart::Response, message_id)?);
        }
    }

    let adapter = source.adapter();
    for message in &mut messages {
        adapter.post_process(message);
    }

    // Absent tools serialize as an empty list so schema diffs stay stable
    let tools = if request.tools.is_null() {
        Value::Array(vec![])
    } else {
        request.tools
    };
    let tools_schema = serde_json::to_string_pretty(&tools)?;

    Ok((messages, tools_schema))
}

fn canonicalize(
    raw: RawMessage,
    part: MessagePart,
    response_id: Option<String>,
) -> Result<CanonicalMessage> {
    Ok(CanonicalMessage {
        part,
        message_id: response_id.or(raw.id),
        role: raw.role,
        content: parse_content(&raw.content),
        tool_calls: parse_tool_calls(raw.tool_calls)?,
        injected: false,
    })
}

/// Extract content parts from a wire content value.
///
/// A bare string is one text part; a structured list keeps only
/// `text`-typed entries. Anything else (null, other modalities) yields
/// nothing.
fn parse_content(content: &Value) -> Vec<ContentPart> {
    match content {
        Value::String(text) => vec![ContentPart::text(text.clone())],
        Value::Array(items) => items
            .iter()
            .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .map(ContentPart::text)
            .collect(),
        _ => vec![],
    }
}

fn parse_tool_calls(raw: Option<Vec<RawToolCall>>) -> Result<Option<Vec<ToolCall>>> {
    let Some(raw) = raw else {
        return Ok(None);
    };

    let mut calls = Vec::with_capacity(raw.len());
    for tc in raw {
        let arguments = serde_json::from_str(&tc.function.arguments).map_err(|e| {
            Error::MalformedToolArguments {
                tool: tc.function.name.clone(),
                message: e.to_string(),
            }
        })?;
        calls.push(ToolCall {
            id: tc.id,
            call_type: tc.call_type,
            name: tc.function.name,
            arguments,
        });
    }
    Ok(Some(calls))
}

// ============================================
// Backend-specific post-processing
// ============================================

/// Backend-specific rewrite of a canonical message after parsing.
pub trait SourceAdapter: Send + Sync {
    fn post_process(&self, message: &mut CanonicalMessage);
}

impl Source {
    /// The post-processing adapter for this backend
    pub fn adapter(&self) -> &'static dyn SourceAdapter {
        match self {
            Source::Letta => &LettaAdapter,
            Source::Plain => &PlainAdapter,
        }
    }
}

/// No-op adapter for backends without special conventions
struct PlainAdapter;

impl SourceAdapter for PlainAdapter {
    fn post_process(&self, _message: &mut CanonicalMessage) {}
}

/// Letta wraps the user-visible reply in a `send_message` tool call.
///
/// An assistant message with empty content and exactly that one tool call
/// gets its `thinking` and `message` arguments unpacked into synthetic
/// content parts; the tool-call list is cleared afterwards so the parts are
/// the single representation.
struct LettaAdapter;

const SEND_MESSAGE_WRAPPER: &str = "send_message";

impl SourceAdapter for LettaAdapter {
    fn post_process(&self, message: &mut CanonicalMessage) {
        if message.role != "assistant" || !message.content.is_empty() {
            return;
        }
        let Some(calls) = &message.tool_calls else {
            return;
        };
        let [call] = calls.as_slice() else {
            return;
        };
        if call.name != SEND_MESSAGE_WRAPPER {
            return;
        }

        let mut content = Vec::new();
        if let Some(thinking) = call.arguments.get("thinking").and_then(Value::as_str) {
            content.push(ContentPart::thinking(thinking));
        }
        if let Some(text) = call.arguments.get("message").and_then(Value::as_str) {
            content.push(ContentPart::text(text));
        }
        message.content = content;
        message.tool_calls = Some(vec![]);
    }
}

// ============================================
// Injected-flag derivation
// ============================================

/// The set of text strings visible in a conversation transcript
pub fn visible_text_set(transcript: &[VisibleMessage]) -> HashSet<String> {
    transcript
        .iter()
        .flat_map(|m| m.texts().map(str::to_string))
        .collect()
}

/// Mark request-part messages whose content never appeared in the visible
/// transcript.
///
/// This flags system prompts, tool outputs, and memory blocks the LLM saw
/// but the end user never did. Response-part messages are left alone.
pub fn mark_injected(messages: &mut [CanonicalMessage], visible_texts: &HashSet<String>) {
    for message in messages {
        if message.part != MessagePart::Request {
            continue;
        }
        message.injected = message
            .content
            .iter()
            .all(|part| !visible_texts.contains(part.as_text()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VisibleContent;

    const SIMPLE_REQUEST: &str = r#"{
        "messages": [
            {"role": "system", "content": "SYSTEM PROMPT"},
            {"role": "user", "content": "Hello"}
        ],
        "tools": [{"name": "web_search"}]
    }"#;

    #[test]
    fn test_request_messages_in_order() {
        let (messages, tools) = normalize(SIMPLE_REQUEST, None, Source::Plain).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[0].part, MessagePart::Request);
        assert_eq!(messages[1].content, vec![ContentPart::text("Hello")]);
        assert!(tools.contains("web_search"));
    }

    #[test]
    fn test_response_appends_one_message() {
        let response = r#"{
            "id": "resp-1",
            "choices": [{"message": {"role": "assistant", "content": "Hi"}}]
        }"#;
        let (messages, _) = normalize(SIMPLE_REQUEST, Some(response), Source::Plain).unwrap();
        assert_eq!(messages.len(), 3);

        let reply = messages.last().unwrap();
        assert_eq!(reply.part, MessagePart::Response);
        assert_eq!(reply.role, "assistant");
        assert_eq!(reply.message_id.as_deref(), Some("resp-1"));
        assert_eq!(reply.content, vec![ContentPart::text("Hi")]);
    }

    #[test]
    fn test_structured_content_keeps_only_text() {
        let request = r#"{
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "look at this"},
                {"type": "image", "url": "http://example.com/cat.png"},
                {"type": "text", "text": "cute, right?"}
            ]}]
        }"#;
        let (messages, _) = normalize(request, None, Source::Plain).unwrap();
        assert_eq!(
            messages[0].content,
            vec![ContentPart::text("look at this"), ContentPart::text("cute, right?")]
        );
    }

    #[test]
    fn test_null_content_is_empty() {
        let request = r#"{"messages": [{"role": "assistant", "content": null}]}"#;
        let (messages, _) = normalize(request, None, Source::Plain).unwrap();
        assert!(messages[0].content.is_empty());
        assert!(messages[0].tool_calls.is_none());
    }

    #[test]
    fn test_absent_tools_serialize_as_empty_list() {
        let request = r#"{"messages": []}"#;
        let (_, tools) = normalize(request, None, Source::Plain).unwrap();
        assert_eq!(tools, "[]");
    }

    #[test]
    fn test_tool_call_arguments_parsed() {
        let request = r#"{
            "messages": [{"role": "assistant", "content": null, "tool_calls": [
                {"id": "call-1", "type": "function",
                 "function": {"name": "web_search", "arguments": "{\"query\": \"rust\"}"}}
            ]}]
        }"#;
        let (messages, _) = normalize(request, None, Source::Plain).unwrap();
        let calls = messages[0].tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "web_search");
        assert_eq!(calls[0].arguments["query"], "rust");
    }

    #[test]
    fn test_malformed_tool_arguments_fail_hard() {
        let request = r#"{
            "messages": [{"role": "assistant", "content": null, "tool_calls": [
                {"id": "call-1", "type": "function",
                 "function": {"name": "web_search", "arguments": "{not json"}}
            ]}]
        }"#;
        let err = normalize(request, None, Source::Plain).unwrap_err();
        assert!(matches!(
            err,
            Error::MalformedToolArguments { ref tool, .. } if tool == "web_search"
        ));
    }

    #[test]
    fn test_letta_send_message_unpacking() {
        let request = r#"{
            "messages": [{"role": "assistant", "content": null, "tool_calls": [
                {"id": "call-1", "type": "function",
                 "function": {"name": "send_message",
                              "arguments": "{\"thinking\": \"hmm\", \"message\": \"Hi there\"}"}}
            ]}]
        }"#;
        let (messages, _) = normalize(request, None, Source::Letta).unwrap();
        assert_eq!(
            messages[0].content,
            vec![ContentPart::thinking("hmm"), ContentPart::text("Hi there")]
        );
        assert_eq!(messages[0].tool_calls, Some(vec![]));
    }

    #[test]
    fn test_letta_unpacking_without_thinking() {
        let request = r#"{
            "messages": [{"role": "assistant", "content": null, "tool_calls": [
                {"id": "call-1", "type": "function",
                 "function": {"name": "send_message", "arguments": "{\"message\": \"Hi there\"}"}}
            ]}]
        }"#;
        let (messages, _) = normalize(request, None, Source::Letta).unwrap();
        assert_eq!(messages[0].content, vec![ContentPart::text("Hi there")]);
        assert_eq!(messages[0].tool_calls, Some(vec![]));
    }

    #[test]
    fn test_other_sources_unaffected_by_letta_convention() {
        let request = r#"{
            "messages": [{"role": "assistant", "content": null, "tool_calls": [
                {"id": "call-1", "type": "function",
                 "function": {"name": "send_message", "arguments": "{\"message\": \"Hi\"}"}}
            ]}]
        }"#;
        let (messages, _) = normalize(request, None, Source::Plain).unwrap();
        assert!(messages[0].content.is_empty());
        assert_eq!(messages[0].tool_calls.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let response = r#"{"id": "r", "choices": [{"message": {"role": "assistant", "content": "Hi"}}]}"#;
        let first = normalize(SIMPLE_REQUEST, Some(response), Source::Letta).unwrap();
        let second = normalize(SIMPLE_REQUEST, Some(response), Source::Letta).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_injected_flag_derivation() {
        let transcript = vec![VisibleMessage {
            id: "m1".to_string(),
            role: "user".to_string(),
            content: vec![VisibleContent {
                content_type: "text".to_string(),
                text: "Hello".to_string(),
            }],
        }];
        let visible = visible_text_set(&transcript);

        let (mut messages, _) = normalize(SIMPLE_REQUEST, None, Source::Plain).unwrap();
        mark_injected(&mut messages, &visible);

        // Only the system prompt is invisible to the user
        assert!(messages[0].injected);
        assert!(!messages[1].injected);
    }

    #[test]
    fn test_injected_never_set_on_response_part() {
        let response = r#"{"id": "r", "choices": [{"message": {"role": "assistant", "content": "Hi"}}]}"#;
        let (mut messages, _) =
            normalize(SIMPLE_REQUEST, Some(response), Source::Plain).unwrap();
        mark_injected(&mut messages, &HashSet::new());
        assert!(!messages.last().unwrap().injected);
    }
}
