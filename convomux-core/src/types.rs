//! Core domain types for convomux
//!
//! These types form the canonical data model for intercepted LLM traffic.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Turn** | One user-initiated conversational exchange, bounded by the correlator's exclusive section |
//! | **LlmCall** | One intercepted request/response pair sent through the proxy to the upstream provider |
//! | **CanonicalMessage** | Normalized, backend-agnostic view of one message in a provider request or response |
//! | **Injected content** | Request-side content the LLM saw but the end user never did (system prompts, tool outputs, memory blocks) |
//! | **Source** | The agent backend whose conventions shape the raw bodies (drives post-processing) |
//!
//! Raw bodies are stored opaque ([`RawBody`]) and only parsed in the
//! normalizer; `Turn` and `LlmCall` rows are owned by the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Raw bodies
// ============================================

/// Opaque raw JSON body as received on the wire.
///
/// Immutable at the store boundary: the store persists and returns these
/// verbatim, and only the normalizer ever parses them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawBody(String);

impl RawBody {
    pub fn new(body: impl Into<String>) -> Self {
        Self(body.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for RawBody {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RawBody {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ============================================
// Turns
// ============================================

/// One user-initiated conversational exchange.
///
/// Created with null message ids when the user message is accepted; mutated
/// once by the correlation flow to fill the ids in after the agent adapter
/// responds. Deleted only by conversation-deletion cascades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Unique identifier for this turn
    pub id: String,
    /// Conversation this turn belongs to
    pub conversation_id: String,
    /// Visible user message id (filled in when the adapter responds)
    pub user_message_id: Option<String>,
    /// Visible assistant message id (filled in when the adapter responds)
    pub assistant_message_id: Option<String>,
    /// When the turn was opened
    pub created_at: DateTime<Utc>,
}

// ============================================
// LLM calls
// ============================================

/// One intercepted provider request/response pair.
///
/// Created at interception time with null response fields; updated in place
/// once the upstream response arrives. A forward that fails mid-flight leaves
/// the response fields null permanently, which is meaningful telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCall {
    /// Unique identifier for this call
    pub id: String,
    /// When the call was first recorded
    pub ts: DateTime<Utc>,
    /// Wire path as seen by the proxy (e.g. "api/v0/chat/completions")
    pub path: String,
    /// HTTP method
    pub method: String,
    /// Raw request body, verbatim
    pub request_body: RawBody,
    /// Upstream response status (null until forwarding completes)
    pub response_status: Option<u16>,
    /// Raw response body, verbatim (null until forwarding completes)
    pub response_body: Option<RawBody>,
    /// Wall-clock duration of the forward in milliseconds
    pub duration_ms: Option<i64>,
    /// Turn that was active when the call was recorded.
    ///
    /// Fixed at call-start and never reassigned, even if the turn closes
    /// before the response arrives. Null for calls made outside any turn.
    pub turn_id: Option<String>,
}

// ============================================
// Source backends
// ============================================

/// Agent backend whose conventions shape the raw provider bodies.
///
/// Post-processing in the normalizer is dispatched on this tag so new
/// backends can be added without touching the core parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Letta smuggles the visible reply inside a `send_message` tool call
    Letta,
    /// No backend-specific conventions
    Plain,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Letta => "letta",
            Source::Plain => "plain",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "letta" => Ok(Source::Letta),
            "plain" => Ok(Source::Plain),
            _ => Err(format!("unknown source: {}", s)),
        }
    }
}

// ============================================
// Canonical messages
// ============================================

/// Which side of the provider exchange a canonical message came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePart {
    /// Message from the request's `messages` array
    Request,
    /// Message built from the response's top-level choice
    Response,
}

impl MessagePart {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessagePart::Request => "request",
            MessagePart::Response => "response",
        }
    }
}

/// One typed content part of a canonical message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text content
    Text { text: String },
    /// Reasoning content (synthesized by backend post-processing)
    Thinking { text: String },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn thinking(text: impl Into<String>) -> Self {
        ContentPart::Thinking { text: text.into() }
    }

    /// The text payload regardless of part type
    pub fn as_text(&self) -> &str {
        match self {
            ContentPart::Text { text } | ContentPart::Thinking { text } => text,
        }
    }
}

/// A tool call extracted from a provider message.
///
/// `arguments` is the parsed form of the wire's JSON-encoded argument string.
/// `serde_json::Map` keeps keys ordered, so rendering stays deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned tool call id
    pub id: String,
    /// Call type on the wire (currently always "function")
    #[serde(rename = "type")]
    pub call_type: String,
    /// Function name
    pub name: String,
    /// Parsed argument map
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

/// Normalized view of one request- or response-side message.
///
/// Produced fresh on every normalization pass; never persisted directly --
/// it is a projection over [`LlmCall`] rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    /// Request or response side
    pub part: MessagePart,
    /// Source message id, when the wire carried one
    pub message_id: Option<String>,
    /// Role as given by the wire ("system", "user", "assistant", "tool", ...)
    pub role: String,
    /// Ordered content parts
    pub content: Vec<ContentPart>,
    /// Tool calls, when present on the wire
    pub tool_calls: Option<Vec<ToolCall>>,
    /// True when a request-part message's content never appeared in the
    /// user-visible transcript (derived, see the normalizer)
    pub injected: bool,
}

// ============================================
// Sequence events
// ============================================

/// One entry in a reconstructed context timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SequenceEvent {
    /// A response message became part of the conversation
    Message {
        /// Rendered text of the message
        content: String,
    },
    /// The effective context (messages or tool schema) changed
    ContextChange {
        /// Line-based addition/removal delta
        delta: String,
    },
}

// ============================================
// Agent adapter wire types
// ============================================

/// One content part of a user-visible transcript message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisibleContent {
    /// Content type; only "text" is expected from the adapter
    #[serde(rename = "type")]
    pub content_type: String,
    /// The text
    pub text: String,
}

/// One message of the user-visible transcript, as returned by the agent
/// adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisibleMessage {
    /// Adapter-assigned message id
    pub id: String,
    /// "user" or "assistant"
    pub role: String,
    /// Ordered content parts
    pub content: Vec<VisibleContent>,
}

impl VisibleMessage {
    /// All text strings carried by this message
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.content.iter().map(|c| c.text.as_str())
    }
}

/// A conversation as reported by the agent adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationInfo {
    /// Adapter-assigned conversation id
    pub id: String,
    /// Optional human-readable topic
    #[serde(default)]
    pub topic: Option<String>,
}
