//! HTTP request handlers for the conversation API and the interception proxy.
//!
//! The /api routes drive the agent adapter and the reconstruction pipeline;
//! the /proxy route records and forwards provider calls.

use std::collections::HashSet;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::{header::CONTENT_TYPE, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use convomux_core::differ::reconstruct_sequence;
use convomux_core::forward::unsupported_path_body;
use convomux_core::normalize::{mark_injected, normalize, visible_text_set};
use convomux_core::types::{CanonicalMessage, LlmCall, RawBody, SequenceEvent, VisibleContent};
use convomux_core::Error;

use crate::server::AppState;

// ============================================
// Error mapping
// ============================================

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error description.
    pub error: String,
}

/// Wrapper mapping core errors onto HTTP responses.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::TurnNotFound(_) | Error::CallNotFound(_) | Error::ConversationNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            // Structured body shaped like an OpenAI error object
            Error::UnsupportedPath(path) => {
                return (
                    StatusCode::NOT_IMPLEMENTED,
                    Json(unsupported_path_body(path)),
                )
                    .into_response();
            }
            Error::MalformedToolArguments { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            // Surface whatever the upstream answered, verbatim
            Error::UpstreamStatus { status, body } => {
                return (
                    StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
                    body.clone(),
                )
                    .into_response();
            }
            Error::Upstream(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error_response(status, &self.0)
    }
}

fn error_response(status: StatusCode, err: &Error) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

// ============================================
// Conversation routes
// ============================================

#[derive(Debug, Serialize)]
pub struct ConversationListResponse {
    pub conversations: Vec<convomux_core::ConversationInfo>,
}

/// GET /api/conv
pub async fn list_conversations(
    State(state): State<AppState>,
) -> Result<Json<ConversationListResponse>, ApiError> {
    let conversations = state.agent.list_conversations().await?;
    Ok(Json(ConversationListResponse { conversations }))
}

/// POST /api/conv
pub async fn create_conversation(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let info = state.agent.create_conversation().await?;
    tracing::info!(conversation_id = %info.id, "Created conversation");
    Ok((StatusCode::CREATED, Json(info)))
}

/// One transcript message with its correlated provider calls attached.
#[derive(Debug, Serialize)]
pub struct TranscriptMessage {
    pub id: String,
    pub role: String,
    pub content: Vec<VisibleContent>,
    /// Ids of the provider calls this message's turn triggered
    pub llm_request_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct TranscriptResponse {
    pub id: String,
    pub messages: Vec<TranscriptMessage>,
}

/// GET /api/conv/{id}
pub async fn get_transcript(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TranscriptResponse>, ApiError> {
    Ok(Json(transcript_with_calls(&state, &id).await?))
}

/// Message content on the wire: a bare string, or the typed parts list the
/// CLI client sends (`[{"type": "text", "text": ...}]`).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<VisibleContent>),
}

impl MessageContent {
    /// Flatten to the text handed to the agent; non-text parts are dropped.
    fn into_text(self) -> String {
        match self {
            MessageContent::Text(text) => text,
            MessageContent::Parts(parts) => parts
                .into_iter()
                .filter(|p| p.content_type == "text")
                .map(|p| p.text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    /// User message content
    pub content: MessageContent,
}

/// POST /api/conv/{id}
///
/// Posts a user message as one turn and returns the updated transcript.
pub async fn post_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PostMessageRequest>,
) -> Result<Json<TranscriptResponse>, ApiError> {
    run_turn(&state, &id, &body.content.into_text()).await?;
    Ok(Json(transcript_with_calls(&state, &id).await?))
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub status: String,
}

/// DELETE /api/conv/{id}
pub async fn delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    state.agent.delete_conversation(&id).await?;
    state.db.delete_conversation(&id)?;
    tracing::info!(conversation_id = %id, "Deleted conversation");
    Ok(Json(DeleteResponse {
        status: format!("Conversation deleted: {}", id),
    }))
}

/// Run one turn: open it, hold the correlator section across the agent
/// call, close it with the message ids the adapter hands back.
///
/// A failed adapter call leaves the turn row with null message ids; the
/// guard still drops, so the correlation window closes either way.
async fn run_turn(state: &AppState, conversation_id: &str, text: &str) -> Result<String, Error> {
    let turn_id = state.db.open_turn(conversation_id)?;
    tracing::debug!(turn_id = %turn_id, conversation_id = %conversation_id, "Turn opened");

    let receipt = {
        let _guard = state.correlator.begin(turn_id.clone()).await;
        state.agent.send_message(conversation_id, text).await?
    };

    state.db.close_turn(
        &turn_id,
        &receipt.user_message_id,
        &receipt.assistant_message_id,
    )?;
    tracing::debug!(turn_id = %turn_id, "Turn closed");
    Ok(turn_id)
}

/// Fetch the transcript and join each message to the calls its turn made.
async fn transcript_with_calls(
    state: &AppState,
    conversation_id: &str,
) -> Result<TranscriptResponse, Error> {
    let transcript = state.agent.transcript(conversation_id).await?;
    let message_ids: Vec<String> = transcript.iter().map(|m| m.id.clone()).collect();
    let mut call_map = state.db.calls_correlated_to_messages(&message_ids)?;

    let messages = transcript
        .into_iter()
        .map(|m| {
            let llm_request_ids = call_map.remove(&m.id).unwrap_or_default();
            TranscriptMessage {
                id: m.id,
                role: m.role,
                content: m.content,
                llm_request_ids,
            }
        })
        .collect();

    Ok(TranscriptResponse {
        id: conversation_id.to_string(),
        messages,
    })
}

// ============================================
// Call inspection routes
// ============================================

#[derive(Debug, Serialize)]
pub struct LlmRequestListResponse {
    pub llm_requests: Vec<LlmCall>,
}

/// GET /api/llm_request
pub async fn list_llm_requests(
    State(state): State<AppState>,
) -> Result<Json<LlmRequestListResponse>, ApiError> {
    let llm_requests = state.db.list_calls()?;
    Ok(Json(LlmRequestListResponse { llm_requests }))
}

#[derive(Debug, Serialize)]
pub struct LlmRequestDetail {
    pub call: LlmCall,
    /// Canonical messages with injected flags
    pub messages: Vec<CanonicalMessage>,
    /// Tool schema as rendered by the normalizer
    pub available_tools: String,
}

/// GET /api/llm_request/{id}
///
/// One call row plus its single-call reconstruction. Injected flags are
/// computed against the owning conversation's transcript when the call is
/// correlated; uncorrelated calls see everything as injected.
pub async fn get_llm_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LlmRequestDetail>, ApiError> {
    let call = state
        .db
        .get_call(&id)?
        .ok_or_else(|| Error::CallNotFound(id.clone()))?;

    let visible = match &call.turn_id {
        Some(turn_id) => match state.db.get_turn(turn_id)? {
            Some(turn) => {
                let transcript = state.agent.transcript(&turn.conversation_id).await?;
                visible_text_set(&transcript)
            }
            None => HashSet::new(),
        },
        None => HashSet::new(),
    };

    let (mut messages, available_tools) = normalize(
        call.request_body.as_str(),
        call.response_body.as_ref().map(|b| b.as_str()),
        state.source,
    )?;
    mark_injected(&mut messages, &visible);

    Ok(Json(LlmRequestDetail {
        call,
        messages,
        available_tools,
    }))
}

// ============================================
// Sequence reconstruction routes
// ============================================

#[derive(Debug, Serialize)]
pub struct SequenceResponse {
    pub events: Vec<SequenceEvent>,
    pub warnings: Vec<String>,
}

/// GET /api/seq/{conv_id}
///
/// Replay every correlated call of the conversation into an ordered
/// context-evolution timeline.
pub async fn get_sequence(
    State(state): State<AppState>,
    Path(conv_id): Path<String>,
) -> Result<Json<SequenceResponse>, ApiError> {
    let calls = conversation_calls(&state, &conv_id)?;
    let transcript = state.agent.transcript(&conv_id).await?;
    let visible = visible_text_set(&transcript);

    let result = reconstruct_sequence(&calls, None, state.source, &visible);
    Ok(Json(SequenceResponse {
        events: result.events,
        warnings: result.warnings,
    }))
}

/// POST /api/seq/{conv_id}
///
/// Run a new turn, then reconstruct only what it added: the last
/// pre-existing call seeds the tracker as a silent baseline.
pub async fn post_sequence(
    State(state): State<AppState>,
    Path(conv_id): Path<String>,
    Json(body): Json<PostMessageRequest>,
) -> Result<Json<SequenceResponse>, ApiError> {
    let prior_calls = conversation_calls(&state, &conv_id)?;

    let turn_id = run_turn(&state, &conv_id, &body.content.into_text()).await?;
    let new_calls = state.db.calls_for_turns(std::slice::from_ref(&turn_id))?;

    let transcript = state.agent.transcript(&conv_id).await?;
    let visible = visible_text_set(&transcript);

    let result = reconstruct_sequence(&new_calls, prior_calls.last(), state.source, &visible);
    Ok(Json(SequenceResponse {
        events: result.events,
        warnings: result.warnings,
    }))
}

fn conversation_calls(state: &AppState, conversation_id: &str) -> Result<Vec<LlmCall>, Error> {
    let turns = state.db.turns_for_conversation(conversation_id)?;
    let turn_ids: Vec<String> = turns.into_iter().map(|t| t.id).collect();
    state.db.calls_for_turns(&turn_ids)
}

// ============================================
// Interception proxy
// ============================================

/// GET|POST /proxy/{*path}
///
/// Records the call (correlated to the turn active right now), forwards it
/// upstream, records the response. A failed forward leaves the call row
/// with null response fields and surfaces the error to the caller.
pub async fn proxy(
    State(state): State<AppState>,
    Path(path): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: String,
) -> Result<Response, ApiError> {
    let turn_id = state.correlator.current_turn();
    let call_id = state.db.record_call_start(
        &path,
        method.as_str(),
        &RawBody::new(body.clone()),
        turn_id.as_deref(),
    )?;
    tracing::debug!(call_id = %call_id, path = %path, turn_id = ?turn_id, "Intercepted call");

    let header_pairs: Vec<(String, String)> = headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
        .collect();

    let started = Instant::now();
    let outcome = state
        .forwarder
        .forward(&path, method.as_str(), &header_pairs, RawBody::new(body))
        .await
        .map_err(|e| {
            tracing::warn!(call_id = %call_id, error = %e, "Forward failed");
            e
        })?;
    let duration_ms = started.elapsed().as_millis() as i64;

    state
        .db
        .record_call_finish(&call_id, outcome.status, &outcome.body, duration_ms)?;

    let mut response = (
        StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::OK),
        outcome.body.into_string(),
    )
        .into_response();
    if let Some(content_type) = outcome
        .content_type
        .and_then(|ct| HeaderValue::from_str(&ct).ok())
    {
        response.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_message_request_accepts_bare_string() {
        let json = r#"{"content": "Hello, world!"}"#;
        let req: PostMessageRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.content.into_text(), "Hello, world!");
    }

    #[test]
    fn post_message_request_accepts_typed_parts() {
        let json = r#"{"content": [{"type": "text", "text": "Hello, world!"}]}"#;
        let req: PostMessageRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.content.into_text(), "Hello, world!");
    }

    #[test]
    fn non_text_parts_are_dropped() {
        let json = r#"{"content": [
            {"type": "text", "text": "look"},
            {"type": "image", "text": "ignored"},
            {"type": "text", "text": "here"}
        ]}"#;
        let req: PostMessageRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.content.into_text(), "look\nhere");
    }

    #[test]
    fn error_response_serializes() {
        let resp = ErrorResponse {
            error: "something went wrong".to_string(),
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("something went wrong"));
    }

    #[test]
    fn not_found_maps_to_404() {
        let response = ApiError(Error::ConversationNotFound("conv-1".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn unsupported_path_maps_to_501() {
        let response = ApiError(Error::UnsupportedPath("v1/models".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    }

    #[test]
    fn malformed_tool_arguments_maps_to_422() {
        let response = ApiError(Error::MalformedToolArguments {
            tool: "send_message".into(),
            message: "bad json".into(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn upstream_status_passes_through() {
        let response = ApiError(Error::UpstreamStatus {
            status: 429,
            body: "slow down".into(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn unreachable_upstream_maps_to_502() {
        let response = ApiError(Error::Upstream("connection refused".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
