//! Agent adapter seam
//!
//! The conversational-agent backend is an external collaborator: the core
//! only sees it as an opaque capability behind [`AgentClient`]. Concrete
//! adapters (Letta lives in the server crate) translate these calls into
//! whatever the backend speaks.

use crate::error::Result;
use crate::types::{ConversationInfo, VisibleMessage};
use async_trait::async_trait;

/// Message ids handed back by the adapter for one accepted post
#[derive(Debug, Clone)]
pub struct TurnReceipt {
    /// Id of the stored user message
    pub user_message_id: String,
    /// Id of the assistant's reply message
    pub assistant_message_id: String,
}

/// Opaque capability over the conversational-agent backend.
///
/// Implementations must not touch the correlation store; the caller owns
/// turn bookkeeping around these calls.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Create a new conversation, returning its descriptor
    async fn create_conversation(&self) -> Result<ConversationInfo>;

    /// List all known conversations
    async fn list_conversations(&self) -> Result<Vec<ConversationInfo>>;

    /// Delete a conversation; `ConversationNotFound` if unknown
    async fn delete_conversation(&self, conversation_id: &str) -> Result<()>;

    /// The user-visible transcript of a conversation, in display order
    async fn transcript(&self, conversation_id: &str) -> Result<Vec<VisibleMessage>>;

    /// Post a user message and wait for the assistant's reply.
    ///
    /// Any provider calls the backend makes while handling this post go
    /// through the proxy and get correlated to the turn that wraps this
    /// call.
    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<TurnReceipt>;
}
