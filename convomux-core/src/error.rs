//! Error types for convomux-core

use thiserror::Error;

/// Main error type for the convomux-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Turn not found
    #[error("turn not found: {0}")]
    TurnNotFound(String),

    /// LLM call not found
    #[error("LLM call not found: {0}")]
    CallNotFound(String),

    /// Conversation not found
    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    /// The forwarder has no upstream translation for this path
    #[error("path translation for {0} not implemented")]
    UnsupportedPath(String),

    /// A tool call carried an argument payload that is not valid JSON
    #[error("malformed tool arguments for {tool}: {message}")]
    MalformedToolArguments { tool: String, message: String },

    /// Upstream provider answered with a non-success status
    #[error("upstream returned {status}")]
    UpstreamStatus { status: u16, body: String },

    /// Upstream provider was unreachable
    #[error("upstream unreachable: {0}")]
    Upstream(String),

    /// Agent adapter error
    #[error("agent error: {0}")]
    Agent(String),
}

/// Result type alias for convomux-core
pub type Result<T> = std::result::Result<T, Error>;
