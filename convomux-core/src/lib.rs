//! # convomux-core
//!
//! Core library for convomux - an LLM-call interception and context
//! reconstruction proxy.
//!
//! This library provides:
//! - The turn correlator that serializes conversation turns and tags
//!   intercepted provider calls with the active turn
//! - The correlation store (SQLite) for turns and raw request/response pairs
//! - The proxy forwarder to the upstream provider
//! - The message normalizer and context diff engine that reconstruct how
//!   the model's effective context evolved turn over turn
//! - Configuration and logging infrastructure
//!
//! ## Architecture
//!
//! Data flows in three stages:
//! - **Capture:** the proxy records every provider call verbatim, correlated
//!   to the turn active at call-start
//! - **Normalize:** raw bodies are projected into canonical messages on read
//! - **Reconstruct:** the diff engine replays a conversation's calls into an
//!   ordered event timeline
//!
//! ## Example
//!
//! ```rust,no_run
//! use convomux_core::{Config, Database};
//!
//! let config = Config::load().expect("failed to load config");
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//! ```

// Re-export commonly used items at the crate root
pub use agent::{AgentClient, TurnReceipt};
pub use config::Config;
pub use correlator::Correlator;
pub use db::Database;
pub use differ::{reconstruct_sequence, ContextTracker, Reconstruction};
pub use error::{Error, Result};
pub use forward::{Forwarder, ForwardOutcome};
pub use types::*;

// Public modules
pub mod agent;
pub mod config;
pub mod correlator;
pub mod db;
pub mod differ;
pub mod error;
pub mod forward;
pub mod logging;
pub mod normalize;
pub mod types;
