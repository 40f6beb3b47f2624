//! HTTP server built on axum.
//!
//! Sets up routes, middleware, and shared state for the conversation API
//! and the interception proxy.

use std::sync::Arc;

use axum::{
    routing::{any, get},
    Router,
};
use convomux_core::config::ServerConfig;
use convomux_core::{AgentClient, Correlator, Database, Error, Forwarder, Source};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Correlation store.
    pub db: Arc<Database>,
    /// Global turn correlator; clones share the same critical section.
    pub correlator: Correlator,
    /// Upstream forwarder for intercepted provider calls.
    pub forwarder: Arc<Forwarder>,
    /// Conversational-agent backend adapter.
    pub agent: Arc<dyn AgentClient>,
    /// Which backend conventions shape the intercepted bodies.
    pub source: Source,
}

/// Start the HTTP server.
///
/// Binds to the configured host:port and serves:
/// - the conversation API under /api
/// - the interception proxy under /proxy/{*path}
pub async fn start_server(config: &ServerConfig, state: AppState) -> Result<(), Error> {
    let app = Router::new()
        .route(
            "/api/conv",
            get(handlers::list_conversations).post(handlers::create_conversation),
        )
        .route(
            "/api/conv/{id}",
            get(handlers::get_transcript)
                .post(handlers::post_message)
                .delete(handlers::delete_conversation),
        )
        .route("/api/llm_request", get(handlers::list_llm_requests))
        .route("/api/llm_request/{id}", get(handlers::get_llm_request))
        .route(
            "/api/seq/{conv_id}",
            get(handlers::get_sequence).post(handlers::post_sequence),
        )
        .route("/proxy/{*path}", any(handlers::proxy))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("convomux listening on {addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
