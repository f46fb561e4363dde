//! Parley: a multi-user chat server and client-sync library.
//!
//! The core is the real-time synchronization subsystem: the server-side
//! session/room/presence registry that fans events out to the right sockets
//! ([`ws`]), and the client-side reconciliation logic that merges a REST
//! snapshot with the event stream into one consistent view ([`client`]).

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use uuid::Uuid;

pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod store;
pub mod ws;

use crate::auth::Identity;
use crate::config::ServerConfig;
use crate::metrics::ServerMetrics;
use crate::store::ConversationStore;
use crate::ws::SyncService;

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// The injected synchronization service (registry, rooms, presence,
    /// broadcaster) with an explicit lifecycle
    pub sync: Arc<SyncService>,
    pub store: Arc<dyn ConversationStore>,
    pub identity: Arc<dyn Identity>,
    pub metrics: Arc<ServerMetrics>,
}

/// Assemble the full route tree with auth, tracing and CORS layers.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Snapshot endpoints
        .route("/api/chat/conversations", get(handlers::list_conversations))
        .route("/api/chat/users", get(handlers::list_users))
        // Fan-out triggers
        .route(
            "/api/chat/conversations/{id}/messages",
            post(handlers::send_message),
        )
        .route("/api/chat/avatar", post(handlers::update_avatar))
        // Real-time transport (authenticates in-band)
        .route("/api/ws", get(handlers::chat_websocket_handler))
        // Health endpoints
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
