//! HTTP surface standing in for the gateway's route integrations
//!
//! Routes:
//! - `POST /connections/{connection_id}`: connection opened
//! - `DELETE /connections/{connection_id}`: connection closed
//! - `POST /connections/{connection_id}/messages`: inbound message
//! - `GET /health`, `GET /metrics`
//!
//! Every connection route takes an optional `?chat=` query parameter.

pub mod connections;
pub mod error;
pub mod health;

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

use chatrelay_cluster::LifecycleHandler;
use chatrelay_core::ChatId;

pub use error::{AppError, AppResult};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<LifecycleHandler>,
    pub default_chat: ChatId,
}

impl AppState {
    pub const fn new(lifecycle: Arc<LifecycleHandler>, default_chat: ChatId) -> Self {
        Self {
            lifecycle,
            default_chat,
        }
    }
}

/// Build the application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(connections::create_connections_router())
        .merge(health::create_health_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
