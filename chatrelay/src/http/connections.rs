//! Connection lifecycle hooks

use axum::{
    extract::{Path, Query, State},
    routing::post,
    Router,
};
use serde::Deserialize;
use tracing::warn;

use chatrelay_core::{ChatId, ConnectionId};

use crate::http::{AppResult, AppState};

/// Optional chat selector; absent means the configured default chat
#[derive(Debug, Default, Deserialize)]
pub struct ChatQuery {
    pub chat: Option<String>,
}

impl ChatQuery {
    fn chat_id(self, state: &AppState) -> ChatId {
        self.chat
            .filter(|c| !c.is_empty())
            .map_or_else(|| state.default_chat.clone(), ChatId::from_string)
    }
}

pub fn create_connections_router() -> Router<AppState> {
    Router::new()
        .route(
            "/connections/{connection_id}",
            post(connect).delete(disconnect),
        )
        .route("/connections/{connection_id}/messages", post(inbound_message))
}

async fn connect(
    State(state): State<AppState>,
    Path(connection_id): Path<String>,
    Query(query): Query<ChatQuery>,
) -> AppResult<&'static str> {
    let chat_id = query.chat_id(&state);
    state
        .lifecycle
        .on_connect(&chat_id, &ConnectionId::from_string(connection_id))
        .await?;
    Ok("Connected")
}

/// Always acknowledges: a registry failure must not block transport teardown,
/// the lease cleans up whatever is left.
async fn disconnect(
    State(state): State<AppState>,
    Path(connection_id): Path<String>,
    Query(query): Query<ChatQuery>,
) -> &'static str {
    let chat_id = query.chat_id(&state);
    let connection_id = ConnectionId::from_string(connection_id);
    if let Err(e) = state.lifecycle.on_disconnect(&chat_id, &connection_id).await {
        warn!(
            chat_id = %chat_id,
            connection_id = %connection_id,
            error = %e,
            "Failed to remove connection on disconnect"
        );
    }
    "Disconnected"
}

async fn inbound_message(
    State(state): State<AppState>,
    Path(connection_id): Path<String>,
    Query(query): Query<ChatQuery>,
    body: String,
) -> &'static str {
    let chat_id = query.chat_id(&state);
    state
        .lifecycle
        .on_inbound_message(&chat_id, &ConnectionId::from_string(connection_id), body)
        .await;
    "Ok"
}
