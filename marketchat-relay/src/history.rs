//! Conversation HTTP endpoints: the non-real-time path.
//!
//! Clients open conversations and reconcile missed messages here; the relay's
//! delivery policy leans on this path (a failed push is recovered by a
//! history fetch after reconnect).

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use marketchat_proto::message::{ConversationId, ListingId, UserId};
use serde::Deserialize;

use crate::relay::RelayState;
use crate::store::StoreError;

/// Hard cap on a single history fetch regardless of the requested limit.
const MAX_HISTORY_LIMIT: usize = 200;

/// Body of `POST /api/conversations`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    /// The buyer opening the conversation.
    pub buyer_id: i64,
    /// The seller who owns the listing.
    pub seller_id: i64,
    /// The listing being discussed.
    pub listing_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct ParticipantQuery {
    #[serde(rename = "userId")]
    user_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    limit: Option<usize>,
}

/// `POST /api/conversations` — find-or-create by (buyer, seller, listing).
///
/// Idempotent: repeating the request returns the existing conversation.
pub async fn create_conversation(
    State(state): State<Arc<RelayState>>,
    Json(req): Json<CreateConversationRequest>,
) -> Response {
    let conversation = state
        .store
        .find_or_create_conversation(
            UserId(req.buyer_id),
            UserId(req.seller_id),
            ListingId(req.listing_id),
        )
        .await;
    (StatusCode::OK, Json(conversation)).into_response()
}

/// `GET /api/conversations?userId=<id>` — conversations the user is in.
pub async fn list_conversations(
    State(state): State<Arc<RelayState>>,
    Query(params): Query<ParticipantQuery>,
) -> Response {
    let conversations = state.store.conversations_for(UserId(params.user_id)).await;
    (StatusCode::OK, Json(conversations)).into_response()
}

/// `GET /api/conversations/{id}/messages?limit=<n>` — recent messages,
/// oldest first.
///
/// The limit defaults to the configured history size and is capped at
/// [`MAX_HISTORY_LIMIT`]. Unknown conversations get a 404.
pub async fn list_messages(
    State(state): State<Arc<RelayState>>,
    Path(id): Path<i64>,
    Query(params): Query<HistoryQuery>,
) -> Response {
    let conversation_id = ConversationId(id);
    if let Err(e @ StoreError::NotFound(_)) = state.store.participants(conversation_id).await {
        return api_error(StatusCode::NOT_FOUND, e.to_string());
    }

    let limit = params
        .limit
        .unwrap_or(state.history_limit)
        .min(MAX_HISTORY_LIMIT);
    let messages = state.store.recent_messages(conversation_id, limit).await;
    (StatusCode::OK, Json(messages)).into_response()
}

/// Builds a JSON error response of the shape `{"error": <message>}`.
fn api_error(status: StatusCode, message: String) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}
