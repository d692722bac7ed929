//! Relay server core: shared state, WebSocket gateway, and message fan-out.
//!
//! Each connection arrives with an authenticated user identity, registers its
//! outbound channel, and enters a read loop. Every inbound frame is persisted
//! to the [`ConversationStore`] first, then pushed best-effort to whichever of
//! the conversation's two participants currently has a live channel. A failed
//! push is never retried — the message is durable and visible on the next
//! history fetch.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use marketchat_proto::frame::{self, ServerFrame};
use marketchat_proto::message::{ChatMessage, UserId, ValidationError, validate_content};
use serde::Deserialize;

use crate::config::RelayConfig;
use crate::history;
use crate::registry::ConnectionRegistry;
use crate::store::ConversationStore;

/// Shared relay server state: the connection registry and the conversation
/// store, plus the resolved limits.
pub struct RelayState {
    /// Live channel per user identity.
    pub registry: ConnectionRegistry,
    /// Durable conversations and messages.
    pub store: ConversationStore,
    /// Maximum allowed message content size in bytes.
    max_content_size: usize,
    /// Default and cap for history fetches.
    pub(crate) history_limit: usize,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates relay state with default limits and empty registry/store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&RelayConfig::default())
    }

    /// Creates relay state from a resolved [`RelayConfig`].
    #[must_use]
    pub fn with_config(config: &RelayConfig) -> Self {
        Self {
            registry: ConnectionRegistry::with_queue_size(config.outbound_queue_size),
            store: ConversationStore::new(),
            max_content_size: config.max_content_size,
            history_limit: config.history_limit,
        }
    }
}

/// Identity attached to the upgrade request by the external session layer.
#[derive(Debug, Deserialize)]
struct ConnectParams {
    #[serde(rename = "userId")]
    user_id: i64,
}

/// Handles one upgraded WebSocket connection.
///
/// Lifecycle: register the identity's channel, spawn a writer task draining
/// the bounded outbound queue, read frames until error or close, then tear
/// down — deregistering exactly once, and only if this connection still owns
/// the registry entry.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>, user: UserId) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (handle, mut rx) = state.registry.open_channel();
    let channel_id = handle.id();

    if state.registry.register(user, handle).await.is_some() {
        // The previous connection keeps draining until its client goes away;
        // its teardown deregister will no longer match.
        tracing::info!(user = %user, "superseded existing connection for identity");
    }
    tracing::info!(user = %user, channel = %channel_id, "connection open");

    // Writer task: forward queued frames to the socket until the queue closes
    // (teardown or supersession) or the socket rejects a write.
    let writer_user = user;
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(user = %writer_user, "WebSocket write failed");
                break;
            }
        }
    });

    // Reader loop: one task per connection, feeding frames to the engine.
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_text_frame(&reader_state, user, text.as_str()).await;
                }
                Message::Close(_) => {
                    tracing::info!(user = %user, "received close frame");
                    break;
                }
                _ => {
                    // Ignore binary, ping, pong frames.
                }
            }
        }
    });

    // Wait for either task to finish, then abort the other.
    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    // Single teardown path; a stale entry (fast reconnect) is left alone.
    let removed = state.registry.deregister(user, channel_id).await;
    tracing::info!(user = %user, channel = %channel_id, removed, "connection closed");
}

/// Turns one inbound frame into a persisted message and a best-effort push
/// to both participants.
///
/// No failure here closes the connection: malformed frames are dropped
/// silently (logged only), rejected appends are answered with an error frame,
/// and push failures stay internal.
pub async fn handle_text_frame(state: &Arc<RelayState>, sender: UserId, text: &str) {
    let frame = match frame::decode_client(text) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(user = %sender, error = %e, "dropping malformed frame");
            return;
        }
    };

    match validate_content(&frame.content, state.max_content_size) {
        Ok(()) => {}
        Err(e @ ValidationError::Empty) => {
            tracing::warn!(user = %sender, error = %e, "dropping frame with empty content");
            return;
        }
        Err(e @ ValidationError::TooLarge { .. }) => {
            tracing::warn!(user = %sender, error = %e, "rejecting oversized frame");
            send_error(state, sender, &e.to_string()).await;
            return;
        }
    }

    // Persist first; only a durably stored message is ever delivered.
    let outcome = match state
        .store
        .append_message(frame.conversation_id, sender, frame.content)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::warn!(
                user = %sender,
                conversation = %frame.conversation_id,
                error = %e,
                "append rejected"
            );
            send_error(state, sender, &e.to_string()).await;
            return;
        }
    };

    let (a, b) = outcome.participants;
    deliver(state, a, &outcome.message).await;
    if b != a {
        deliver(state, b, &outcome.message).await;
    }
}

/// Pushes a persisted message to a participant's live channel, if any.
///
/// Fire-and-forget: an absent channel, a full queue, or a concurrently
/// closed connection all just drop the push — the message remains
/// recoverable via the history path.
async fn deliver(state: &Arc<RelayState>, recipient: UserId, message: &ChatMessage) {
    let Some(handle) = state.registry.lookup(recipient).await else {
        tracing::debug!(user = %recipient, message = %message.id, "recipient offline, push skipped");
        return;
    };
    match frame::encode_server(&ServerFrame::Message(message.clone())) {
        Ok(text) => {
            if let Err(e) = handle.push(Message::Text(text.into())) {
                tracing::warn!(user = %recipient, message = %message.id, error = %e, "push dropped");
            }
        }
        Err(e) => {
            tracing::error!(message = %message.id, error = %e, "failed to encode push frame");
        }
    }
}

/// Sends an error frame back to a sender's live channel, best-effort.
async fn send_error(state: &Arc<RelayState>, user: UserId, reason: &str) {
    let Some(handle) = state.registry.lookup(user).await else {
        return;
    };
    if let Ok(text) = frame::encode_server(&ServerFrame::Error {
        error: reason.to_string(),
    }) {
        let _ = handle.push(Message::Text(text.into()));
    }
}

/// Starts the relay server on the given address and returns the bound
/// address and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// Use [`RelayState::with_config`] to build the state from a resolved
/// [`RelayConfig`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .route(
            "/api/conversations",
            axum::routing::post(history::create_conversation).get(history::list_conversations),
        )
        .route(
            "/api/conversations/{id}/messages",
            axum::routing::get(history::list_messages),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
///
/// The `userId` query parameter carries the identity resolved by the external
/// session layer; a request without a resolvable identity is refused before
/// the upgrade.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::Query(params): axum::extract::Query<ConnectParams>,
    axum::extract::State(state): axum::extract::State<Arc<RelayState>>,
) -> impl axum::response::IntoResponse {
    let user = UserId(params.user_id);
    ws.on_upgrade(move |socket| handle_socket(socket, state, user))
}
