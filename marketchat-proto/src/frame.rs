//! Wire frames exchanged over the persistent connection.
//!
//! The protocol is one JSON object per WebSocket text frame. Clients send
//! [`ClientFrame`] values; the relay pushes [`ServerFrame`] values. The relay
//! never inspects more than routing metadata and content.

use serde::{Deserialize, Serialize};

use crate::message::{ChatMessage, ConversationId};

/// Error type for frame encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The frame was not valid JSON or did not match the expected shape.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// An inbound frame from a connected client.
///
/// Wire shape: `{"conversationId": <int>, "content": <string>}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientFrame {
    /// The conversation the message is addressed to.
    pub conversation_id: ConversationId,
    /// Plain text message body.
    pub content: String,
}

/// An outbound frame pushed by the relay.
///
/// A delivered message is serialized as the bare persisted object (no
/// envelope), so the wire shape matches the HTTP history path. Error frames
/// carry a single `error` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    /// A persisted message delivered to a participant.
    Message(ChatMessage),
    /// The sender's last frame was rejected.
    Error {
        /// Human-readable reason.
        error: String,
    },
}

/// Decodes an inbound client frame from a WebSocket text payload.
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] if the payload is not a JSON object of
/// the expected shape.
pub fn decode_client(text: &str) -> Result<ClientFrame, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Encodes an inbound client frame (used by clients and test harnesses).
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] if serialization fails.
pub fn encode_client(frame: &ClientFrame) -> Result<String, CodecError> {
    Ok(serde_json::to_string(frame)?)
}

/// Encodes an outbound server frame for a WebSocket text payload.
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] if serialization fails.
pub fn encode_server(frame: &ServerFrame) -> Result<String, CodecError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decodes an outbound server frame (used by clients and test harnesses).
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] if the payload matches neither the
/// message shape nor the error shape.
pub fn decode_server(text: &str) -> Result<ServerFrame, CodecError> {
    Ok(serde_json::from_str(text)?)
}
