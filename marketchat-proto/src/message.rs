//! Persisted data shapes shared between the relay and its clients.
//!
//! All types in this module mirror rows in the conversation store and are
//! serialized as camelCase JSON, matching what the web clients consume over
//! both the WebSocket push path and the HTTP history path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum allowed message content size in bytes (64 KB).
pub const MAX_CONTENT_SIZE: usize = 64 * 1024;

/// Stable identifier of an authenticated user, used as the registry key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a two-party conversation scoped to one listing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ConversationId(pub i64);

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a persisted message within a conversation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies the marketplace listing a conversation is about.
///
/// Listings themselves live in the marketplace's own storage; the relay only
/// carries the reference.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ListingId(pub i64);

impl std::fmt::Display for ListingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A durable two-party conversation about one listing.
///
/// Immutable after creation. The buyer/seller pair is unordered for
/// uniqueness purposes: one conversation exists per participant pair per
/// listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Store-assigned conversation id.
    pub id: ConversationId,
    /// The buyer who opened the conversation.
    pub buyer_id: UserId,
    /// The seller who owns the listing.
    pub seller_id: UserId,
    /// The listing being discussed.
    pub listing_id: ListingId,
    /// When the conversation row was created.
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// Returns `true` if `user` is one of the two participants.
    #[must_use]
    pub fn has_participant(&self, user: UserId) -> bool {
        self.buyer_id == user || self.seller_id == user
    }

    /// Returns both participant ids as a pair.
    #[must_use]
    pub const fn participants(&self) -> (UserId, UserId) {
        (self.buyer_id, self.seller_id)
    }
}

/// A persisted chat message.
///
/// `id` and `created_at` are assigned by the store at persistence time;
/// `created_at` is the ordering key for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Store-assigned message id.
    pub id: MessageId,
    /// Conversation this message belongs to.
    pub conversation_id: ConversationId,
    /// The participant who sent the message.
    pub sender_id: UserId,
    /// Plain text message body.
    pub content: String,
    /// Persistence timestamp, serialized as ISO-8601.
    pub created_at: DateTime<Utc>,
}

/// Error returned when message content fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Message content is empty.
    #[error("message content is empty")]
    Empty,
    /// Message content exceeds the maximum allowed size.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Actual size of the content in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

/// Validates message content before persistence.
///
/// Checks that the content is non-empty and within `max` bytes.
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] or [`ValidationError::TooLarge`].
pub const fn validate_content(content: &str, max: usize) -> Result<(), ValidationError> {
    if content.is_empty() {
        return Err(ValidationError::Empty);
    }
    let size = content.len();
    if size > max {
        return Err(ValidationError::TooLarge { size, max });
    }
    Ok(())
}
