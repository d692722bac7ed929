//! Process-local conversation store.
//!
//! Holds the durable record of conversations (two-party identity pairs plus
//! the listing under discussion) and of the messages within them. The store's
//! write lock is the sole serialization point for concurrent appends: message
//! ids and `created_at` timestamps are assigned under it, so persist order
//! equals insert order even when both participants send at once.

use std::collections::HashMap;

use chrono::Utc;
use marketchat_proto::message::{
    ChatMessage, Conversation, ConversationId, ListingId, MessageId, UserId,
};
use tokio::sync::RwLock;

/// Errors returned when an append or participant lookup is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The conversation does not exist.
    #[error("conversation {0} not found")]
    NotFound(ConversationId),
    /// The sender is not one of the conversation's two participants.
    #[error("user {user} is not a participant of conversation {conversation}")]
    NotParticipant {
        /// The conversation that rejected the append.
        conversation: ConversationId,
        /// The offending sender.
        user: UserId,
    },
}

/// Result of a successful append.
///
/// Carries both participant ids alongside the persisted message so the relay
/// can fan out without a second store round-trip.
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    /// The message as persisted, with store-assigned id and timestamp.
    pub message: ChatMessage,
    /// Both participants of the target conversation.
    pub participants: (UserId, UserId),
}

#[derive(Default)]
struct StoreInner {
    conversations: HashMap<ConversationId, Conversation>,
    messages: HashMap<ConversationId, Vec<ChatMessage>>,
    next_conversation_id: i64,
    next_message_id: i64,
}

/// In-memory conversation and message tables.
///
/// Thread-safe via [`RwLock`]. Conversations are immutable after creation;
/// messages are immutable once persisted.
pub struct ConversationStore {
    inner: RwLock<StoreInner>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
        }
    }

    /// Returns the conversation for `(buyer, seller, listing)`, creating it
    /// if absent.
    ///
    /// Idempotent: repeated calls for the same triple return the existing
    /// row. The participant pair is matched unordered, so a swapped-role
    /// request also resolves to the existing conversation instead of
    /// creating a mirror duplicate.
    pub async fn find_or_create_conversation(
        &self,
        buyer: UserId,
        seller: UserId,
        listing: ListingId,
    ) -> Conversation {
        let mut inner = self.inner.write().await;

        if let Some(existing) = inner.conversations.values().find(|c| {
            c.listing_id == listing
                && ((c.buyer_id == buyer && c.seller_id == seller)
                    || (c.buyer_id == seller && c.seller_id == buyer))
        }) {
            return existing.clone();
        }

        inner.next_conversation_id += 1;
        let conversation = Conversation {
            id: ConversationId(inner.next_conversation_id),
            buyer_id: buyer,
            seller_id: seller,
            listing_id: listing,
            created_at: Utc::now(),
        };
        inner
            .conversations
            .insert(conversation.id, conversation.clone());
        conversation
    }

    /// Persists a message, assigning its id and timestamp under the write
    /// lock.
    ///
    /// The existence and participant checks happen atomically with the
    /// insert, so a message can never be admitted for a missing conversation
    /// or from a third party.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] or [`StoreError::NotParticipant`];
    /// nothing is persisted on error.
    pub async fn append_message(
        &self,
        conversation_id: ConversationId,
        sender: UserId,
        content: String,
    ) -> Result<AppendOutcome, StoreError> {
        let mut inner = self.inner.write().await;

        let conversation = inner
            .conversations
            .get(&conversation_id)
            .ok_or(StoreError::NotFound(conversation_id))?;
        if !conversation.has_participant(sender) {
            return Err(StoreError::NotParticipant {
                conversation: conversation_id,
                user: sender,
            });
        }
        let participants = conversation.participants();

        inner.next_message_id += 1;
        let message = ChatMessage {
            id: MessageId(inner.next_message_id),
            conversation_id,
            sender_id: sender,
            content,
            created_at: Utc::now(),
        };
        inner
            .messages
            .entry(conversation_id)
            .or_default()
            .push(message.clone());

        Ok(AppendOutcome {
            message,
            participants,
        })
    }

    /// Returns both participant ids of a conversation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the conversation does not exist.
    pub async fn participants(
        &self,
        conversation_id: ConversationId,
    ) -> Result<(UserId, UserId), StoreError> {
        let inner = self.inner.read().await;
        inner
            .conversations
            .get(&conversation_id)
            .map(Conversation::participants)
            .ok_or(StoreError::NotFound(conversation_id))
    }

    /// Returns the newest `limit` messages of a conversation, oldest first.
    ///
    /// Unknown conversations yield an empty list; callers that need a
    /// not-found distinction check [`Self::participants`] first.
    pub async fn recent_messages(
        &self,
        conversation_id: ConversationId,
        limit: usize,
    ) -> Vec<ChatMessage> {
        let inner = self.inner.read().await;
        inner.messages.get(&conversation_id).map_or_else(Vec::new, |msgs| {
            let skip = msgs.len().saturating_sub(limit);
            msgs[skip..].to_vec()
        })
    }

    /// Returns every conversation `user` participates in.
    pub async fn conversations_for(&self, user: UserId) -> Vec<Conversation> {
        let inner = self.inner.read().await;
        let mut conversations: Vec<Conversation> = inner
            .conversations
            .values()
            .filter(|c| c.has_participant(user))
            .cloned()
            .collect();
        conversations.sort_by_key(|c| c.id);
        conversations
    }
}
