//! Conversation and message types for Pumplink.
//!
//! A conversation is a titled, user-owned, ordered collection of messages.
//! Messages form an append-only log: once created they are never mutated,
//! only soft-deleted. Ordering is by `created_at`, with ties broken by the
//! repository's insertion sequence (internal to the storage layer).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Author sentinel used for assistant-generated turns.
///
/// User turns carry the owning user's id in `Message::author` instead.
pub const ASSISTANT_AUTHOR: &str = "assistant";

/// Title shown for conversations that have not yet derived one from the
/// first user message.
pub const UNTITLED_CONVERSATION: &str = "New conversation";

/// A user-owned chat conversation.
///
/// Created lazily on the first chat event of a connection with no bound
/// conversation, or explicitly via the `new_conversation` wire event.
/// Mutated only by appending messages; the title is derived from the
/// first user message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub user_id: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// The title to present on the wire, falling back to a placeholder
    /// when none has been derived yet.
    pub fn display_title(&self) -> String {
        self.title
            .clone()
            .unwrap_or_else(|| UNTITLED_CONVERSATION.to_string())
    }
}

/// One immutable turn in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    /// User id of the author, or [`ASSISTANT_AUTHOR`] for generated turns.
    pub author: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub is_assistant: bool,
    /// Soft-delete marker. Deleted messages are filtered out of reads but
    /// never removed from the log.
    #[serde(default)]
    pub deleted: bool,
}
