//! ConversationRepository trait definition.
//!
//! The durable store is consumed exclusively through these three
//! operations. All mutation is append-only; callers serialize
//! same-conversation appends at the session level (one FIFO worker per
//! connection), so the store only needs atomic per-row writes.

use pumplink_types::conversation::{Conversation, Message};
use pumplink_types::error::RepositoryError;
use pumplink_types::identity::UserIdentity;
use uuid::Uuid;

/// Repository trait for conversation and message persistence.
///
/// Implementations live in pumplink-infra (e.g., `SqliteConversationRepository`).
/// Uses native async fn in traits (RPITIT, Rust 2024 edition).
pub trait ConversationRepository: Send + Sync {
    /// Resolve a conversation for a user, creating one when needed.
    ///
    /// When `conversation_id` is given and owned by `user`, that
    /// conversation is returned. In every other case -- no id, unknown
    /// id, or an id owned by someone else -- a fresh conversation is
    /// created and returned. Absence is never an error here; callers
    /// must treat the fall-through to creation as expected.
    fn find_or_create_conversation(
        &self,
        user: &UserIdentity,
        conversation_id: Option<Uuid>,
    ) -> impl std::future::Future<Output = Result<Conversation, RepositoryError>> + Send;

    /// Append an immutable message with a server-assigned id and timestamp.
    ///
    /// Never mutates existing messages. Safe to call concurrently for
    /// different conversations.
    fn append_message(
        &self,
        conversation_id: Uuid,
        author: &str,
        text: &str,
        is_assistant: bool,
    ) -> impl std::future::Future<Output = Result<Message, RepositoryError>> + Send;

    /// Up to `limit` most recent non-deleted messages, in ascending
    /// chronological order.
    fn load_recent_messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
    ) -> impl std::future::Future<Output = Result<Vec<Message>, RepositoryError>> + Send;
}
