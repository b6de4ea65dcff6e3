//! SQLite conversation repository implementation.
//!
//! Implements `ConversationRepository` from `pumplink-core` using sqlx with
//! split read/write pools: raw queries, private Row structs, reader pool
//! for SELECTs and the single-writer pool for mutations.

use chrono::{DateTime, Utc};
use pumplink_core::repository::ConversationRepository;
use pumplink_types::conversation::{Conversation, Message};
use pumplink_types::error::RepositoryError;
use pumplink_types::identity::UserIdentity;
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use super::pool::DatabasePool;

/// Longest title derived from the first user message.
const TITLE_MAX_CHARS: usize = 60;

/// SQLite-backed implementation of `ConversationRepository`.
pub struct SqliteConversationRepository {
    pool: DatabasePool,
}

impl SqliteConversationRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct ConversationRow {
    id: String,
    user_id: String,
    title: Option<String>,
    created_at: String,
    updated_at: String,
}

impl ConversationRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            title: row.try_get("title")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_conversation(self) -> Result<Conversation, RepositoryError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| RepositoryError::Query(format!("invalid conversation id: {e}")))?;
        Ok(Conversation {
            id,
            user_id: self.user_id,
            title: self.title,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

struct MessageRow {
    id: String,
    conversation_id: String,
    author: String,
    content: String,
    created_at: String,
    is_assistant: bool,
    deleted: bool,
}

impl MessageRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            conversation_id: row.try_get("conversation_id")?,
            author: row.try_get("author")?,
            content: row.try_get("content")?,
            created_at: row.try_get("created_at")?,
            is_assistant: row.try_get("is_assistant")?,
            deleted: row.try_get("deleted")?,
        })
    }

    fn into_message(self) -> Result<Message, RepositoryError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| RepositoryError::Query(format!("invalid message id: {e}")))?;
        let conversation_id = Uuid::parse_str(&self.conversation_id)
            .map_err(|e| RepositoryError::Query(format!("invalid conversation_id: {e}")))?;
        Ok(Message {
            id,
            conversation_id,
            author: self.author,
            text: self.content,
            created_at: parse_datetime(&self.created_at)?,
            is_assistant: self.is_assistant,
            deleted: self.deleted,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Derive a conversation title from the first user message.
fn derive_title(text: &str) -> String {
    let first_line = text.trim().lines().next().unwrap_or("");
    first_line.chars().take(TITLE_MAX_CHARS).collect()
}

// ---------------------------------------------------------------------------
// ConversationRepository implementation
// ---------------------------------------------------------------------------

impl ConversationRepository for SqliteConversationRepository {
    async fn find_or_create_conversation(
        &self,
        user: &UserIdentity,
        conversation_id: Option<Uuid>,
    ) -> Result<Conversation, RepositoryError> {
        if let Some(id) = conversation_id {
            let row = sqlx::query("SELECT * FROM conversations WHERE id = ? AND user_id = ?")
                .bind(id.to_string())
                .bind(&user.user_id)
                .fetch_optional(&self.pool.reader)
                .await
                .map_err(|e| RepositoryError::Query(e.to_string()))?;

            if let Some(row) = row {
                let conversation_row = ConversationRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                return conversation_row.into_conversation();
            }

            // Unknown or foreign id: fall through to creation. This is the
            // adapter's contract, not an error path.
            debug!(
                conversation_id = %id,
                user_id = %user.user_id,
                "Referenced conversation not owned by caller, creating a new one"
            );
        }

        let conversation = Conversation {
            id: Uuid::now_v7(),
            user_id: user.user_id.clone(),
            title: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO conversations (id, user_id, title, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(conversation.id.to_string())
        .bind(&conversation.user_id)
        .bind(&conversation.title)
        .bind(format_datetime(&conversation.created_at))
        .bind(format_datetime(&conversation.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(conversation)
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        author: &str,
        text: &str,
        is_assistant: bool,
    ) -> Result<Message, RepositoryError> {
        let message = Message {
            id: Uuid::now_v7(),
            conversation_id,
            author: author.to_string(),
            text: text.to_string(),
            created_at: Utc::now(),
            is_assistant,
            deleted: false,
        };

        sqlx::query(
            r#"INSERT INTO messages (id, conversation_id, author, content, created_at, is_assistant, deleted)
               VALUES (?, ?, ?, ?, ?, ?, 0)"#,
        )
        .bind(message.id.to_string())
        .bind(message.conversation_id.to_string())
        .bind(&message.author)
        .bind(&message.text)
        .bind(format_datetime(&message.created_at))
        .bind(message.is_assistant)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(format_datetime(&message.created_at))
            .bind(conversation_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        // First user message names the conversation.
        if !is_assistant {
            sqlx::query("UPDATE conversations SET title = ? WHERE id = ? AND title IS NULL")
                .bind(derive_title(text))
                .bind(conversation_id.to_string())
                .execute(&self.pool.writer)
                .await
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
        }

        Ok(message)
    }

    async fn load_recent_messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM messages
               WHERE conversation_id = ? AND deleted = 0
               ORDER BY created_at DESC, seq DESC
               LIMIT ?"#,
        )
        .bind(conversation_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            let message_row =
                MessageRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            messages.push(message_row.into_message()?);
        }

        // Fetched most-recent-first to honor the limit; the caller-facing
        // contract is ascending chronological order.
        messages.reverse();
        Ok(messages)
    }
}
