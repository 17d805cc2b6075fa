use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::error;

use crate::errors::AppError;
use crate::models::{Message, MessageRole};
use crate::service::chat_service::MessageStore;

#[derive(Clone)]
pub struct MessageRepository {
    pool: PgPool,
}

impl MessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for MessageRepository {
    /// Messages of one chat in conversation order: `created_at` ascending,
    /// insertion order as the tie-break.
    async fn find_by_chat_id(&self, chat_id: &str) -> Result<Vec<Message>, AppError> {
        let rows = sqlx::query(
            "SELECT id, chat_id, role, content, created_at
             FROM messages
             WHERE chat_id = $1
             ORDER BY created_at ASC, seq ASC",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to fetch messages for chat {chat_id}: {e}");
            AppError::db_query(format!("Failed to fetch messages for chat {chat_id}"), e)
        })?;

        rows.into_iter()
            .map(|row: sqlx::postgres::PgRow| {
                let role_str: String = row
                    .try_get("role")
                    .map_err(|e| AppError::db_query("Failed to read role", e))?;
                let role = MessageRole::try_from(role_str)
                    .map_err(|e| AppError::Unexpected(format!("Unknown message role: {e}")))?;
                Ok(Message {
                    id: row
                        .try_get("id")
                        .map_err(|e| AppError::db_query("Failed to read id", e))?,
                    chat_id: row
                        .try_get("chat_id")
                        .map_err(|e| AppError::db_query("Failed to read chat_id", e))?,
                    role,
                    content: row
                        .try_get("content")
                        .map_err(|e| AppError::db_query("Failed to read content", e))?,
                    created_at: row
                        .try_get("created_at")
                        .map_err(|e| AppError::db_query("Failed to read created_at", e))?,
                })
            })
            .collect()
    }

    /// Appends a message row. Rows are created once and never updated.
    async fn save(&self, message: &Message) -> Result<Message, AppError> {
        sqlx::query(
            "INSERT INTO messages (id, chat_id, role, content, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&message.id)
        .bind(&message.chat_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to save message {}: {e}", message.id);
            AppError::db_query("Failed to save message", e)
        })?;
        Ok(message.clone())
    }
}
