use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{error, info};

use crate::errors::AppError;
use crate::models::{Chat, ChatVisibility};
use crate::service::chat_service::ChatStore;

#[derive(Clone)]
pub struct ChatRepository {
    pool: PgPool,
}

fn chat_from_row(row: sqlx::postgres::PgRow) -> Result<Chat, AppError> {
    let visibility: String = row
        .try_get("visibility")
        .map_err(|e| AppError::db_query("Failed to read visibility", e))?;
    Ok(Chat {
        id: row.try_get("id").map_err(|e| AppError::db_query("Failed to read id", e))?,
        user_id: row
            .try_get("user_id")
            .map_err(|e| AppError::db_query("Failed to read user_id", e))?,
        title: row.try_get("title").map_err(|e| AppError::db_query("Failed to read title", e))?,
        visibility: ChatVisibility::try_from(visibility)
            .map_err(|e| AppError::Unexpected(format!("Unknown chat visibility: {e}")))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| AppError::db_query("Failed to read created_at", e))?,
    })
}

impl ChatRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatStore for ChatRepository {
    /// The caller's chats, newest first.
    async fn find_by_user_id(&self, user_id: &str) -> Result<Vec<Chat>, AppError> {
        let rows = sqlx::query(
            "SELECT id, user_id, title, visibility, created_at
             FROM chats
             WHERE user_id = $1
             ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to fetch chats for user {user_id}: {e}");
            AppError::db_query("Failed to fetch chats", e)
        })?;

        rows.into_iter().map(chat_from_row).collect()
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Chat>, AppError> {
        sqlx::query(
            "SELECT id, user_id, title, visibility, created_at FROM chats WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to find chat {id}: {e}");
            AppError::db_query(format!("Failed to find chat {id}"), e)
        })?
        .map(chat_from_row)
        .transpose()
    }

    /// Inserts the chat row. A unique violation on the id yields
    /// `Ok(false)` so the ensure step stays idempotent under retries and
    /// concurrent turns.
    async fn save(&self, chat: &Chat) -> Result<bool, AppError> {
        let result = sqlx::query(
            "INSERT INTO chats (id, user_id, title, visibility, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&chat.id)
        .bind(&chat.user_id)
        .bind(&chat.title)
        .bind(chat.visibility.as_str())
        .bind(chat.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) if e.as_database_error().is_some_and(|d| d.is_unique_violation()) => {
                info!("Chat {} already exists, ensure is a no-op", chat.id);
                Ok(false)
            }
            Err(e) => {
                error!("Failed to save chat {}: {e}", chat.id);
                Err(AppError::db_query("Failed to save chat", e))
            }
        }
    }

    /// Removes a chat together with its messages and votes. One transaction:
    /// from the caller's perspective either all child rows and the parent
    /// row are gone, or none are.
    async fn delete_with_children(&self, id: &str) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to open delete transaction for chat {id}: {e}");
            AppError::db_query("Failed to open transaction", e)
        })?;

        sqlx::query("DELETE FROM votes WHERE chat_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::db_query("Failed to delete votes", e))?;
        sqlx::query("DELETE FROM messages WHERE chat_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::db_query("Failed to delete messages", e))?;
        sqlx::query("DELETE FROM chats WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::db_query("Failed to delete chat", e))?;

        tx.commit().await.map_err(|e| {
            error!("Failed to commit delete of chat {id}: {e}");
            AppError::db_query("Failed to commit chat delete", e)
        })
    }

    async fn update_visibility(
        &self,
        id: &str,
        visibility: ChatVisibility,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE chats SET visibility = $1 WHERE id = $2")
            .bind(visibility.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to update visibility of chat {id}: {e}");
                AppError::db_query("Failed to update chat visibility", e)
            })?;
        Ok(())
    }
}
