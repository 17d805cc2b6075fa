use sqlx::PgPool;
use tracing::error;

use crate::errors::AppError;
use crate::models::Vote;

#[derive(Clone)]
pub struct VoteRepository {
    pool: PgPool,
}

impl VoteRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_chat_id(&self, chat_id: &str) -> Result<Vec<Vote>, AppError> {
        sqlx::query_as::<_, Vote>(
            "SELECT chat_id, message_id, is_upvoted FROM votes WHERE chat_id = $1",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to fetch votes for chat {chat_id}: {e}");
            AppError::db_query("Failed to fetch votes", e)
        })
    }

    /// Records a vote, replacing any previous vote on the same message.
    pub async fn upsert(&self, vote: &Vote) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO votes (chat_id, message_id, is_upvoted)
             VALUES ($1, $2, $3)
             ON CONFLICT (chat_id, message_id) DO UPDATE SET is_upvoted = $3",
        )
        .bind(&vote.chat_id)
        .bind(&vote.message_id)
        .bind(vote.is_upvoted)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to save vote on message {}: {e}", vote.message_id);
            AppError::db_query("Failed to save vote", e)
        })?;
        Ok(())
    }
}
