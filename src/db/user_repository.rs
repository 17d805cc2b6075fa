use chrono::Utc;
use sqlx::PgPool;
use tracing::error;

use crate::errors::AppError;
use crate::models::{PlatformUser, User};

#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_external_id(&self, external_id: &str) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, User>(
            "SELECT id, email, external_id, created_at, last_login
             FROM users
             WHERE external_id = $1",
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to find user by external id {external_id}: {e}");
            AppError::db_query("Failed to find user", e)
        })
    }

    /// Maps a verified principal to a local user row, creating it on first
    /// sight and touching `last_login` otherwise.
    pub async fn find_or_create(&self, principal: &PlatformUser) -> Result<User, AppError> {
        if let Some(user) = self.find_by_external_id(&principal.id).await? {
            sqlx::query("UPDATE users SET last_login = $1 WHERE id = $2")
                .bind(Utc::now())
                .bind(&user.id)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    error!("Failed to touch last_login for user {}: {e}", user.id);
                    AppError::db_query("Failed to update user", e)
                })?;
            return Ok(user);
        }

        let now = Utc::now();
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            email: principal.email.clone(),
            external_id: principal.id.clone(),
            created_at: now,
            last_login: now,
        };
        sqlx::query(
            "INSERT INTO users (id, email, external_id, created_at, last_login)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (external_id) DO UPDATE SET last_login = $5",
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.external_id)
        .bind(user.created_at)
        .bind(user.last_login)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create user for principal {}: {e}", principal.id);
            AppError::db_query("Failed to create user", e)
        })?;

        // Re-read so a concurrent insert for the same principal still yields
        // the canonical row.
        self.find_by_external_id(&principal.id)
            .await?
            .ok_or_else(|| AppError::Unexpected("User row vanished after insert".into()))
    }
}
