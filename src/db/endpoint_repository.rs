use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tracing::error;

use crate::errors::AppError;
use crate::models::{CustomModelEndpoint, Model, ModelBackend};
use crate::registry::CustomCatalog;

const PROVIDER_TYPE: &str = "openai-compatible";

#[derive(Clone)]
pub struct EndpointRepository {
    pool: PgPool,
}

impl EndpointRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The caller's active endpoints. Deactivated rows are kept but never
    /// listed.
    pub async fn find_active_by_user_id(
        &self,
        user_id: &str,
    ) -> Result<Vec<CustomModelEndpoint>, AppError> {
        sqlx::query_as::<_, CustomModelEndpoint>(
            "SELECT id, user_id, name, uri, api_key, provider_type, is_active,
                    created_at, updated_at
             FROM custom_model_endpoints
             WHERE user_id = $1 AND is_active = TRUE
             ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to fetch endpoints for user {user_id}: {e}");
            AppError::db_query("Failed to fetch model endpoints", e)
        })
    }

    pub async fn create(
        &self,
        user_id: &str,
        name: &str,
        uri: &str,
        api_key: Option<&str>,
    ) -> Result<CustomModelEndpoint, AppError> {
        let now = Utc::now();
        let endpoint = CustomModelEndpoint {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            uri: uri.to_string(),
            api_key: api_key.map(str::to_string),
            provider_type: PROVIDER_TYPE.to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO custom_model_endpoints
                 (id, user_id, name, uri, api_key, provider_type, is_active,
                  created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&endpoint.id)
        .bind(&endpoint.user_id)
        .bind(&endpoint.name)
        .bind(&endpoint.uri)
        .bind(&endpoint.api_key)
        .bind(&endpoint.provider_type)
        .bind(endpoint.is_active)
        .bind(endpoint.created_at)
        .bind(endpoint.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create endpoint '{name}' for user {user_id}: {e}");
            AppError::db_query("Failed to create model endpoint", e)
        })?;

        Ok(endpoint)
    }

    /// Soft delete: rows are deactivated, not removed.
    pub async fn deactivate(&self, id: &str, user_id: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE custom_model_endpoints
             SET is_active = FALSE, updated_at = $1
             WHERE id = $2 AND user_id = $3",
        )
        .bind(Utc::now())
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to deactivate endpoint {id}: {e}");
            AppError::db_query("Failed to deactivate model endpoint", e)
        })?;
        Ok(result.rows_affected() > 0)
    }
}

/// Catalog entry for a user-registered endpoint; the endpoint id doubles as
/// the model id.
pub fn map_endpoint_to_model(endpoint: &CustomModelEndpoint) -> Model {
    Model {
        id: endpoint.id.clone(),
        label: endpoint.name.clone(),
        api_identifier: endpoint.name.clone(),
        description: format!("Custom endpoint: {}", endpoint.uri),
        backend: ModelBackend::Custom {
            uri: endpoint.uri.clone(),
            api_key: endpoint.api_key.clone(),
        },
    }
}

#[async_trait]
impl CustomCatalog for EndpointRepository {
    async fn custom_models(&self, user_id: &str) -> Result<Vec<Model>, AppError> {
        let endpoints = self.find_active_by_user_id(user_id).await?;
        Ok(endpoints.iter().map(map_endpoint_to_model).collect())
    }
}
