use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::auth::AuthSession;
use crate::errors::AppError;
use crate::models::CreateEndpointRequest;
use crate::state::AppState;

/// GET `/api/models` — the current catalog, hosted models first, then the
/// caller's custom endpoints.
pub async fn list_models_handler(
    State(state): State<AppState>,
    session: AuthSession,
) -> Result<impl IntoResponse, AppError> {
    let catalog = state.registry.refresh(Some(&session.user.id)).await?;
    Ok(Json(catalog.as_ref().clone()))
}

/// GET `/api/model-endpoints` — the caller's active custom endpoints.
pub async fn list_endpoints_handler(
    State(state): State<AppState>,
    session: AuthSession,
) -> Result<impl IntoResponse, AppError> {
    let endpoints = state.endpoints.find_active_by_user_id(&session.user.id).await?;
    Ok(Json(endpoints))
}

/// POST `/api/model-endpoints` — registers a custom OpenAI-compatible
/// endpoint for the caller.
pub async fn create_endpoint_handler(
    State(state): State<AppState>,
    session: AuthSession,
    Json(request): Json<CreateEndpointRequest>,
) -> Result<impl IntoResponse, AppError> {
    if request.name.trim().is_empty() {
        return Err(AppError::MissingField { field_name: "name".into() });
    }
    if request.uri.trim().is_empty() {
        return Err(AppError::MissingField { field_name: "uri".into() });
    }

    let endpoint = state
        .endpoints
        .create(
            &session.user.id,
            request.name.trim(),
            request.uri.trim(),
            request.api_key.as_deref(),
        )
        .await?;

    // The shared catalog now lags behind the endpoint table; rebuild it so
    // the new model is immediately resolvable.
    state.registry.refresh(Some(&session.user.id)).await?;

    Ok(Json(endpoint))
}

#[derive(Deserialize)]
pub struct DeleteEndpointParams {
    #[serde(default)]
    pub id: Option<String>,
}

/// DELETE `/api/model-endpoints?id=<id>` — soft-deletes via the `is_active`
/// flag; the row is kept.
pub async fn delete_endpoint_handler(
    State(state): State<AppState>,
    session: AuthSession,
    Query(params): Query<DeleteEndpointParams>,
) -> Result<impl IntoResponse, AppError> {
    let id = params
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::MissingField { field_name: "id".into() })?;

    let deactivated = state.endpoints.deactivate(&id, &session.user.id).await?;
    if !deactivated {
        return Err(AppError::RecordNotFound { entity_type: "model endpoint".into(), id });
    }

    state.registry.refresh(Some(&session.user.id)).await?;
    Ok("OK")
}
