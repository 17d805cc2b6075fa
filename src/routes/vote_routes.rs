use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::auth::AuthSession;
use crate::errors::AppError;
use crate::models::VoteRequest;
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteParams {
    #[serde(default)]
    pub chat_id: Option<String>,
}

/// GET `/api/vote?chatId=<id>` — votes recorded for one chat.
pub async fn list_votes_handler(
    State(state): State<AppState>,
    _session: AuthSession,
    Query(params): Query<VoteParams>,
) -> Result<impl IntoResponse, AppError> {
    let chat_id = params
        .chat_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::MissingField { field_name: "chatId".into() })?;
    let votes = state.chat.votes(&chat_id).await?;
    Ok(Json(votes))
}

/// PATCH `/api/vote` — records an up/down vote on a message, replacing any
/// earlier vote on it.
pub async fn vote_handler(
    State(state): State<AppState>,
    _session: AuthSession,
    Json(request): Json<VoteRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.chat.vote(&request).await?;
    Ok("OK")
}
