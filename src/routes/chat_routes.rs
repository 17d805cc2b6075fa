use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures_util::stream;
use serde::Deserialize;

use crate::auth::AuthSession;
use crate::errors::AppError;
use crate::models::{TurnRequest, UpdateVisibilityRequest};
use crate::state::AppState;

/// POST `/api/chat` — runs one turn and streams the delta protocol back as
/// SSE. Failures before generation starts surface as plain HTTP statuses;
/// once the stream is open, a failure simply ends it without a `finish`
/// event.
pub async fn chat_handler(
    State(state): State<AppState>,
    session: AuthSession,
    Json(request): Json<TurnRequest>,
) -> Result<impl IntoResponse, AppError> {
    let rx = state.chat.run_turn(&session.user, request).await?;

    let events = stream::unfold(rx, |mut rx| async move {
        let delta = rx.recv().await?;
        Some((Event::default().json_data(&delta), rx))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[derive(Deserialize)]
pub struct DeleteChatParams {
    #[serde(default)]
    pub id: Option<String>,
}

/// DELETE `/api/chat?id=<id>` — removes the caller's chat with its messages
/// and votes.
pub async fn delete_chat_handler(
    State(state): State<AppState>,
    session: AuthSession,
    Query(params): Query<DeleteChatParams>,
) -> Result<impl IntoResponse, AppError> {
    let id = params
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::MissingField { field_name: "id".into() })?;
    state.chat.delete_chat(&id, &session.user).await?;
    Ok("OK")
}

/// PATCH `/api/chat` — flips a chat between private and public.
pub async fn update_visibility_handler(
    State(state): State<AppState>,
    session: AuthSession,
    Json(request): Json<UpdateVisibilityRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .chat
        .update_visibility(&request.chat_id, &session.user, request.visibility)
        .await?;
    Ok("OK")
}

/// GET `/api/chat/{id}/messages` — finalized messages of one chat in
/// conversation order. This is the channel through which the client's
/// reconciler absorbs authoritative messages.
pub async fn list_messages_handler(
    State(state): State<AppState>,
    session: AuthSession,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let messages = state.chat.messages(&id, &session.user).await?;
    Ok(Json(messages))
}
