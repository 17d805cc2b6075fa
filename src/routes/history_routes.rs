use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::auth::AuthSession;
use crate::errors::AppError;
use crate::state::AppState;

/// GET `/api/history` — the caller's chats, newest first.
pub async fn history_handler(
    State(state): State<AppState>,
    session: AuthSession,
) -> Result<impl IntoResponse, AppError> {
    let chats = state.chat.history(&session.user).await?;
    Ok(Json(chats))
}
