use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::errors::AppError;
use crate::models::User;
use crate::state::AppState;

/// Verified caller session. Extracting it verifies the bearer credential
/// against the platform and maps the principal to a local user row; any
/// failure rejects the request with 401 before the handler runs.
pub struct AuthSession {
    pub user: User,
}

/// Pulls the token out of an `Authorization: Bearer <token>` header.
pub fn parse_bearer(header: Option<&str>) -> Option<&str> {
    header?.strip_prefix("Bearer ").map(str::trim).filter(|t| !t.is_empty())
}

impl FromRequestParts<AppState> for AuthSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts.headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        let token = parse_bearer(header).ok_or(AppError::Unauthorized)?;

        let principal = state.platform.verify_token(token).await?;
        if !principal.is_active {
            return Err(AppError::Unauthorized);
        }
        let user = state.users.find_or_create(&principal).await?;
        Ok(AuthSession { user })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_header_parses() {
        assert_eq!(parse_bearer(Some("Bearer abc123")), Some("abc123"));
        assert_eq!(parse_bearer(Some("Bearer   abc123  ")), Some("abc123"));
        assert_eq!(parse_bearer(Some("Basic abc123")), None);
        assert_eq!(parse_bearer(Some("Bearer ")), None);
        assert_eq!(parse_bearer(None), None);
    }
}
