use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::models::User;
use crate::util::{extract_bearer_token, token_prefix};

/// The authenticated caller, inserted into request extensions.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    /// Visible part of the bearer token, for logs
    pub token_prefix: String,
}

impl AuthUser {
    pub fn id(&self) -> &str {
        &self.user.id
    }
}

/// Require a valid bearer token. Missing, unknown, revoked and expired tokens
/// all get the same 401.
pub async fn user_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let token = extract_bearer_token(request.headers()).ok_or(AppError::Unauthorized)?;
    let prefix = token_prefix(token);

    let user = {
        let conn = state.db.get()?;
        queries::get_user_by_token(&conn, token)?
    };

    let Some(user) = user else {
        tracing::debug!(token = %prefix, "Rejected unknown bearer token");
        return Err(AppError::Unauthorized);
    };

    request.extensions_mut().insert(AuthUser {
        user,
        token_prefix: prefix,
    });

    Ok(next.run(request).await)
}
