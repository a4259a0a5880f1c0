use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use super::bearer_token;
use crate::api::server::{AppState, RouteError};
use crate::util::constant_time_cmp;

pub async fn verify_admin_ident(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, RouteError> {
    let token = bearer_token(req.headers()).ok_or(RouteError::Unauthorized)?;

    if !constant_time_cmp(token, &state.auth.admin_token) {
        tracing::warn!(uri = %req.uri(), "rejected admin request with bad token");
        return Err(RouteError::Unauthorized);
    }

    Ok(next.run(req).await)
}
