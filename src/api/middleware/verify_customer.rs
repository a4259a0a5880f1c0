use std::sync::Arc;

use axum::extract::{FromRequestParts, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use http::request::Parts;
use ring::hmac;

use super::bearer_token;
use crate::api::server::{AppState, RouteError};
use crate::db::models::customer::CustomerId;

/// Customer identity established by `verify_customer_ident`
#[derive(Debug, Clone)]
pub struct AuthedCustomer(pub CustomerId);

/// Checks a `<customer id>.<hex hmac-sha256 of the id>` bearer token and returns the id it vouches
/// for
pub fn verify_customer_token(key: &hmac::Key, token: &str) -> Option<CustomerId> {
    let (id, signature) = token.rsplit_once('.')?;
    if id.is_empty() {
        return None;
    }

    let signature = hex::decode(signature).ok()?;
    hmac::verify(key, id.as_bytes(), &signature).ok()?;

    Some(id.into())
}

#[cfg(test)]
pub fn sign_customer_token(key: &hmac::Key, id: &CustomerId) -> String {
    let tag = hmac::sign(key, id.0.as_bytes());
    format!("{}.{}", id, hex::encode(tag.as_ref()))
}

pub async fn verify_customer_ident(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, RouteError> {
    let customer_id = bearer_token(req.headers())
        .and_then(|token| verify_customer_token(&state.auth.customer_key, token))
        .ok_or(RouteError::Unauthorized)?;

    tracing::trace!(customer = %customer_id, "verified customer token");
    req.extensions_mut().insert(AuthedCustomer(customer_id));

    Ok(next.run(req).await)
}

impl<S> FromRequestParts<S> for AuthedCustomer
where
    S: Send + Sync,
{
    type Rejection = RouteError;

    async fn from_request_parts(parts: &mut Parts, _: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthedCustomer>()
            .cloned()
            .ok_or(RouteError::Unauthorized)
    }
}
