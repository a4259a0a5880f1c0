pub mod verify_admin;
pub mod verify_customer;

use http::header::AUTHORIZATION;
use http::request::Parts as ReqParts;
use http::{HeaderMap, HeaderValue, Method};
use ring::hmac;
use tower_http::cors::{AllowOrigin, CorsLayer};

const BEARER_PREFIX: &str = "Bearer ";

/// Secrets used to verify callers; issuing credentials happens elsewhere
#[derive(Debug, Clone)]
pub struct AuthKeys {
    pub admin_token: String,
    pub customer_key: hmac::Key,
}

impl AuthKeys {
    pub fn new(admin_token: &str, customer_secret: &[u8]) -> Self {
        Self {
            admin_token: admin_token.to_string(),
            customer_key: hmac::Key::new(hmac::HMAC_SHA256, customer_secret),
        }
    }
}

/// Pulls the token out of an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix(BEARER_PREFIX)
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

pub fn cors(allowed_origins: &str) -> CorsLayer {
    let allowed = if allowed_origins == "*" {
        AllowOrigin::any()
    } else {
        let suffix = allowed_origins.to_string();
        AllowOrigin::predicate(move |org: &HeaderValue, _: &ReqParts| {
            org.as_bytes().ends_with(suffix.as_bytes())
        })
    };

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH])
        .allow_headers([AUTHORIZATION, http::header::CONTENT_TYPE])
        .allow_origin(allowed)
}
