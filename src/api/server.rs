use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next, from_fn};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use http::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::instrument;

use crate::api::handler::*;
use crate::api::middleware::AuthKeys;
use crate::api::middleware::verify_admin::verify_admin_ident;
use crate::api::middleware::verify_customer::verify_customer_ident;
use crate::db::models::batch::InvalidBatch;
use crate::db::prelude::*;
use crate::redeem::adjust::{AdjustError, PointAdjuster};
use crate::redeem::{RedeemError, RedemptionEngine};

pub type JsonResult<T> = core::result::Result<Json<T>, RouteError>;

#[derive(Clone, Debug)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub engine: RedemptionEngine,
    pub adjuster: PointAdjuster,
    pub auth: AuthKeys,
}

impl AppState {
    pub fn new(store: Arc<dyn RecordStore>, auth: AuthKeys) -> Self {
        Self {
            engine: RedemptionEngine::new(store.clone()),
            adjuster: PointAdjuster::new(store.clone()),
            store,
            auth,
        }
    }
}

pub fn router(state: Arc<AppState>, cors: CorsLayer) -> Router {
    let customer_routes = Router::new()
        .route("/qr/redeem", post(redeem_qr))
        .route("/customer/me", get(customer_me))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            verify_customer_ident,
        ));

    let admin_routes = Router::new()
        .route("/admin/customers/{id}/points", post(adjust_points))
        .route("/admin/batches", post(create_batch))
        .route(
            "/admin/batches/{batch_id}",
            get(get_batch).patch(update_batch),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            verify_admin_ident,
        ));

    Router::new()
        .merge(customer_routes)
        .merge(admin_routes)
        .route("/", get(|| async { Response::new(Body::empty()) }))
        .route("/schemes", get(list_schemes))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                let method = req.method();
                let uri = req.uri();

                let matched_path = req
                    .extensions()
                    .get::<MatchedPath>()
                    .map(|matched| matched.as_str());

                tracing::debug_span!("api_request", ?method, ?uri, ?matched_path)
            }),
        )
        .layer(from_fn(log_route_errors))
        .layer(cors)
        .with_state(state)
}

/// Logs any server-side `RouteError` that a handler turned into a response
#[instrument(skip(request, next), fields(uri = request.uri().to_string()))]
async fn log_route_errors(request: Request, next: Next) -> Response {
    let res = next.run(request).await;
    if let Some(err) = res.extensions().get::<Arc<RouteError>>() {
        tracing::error!(error = ?err, "error occurred inside route handler");
    }

    res
}

#[instrument(skip(state, cors))]
pub async fn serve(port: u16, state: Arc<AppState>, cors: CorsLayer) -> std::io::Result<()> {
    let app = router(state, cors);

    let socket_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port);
    let listener = tokio::net::TcpListener::bind(socket_addr).await?;

    tracing::info!(
        server_url = &format!("http://127.0.0.1:{}", socket_addr.port()),
        "server ready"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = ?e, "unable to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = ?e, "unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => (),
        _ = terminate => (),
    }

    tracing::info!("shutdown signal received");
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    Redeem(#[from] RedeemError),

    #[error(transparent)]
    Adjust(#[from] AdjustError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    InvalidBatch(#[from] InvalidBatch),

    #[error("missing or invalid credentials")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),
}

const INTERNAL_MESSAGE: &str = "internal server error";

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            success: bool,
            message: String,
        }

        let (status, message) = match &self {
            RouteError::Redeem(err) => match err {
                RedeemError::MalformedPayload(e) => {
                    (StatusCode::BAD_REQUEST, format!("invalid QR data: {e}"))
                }
                RedeemError::BatchNotFound => (
                    StatusCode::NOT_FOUND,
                    String::from("QR batch not found or inactive"),
                ),
                RedeemError::CodeNotFound => (
                    StatusCode::NOT_FOUND,
                    String::from("QR code not found in batch"),
                ),
                RedeemError::CustomerNotFound => {
                    (StatusCode::NOT_FOUND, String::from("customer not found"))
                }
                RedeemError::BalanceOverflow => (
                    StatusCode::BAD_REQUEST,
                    String::from("points balance limit reached"),
                ),
                RedeemError::AlreadyRedeemed => (
                    StatusCode::BAD_REQUEST,
                    String::from("QR code has already been redeemed"),
                ),
                RedeemError::Persistence(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    String::from(INTERNAL_MESSAGE),
                ),
            },

            RouteError::Adjust(err) => match err {
                AdjustError::CustomerNotFound => {
                    (StatusCode::NOT_FOUND, String::from("customer not found"))
                }
                AdjustError::Persistence(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    String::from(INTERNAL_MESSAGE),
                ),
            },

            RouteError::Store(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from(INTERNAL_MESSAGE),
            ),

            RouteError::InvalidBatch(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            RouteError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            RouteError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            RouteError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            RouteError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
        };

        let body = Json(ErrorResponse {
            success: false,
            message,
        });

        let mut response = (status, body).into_response();
        if status.is_server_error() {
            response.extensions_mut().insert(Arc::new(self));
        }

        response
    }
}
