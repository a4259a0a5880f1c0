use std::sync::Arc;

use thiserror::Error;

use crate::api::middleware::AuthKeys;
use crate::api::server::AppState;
use crate::db::prelude::PgStore;
use crate::util::env::{Config, EnvErr};
use crate::util::telemetry;

mod api;
mod db;
mod redeem;
mod util;

#[derive(Debug, Error)]
enum RunnerErr {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Env(#[from] EnvErr),

    #[error(transparent)]
    Store(#[from] db::StoreError),

    #[error(transparent)]
    Std(#[from] Box<dyn std::error::Error>),
}

type Result<T> = core::result::Result<T, RunnerErr>;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    let telemetry_registry = telemetry::Telemetry::new(&config)?.register();

    tracing::info!(port = config.server_api_port, "starting loyalty points api");

    let pool = db::connect(&config).await?;
    let state = AppState::new(
        Arc::new(PgStore::new(pool)),
        AuthKeys::new(
            &config.admin_token,
            config.customer_token_secret.as_bytes(),
        ),
    );

    let served = api::server::serve(
        config.server_api_port,
        Arc::new(state),
        api::middleware::cors(&config.cors_allow_origins),
    )
    .await;

    if let Err(e) = &served {
        tracing::error!(error = ?e, "api server exited with an error");
    }

    telemetry_registry.shutdown();
    Ok(served?)
}
