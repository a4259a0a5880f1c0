use core::fmt;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tracing::instrument;

use crate::db::models::batch::{BatchId, QrBatch, QrId};
use crate::db::models::customer::{Customer, CustomerId, CustomerSummary, PointAdjustment};
use crate::db::models::scheme::Scheme;
use crate::db::models::{PaginatedResponse, Pagination};
use crate::redeem::adjust::PointOperation;
use crate::util::env::Config;

#[cfg(test)]
pub mod memory;
pub mod models;
pub mod pg;
pub mod repositories;

pub mod prelude {
    pub use crate::db::pg::PgStore;
    pub use crate::db::{RecordStore, StoreError};

    pub use crate::db::models::batch::{BatchId, NewBatch, QrBatch, QrId};
    pub use crate::db::models::customer::{CustomerId, CustomerSummary};
    pub use crate::db::models::scheme::Scheme;
    pub use crate::db::models::{PaginatedResponse, Pagination};
}

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Connects to postgres and brings the schema up to date
#[instrument(skip(config))]
pub async fn connect(config: &Config) -> StoreResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await?;

    MIGRATOR.run(&pool).await?;
    tracing::info!("database migrations applied");

    Ok(pool)
}

/// A single attempt to move one code from unredeemed to redeemed on behalf of a customer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedemptionClaim {
    pub batch_id: BatchId,
    pub qr_id: QrId,
    pub customer_id: CustomerId,
    pub points: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Code marked and customer credited; carries the customer's post-credit state
    Credited(CustomerSummary),
    AlreadyScanned,
    /// The batch no longer exists or was deactivated since it was loaded
    BatchUnavailable,
    CodeMissing,
    CustomerMissing,
    /// Crediting would push the balance past what the store can hold; nothing was written
    BalanceOverflow,
}

/// Persistent record store backing the redemption subsystem
///
/// # Atomicity
///
/// `commit_redemption` must behave as one indivisible unit: the code is marked scanned only if it
/// is currently unscanned (in an active batch), and the customer is credited only if that mark
/// happened. If the customer doesn't exist, the mark is discarded. Implementations must never
/// leave a credited balance next to an unscanned code, or a scanned code without its credit.
#[async_trait]
pub trait RecordStore: Send + Sync + fmt::Debug {
    async fn customer(&self, id: &CustomerId) -> StoreResult<Option<Customer>>;

    /// Batch with its codes, only if it is active
    async fn active_batch(&self, batch_id: &BatchId) -> StoreResult<Option<QrBatch>>;

    /// Batch with its codes regardless of `is_active`
    async fn batch(&self, batch_id: &BatchId) -> StoreResult<Option<QrBatch>>;

    /// Inserts a batch and all of its codes, returning `false` if the batch id is taken
    async fn insert_batch(&self, batch: &QrBatch) -> StoreResult<bool>;

    /// Returns `false` if no such batch exists
    async fn set_batch_active(&self, batch_id: &BatchId, active: bool) -> StoreResult<bool>;

    async fn commit_redemption(&self, claim: &RedemptionClaim) -> StoreResult<CommitOutcome>;

    /// Applies `operation` to the customer's balance atomically, `None` if the customer is absent
    async fn adjust_points(
        &self,
        id: &CustomerId,
        operation: PointOperation,
        amount: i64,
    ) -> StoreResult<Option<PointAdjustment>>;

    async fn schemes(&self, pagination: &Pagination) -> StoreResult<PaginatedResponse<Scheme>>;
}

pub type StoreResult<T> = core::result::Result<T, StoreError>;

#[allow(clippy::enum_variant_names)]
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    SqlxError(#[from] sqlx::Error),

    #[error(transparent)]
    MigrateError(#[from] sqlx::migrate::MigrateError),
}
