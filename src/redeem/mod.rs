//! QR redemption.
//!
//! A code moves from unredeemed to redeemed exactly once. The engine does the cheap checks itself
//! (payload shape, active batch, code present, not yet scanned) and then hands the actual
//! transition to the store's `commit_redemption`, which re-checks the scanned flag and credits the
//! customer inside a single atomic unit.

use std::sync::Arc;

use thiserror::Error;
use tracing::instrument;

use crate::db::models::batch::{BatchId, QrId};
use crate::db::models::customer::{CustomerId, CustomerSummary};
use crate::db::{CommitOutcome, RecordStore, RedemptionClaim, StoreError};
use crate::redeem::payload::{PayloadError, ScanPayload};

pub mod adjust;
pub mod payload;

pub type RedeemResult<T> = core::result::Result<T, RedeemError>;

#[derive(Debug, Error)]
pub enum RedeemError {
    #[error("malformed scan payload: {0}")]
    MalformedPayload(#[from] PayloadError),

    #[error("batch not found or inactive")]
    BatchNotFound,

    #[error("qr code not found in batch")]
    CodeNotFound,

    #[error("qr code has already been redeemed")]
    AlreadyRedeemed,

    #[error("customer not found")]
    CustomerNotFound,

    #[error("customer balance cannot hold any more points")]
    BalanceOverflow,

    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

impl RedeemError {
    /// Infrastructure failures, as opposed to rejections of the request itself
    pub fn is_persistence(&self) -> bool {
        matches!(self, RedeemError::Persistence(_))
    }
}

/// Outcome of a successful redemption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redemption {
    pub points_earned: i64,
    pub total_points: i64,
    pub qr_id: QrId,
    pub batch_id: BatchId,
    pub customer: CustomerSummary,
}

#[derive(Debug, Clone)]
pub struct RedemptionEngine {
    store: Arc<dyn RecordStore>,
}

impl RedemptionEngine {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, raw), fields(customer = %customer_id))]
    pub async fn redeem(&self, customer_id: &CustomerId, raw: &str) -> RedeemResult<Redemption> {
        let result = self.try_redeem(customer_id, raw).await;

        match &result {
            Ok(r) => tracing::info!(
                batch_id = %r.batch_id,
                qr_id = %r.qr_id,
                points_earned = r.points_earned,
                total_points = r.total_points,
                "qr code redeemed"
            ),
            Err(e) if e.is_persistence() => {
                tracing::error!(error = ?e, kind = "persistence", "redemption commit failed")
            }
            Err(e) => tracing::warn!(reason = %e, "redemption rejected"),
        }

        result
    }

    async fn try_redeem(&self, customer_id: &CustomerId, raw: &str) -> RedeemResult<Redemption> {
        let payload = ScanPayload::parse(raw)?;

        let batch = self
            .store
            .active_batch(&payload.batch_id)
            .await?
            .ok_or(RedeemError::BatchNotFound)?;

        let entry = batch
            .find_code(&payload.qr_id)
            .ok_or(RedeemError::CodeNotFound)?;

        // avoids opening a transaction for the common replay case; the store re-checks this
        // under its own lock
        if entry.is_scanned {
            return Err(RedeemError::AlreadyRedeemed);
        }

        let claim = RedemptionClaim {
            batch_id: payload.batch_id,
            qr_id: payload.qr_id,
            customer_id: customer_id.clone(),
            points: payload.points,
        };

        match self.store.commit_redemption(&claim).await? {
            CommitOutcome::Credited(customer) => Ok(Redemption {
                points_earned: claim.points,
                total_points: customer.points,
                qr_id: claim.qr_id,
                batch_id: claim.batch_id,
                customer,
            }),
            CommitOutcome::AlreadyScanned => Err(RedeemError::AlreadyRedeemed),
            CommitOutcome::BatchUnavailable => Err(RedeemError::BatchNotFound),
            CommitOutcome::CodeMissing => Err(RedeemError::CodeNotFound),
            CommitOutcome::CustomerMissing => Err(RedeemError::CustomerNotFound),
            CommitOutcome::BalanceOverflow => Err(RedeemError::BalanceOverflow),
        }
    }
}
