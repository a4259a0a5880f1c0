//! Administrative balance adjustment.
//!
//! Completely separate from QR redemption: no codes are involved and nothing here is one-time-use.
//! The new balance is a plain overwrite computed from the previous one and is never negative.

use core::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use crate::db::models::customer::{CustomerId, PointAdjustment};
use crate::db::{RecordStore, StoreError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointOperation {
    #[default]
    Set,
    Add,
    Subtract,
}

impl PointOperation {
    /// Balance after applying `amount` to `previous`, floored at zero
    ///
    /// `amount` is signed and taken as given: a negative `add` debits and a negative `subtract`
    /// credits. Arithmetic saturates at the `i64` bounds before the floor is applied.
    pub fn apply(self, previous: i64, amount: i64) -> i64 {
        let next = match self {
            PointOperation::Set => amount,
            PointOperation::Add => previous.saturating_add(amount),
            PointOperation::Subtract => previous.saturating_sub(amount),
        };

        next.max(0)
    }
}

impl fmt::Display for PointOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            PointOperation::Set => "set",
            PointOperation::Add => "add",
            PointOperation::Subtract => "subtract",
        };

        write!(f, "{op}")
    }
}

pub type AdjustResult<T> = core::result::Result<T, AdjustError>;

#[derive(Debug, Error)]
pub enum AdjustError {
    #[error("customer not found")]
    CustomerNotFound,

    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct PointAdjuster {
    store: Arc<dyn RecordStore>,
}

impl PointAdjuster {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self), fields(customer = %customer_id))]
    pub async fn adjust(
        &self,
        customer_id: &CustomerId,
        operation: PointOperation,
        amount: i64,
    ) -> AdjustResult<PointAdjustment> {
        match self
            .store
            .adjust_points(customer_id, operation, amount)
            .await
        {
            Ok(Some(adjustment)) => {
                tracing::info!(
                    previous = adjustment.previous_points,
                    current = adjustment.current_points,
                    %operation,
                    "adjusted customer points"
                );
                Ok(adjustment)
            }
            Ok(None) => Err(AdjustError::CustomerNotFound),
            Err(e) => {
                tracing::error!(error = ?e, kind = "persistence", "point adjustment failed");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::db::memory::MemoryStore;

    #[test]
    fn test_apply_operations() {
        assert_eq!(PointOperation::Set.apply(30, 120), 120);
        assert_eq!(PointOperation::Add.apply(30, 20), 50);
        assert_eq!(PointOperation::Subtract.apply(30, 10), 20);
    }

    #[test]
    fn test_apply_floors_at_zero() {
        assert_eq!(PointOperation::Subtract.apply(30, 100), 0);
        assert_eq!(PointOperation::Set.apply(30, -10), 0);
        assert_eq!(PointOperation::Add.apply(30, -100), 0);
        assert_eq!(PointOperation::Subtract.apply(i64::MIN + 1, i64::MAX), 0);
        assert_eq!(PointOperation::Add.apply(i64::MAX, 1), i64::MAX);
    }

    #[test]
    fn test_apply_signed_amounts() {
        assert_eq!(PointOperation::Add.apply(30, -10), 20);
        assert_eq!(PointOperation::Subtract.apply(30, -10), 40);
    }

    #[test]
    fn test_operation_serde() {
        let op: PointOperation = serde_json::from_str("\"subtract\"").unwrap();
        assert_eq!(op, PointOperation::Subtract);
        assert_eq!(serde_json::to_string(&PointOperation::Add).unwrap(), "\"add\"");
        assert!(serde_json::from_str::<PointOperation>("\"multiply\"").is_err());
    }

    #[tokio::test]
    async fn test_adjust_subtract_clamps() {
        let store = Arc::new(MemoryStore::new());
        let customer = store.seed_customer("c-1", "dana", 30).await;
        let adjuster = PointAdjuster::new(store.clone());

        let adjustment = adjuster
            .adjust(&customer, PointOperation::Subtract, 100)
            .await
            .unwrap();

        assert_eq!(adjustment.previous_points, 30);
        assert_eq!(adjustment.current_points, 0);
        assert_eq!(adjustment.operation, PointOperation::Subtract);
        assert_eq!(store.points_of(&customer).await, Some(0));
    }

    #[tokio::test]
    async fn test_adjust_set_negative_clamps() {
        let store = Arc::new(MemoryStore::new());
        let customer = store.seed_customer("c-1", "dana", 30).await;
        let adjuster = PointAdjuster::new(store.clone());

        let adjustment = adjuster
            .adjust(&customer, PointOperation::Set, -10)
            .await
            .unwrap();

        assert_eq!(adjustment.current_points, 0);
        assert_eq!(store.points_of(&customer).await, Some(0));
    }

    #[tokio::test]
    async fn test_adjust_unknown_customer() {
        let store = Arc::new(MemoryStore::new());
        let adjuster = PointAdjuster::new(store);

        let err = adjuster
            .adjust(&"nobody".into(), PointOperation::Add, 5)
            .await
            .unwrap_err();

        assert!(matches!(err, AdjustError::CustomerNotFound));
    }
}
