use async_trait::async_trait;
use sqlx::{PgPool, Result as SqlxResult};
use tracing::instrument;

use crate::db::models::batch::{BatchId, QrBatch};
use crate::db::models::customer::{Customer, CustomerId, PointAdjustment};
use crate::db::models::scheme::Scheme;
use crate::db::models::{PaginatedResponse, Pagination};
use crate::db::repositories::batch::BatchRepository;
use crate::db::repositories::customer::CustomerRepository;
use crate::db::repositories::scheme::SchemeRepository;
use crate::db::repositories::{Repository, Tx};
use crate::db::{CommitOutcome, RecordStore, RedemptionClaim, StoreResult};
use crate::redeem::adjust::PointOperation;

/// Postgres-backed record store
#[derive(Debug)]
pub struct PgStore {
    pool: PgPool,
    customers: CustomerRepository,
    batches: BatchRepository,
    schemes: SchemeRepository,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            customers: CustomerRepository::new(pool.clone()),
            batches: BatchRepository::new(pool.clone()),
            schemes: SchemeRepository::new(pool.clone()),
            pool,
        }
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn customer(&self, id: &CustomerId) -> StoreResult<Option<Customer>> {
        Ok(self.customers.get_by_id(id).await?)
    }

    #[instrument(skip(self))]
    async fn active_batch(&self, batch_id: &BatchId) -> StoreResult<Option<QrBatch>> {
        Ok(self
            .batches
            .get_with_codes(batch_id)
            .await?
            .filter(|b| b.is_active))
    }

    async fn batch(&self, batch_id: &BatchId) -> StoreResult<Option<QrBatch>> {
        Ok(self.batches.get_with_codes(batch_id).await?)
    }

    #[instrument(skip(self, batch), fields(batch_id = %batch.batch_id))]
    async fn insert_batch(&self, batch: &QrBatch) -> StoreResult<bool> {
        let inserted = Tx::with_tx(&self.pool, |mut tx| async move {
            let result = insert_batch_with_codes(&mut tx, batch).await;
            (tx, result)
        })
        .await?;

        Ok(inserted)
    }

    async fn set_batch_active(&self, batch_id: &BatchId, active: bool) -> StoreResult<bool> {
        Ok(self.batches.set_active(batch_id, active).await?)
    }

    /// Marks the code, then credits the customer, in one transaction. The commit at the end is
    /// the commit point of the whole redemption; anything short of it rolls back both writes.
    #[instrument(skip(self, claim), fields(batch_id = %claim.batch_id, qr_id = %claim.qr_id))]
    async fn commit_redemption(&self, claim: &RedemptionClaim) -> StoreResult<CommitOutcome> {
        let mut tx = Tx::begin(&self.pool).await?;

        if !tx
            .claim_code(&claim.batch_id, &claim.qr_id, &claim.customer_id)
            .await?
        {
            let reason = tx.unclaimed_reason(&claim.batch_id, &claim.qr_id).await?;
            tx.rollback().await?;
            tracing::debug!(?reason, "code could not be claimed");
            return Ok(reason);
        }

        let customer = match tx.credit_points(&claim.customer_id, claim.points).await {
            Ok(Some(customer)) => customer,
            Ok(None) => {
                tx.rollback().await?;
                return Ok(CommitOutcome::CustomerMissing);
            }
            Err(e) if is_numeric_overflow(&e) => {
                tx.rollback().await?;
                tracing::warn!(customer = %claim.customer_id, "credit would overflow balance");
                return Ok(CommitOutcome::BalanceOverflow);
            }
            Err(e) => return Err(e.into()),
        };

        tx.commit().await?;
        Ok(CommitOutcome::Credited(customer))
    }

    #[instrument(skip(self))]
    async fn adjust_points(
        &self,
        id: &CustomerId,
        operation: PointOperation,
        amount: i64,
    ) -> StoreResult<Option<PointAdjustment>> {
        let mut tx = Tx::begin(&self.pool).await?;

        let Some(previous_points) = tx.lock_points(id).await? else {
            tx.rollback().await?;
            return Ok(None);
        };

        let current_points = operation.apply(previous_points, amount);
        tx.set_points(id, current_points).await?;
        tx.commit().await?;

        Ok(Some(PointAdjustment {
            customer_id: id.clone(),
            previous_points,
            current_points,
            operation,
        }))
    }

    #[instrument(skip(self))]
    async fn schemes(&self, pagination: &Pagination) -> StoreResult<PaginatedResponse<Scheme>> {
        let page_size = pagination.page_size();
        let items = self
            .schemes
            .get_by_range(page_size, pagination.offset())
            .await?;
        let total = self.schemes.count().await?;

        Ok(PaginatedResponse::new(
            items,
            total,
            page_size,
            pagination.page(),
        ))
    }
}

/// `numeric_value_out_of_range`, raised when `points + $2` leaves the `BIGINT` range
const NUMERIC_OVERFLOW: &str = "22003";

fn is_numeric_overflow(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|e| e.code())
        .is_some_and(|code| code == NUMERIC_OVERFLOW)
}

async fn insert_batch_with_codes(tx: &mut Tx, batch: &QrBatch) -> SqlxResult<bool> {
    if !tx.insert_batch(batch).await? {
        return Ok(false);
    }

    tx.insert_codes(batch).await?;
    Ok(true)
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use futures::future::join_all;

    use super::*;
    use crate::db::models::batch::NewBatch;
    use crate::redeem::{RedeemError, RedemptionEngine};

    async fn seed_customer(pool: &PgPool, id: &str, points: i64) -> CustomerId {
        sqlx::query(
            r#"
            INSERT INTO customer (id, name, username, phone, points)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id)
        .bind(format!("{id} (test)"))
        .bind(format!("user-{id}"))
        .bind(format!("phone-{id}"))
        .bind(points)
        .execute(pool)
        .await
        .unwrap();

        id.into()
    }

    async fn seed_batch(store: &PgStore, batch_id: &str, points: i64, count: i64) -> QrBatch {
        let batch = NewBatch {
            batch_id: Some(batch_id.into()),
            name: format!("{batch_id} batch"),
            points,
            count,
            url: None,
        }
        .into_batch()
        .unwrap();

        assert!(store.insert_batch(&batch).await.unwrap());
        batch
    }

    fn claim(batch: &QrBatch, index: usize, customer: &CustomerId) -> RedemptionClaim {
        RedemptionClaim {
            batch_id: batch.batch_id.clone(),
            qr_id: batch.codes[index].qr_id.clone(),
            customer_id: customer.clone(),
            points: batch.points,
        }
    }

    async fn points_of(store: &PgStore, id: &CustomerId) -> Option<i64> {
        store.customer(id).await.unwrap().map(|c| c.points)
    }

    async fn scanned(store: &PgStore, batch: &QrBatch, index: usize) -> bool {
        store
            .batch(&batch.batch_id)
            .await
            .unwrap()
            .unwrap()
            .codes[index]
            .is_scanned
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_replay_is_already_redeemed(pool: PgPool) {
        let store = Arc::new(PgStore::new(pool.clone()));
        let customer = seed_customer(&pool, "c-1", 10).await;
        let batch = seed_batch(&store, "B1", 25, 2).await;
        let engine = RedemptionEngine::new(store.clone());
        let qr_data = batch.payload_for(&batch.codes[0]);

        let redemption = engine.redeem(&customer, &qr_data).await.unwrap();
        assert_eq!(redemption.total_points, 35);

        let err = engine.redeem(&customer, &qr_data).await.unwrap_err();
        assert!(matches!(err, RedeemError::AlreadyRedeemed));

        // the store re-checks on its own, without the engine's fast path
        let outcome = store
            .commit_redemption(&claim(&batch, 0, &customer))
            .await
            .unwrap();
        assert_eq!(outcome, CommitOutcome::AlreadyScanned);

        assert_eq!(points_of(&store, &customer).await, Some(35));
        let stored = store.batch(&batch.batch_id).await.unwrap().unwrap();
        let entry = &stored.codes[0];
        assert!(entry.is_scanned);
        assert_eq!(entry.scanned_by.as_ref(), Some(&customer));
        assert!(entry.scanned_at.is_some());
        assert!(!stored.codes[1].is_scanned);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_concurrent_claims_credit_once(pool: PgPool) {
        const ATTEMPTS: usize = 8;

        let store = PgStore::new(pool.clone());
        let customer = seed_customer(&pool, "c-1", 0).await;
        let batch = seed_batch(&store, "B1", 25, 1).await;
        let attempt = claim(&batch, 0, &customer);

        let outcomes = join_all((0..ATTEMPTS).map(|_| store.commit_redemption(&attempt))).await;

        let credited = outcomes
            .iter()
            .filter(|o| matches!(o, Ok(CommitOutcome::Credited(_))))
            .count();
        let already = outcomes
            .iter()
            .filter(|o| matches!(o, Ok(CommitOutcome::AlreadyScanned)))
            .count();

        assert_eq!(credited, 1);
        assert_eq!(already, ATTEMPTS - 1);
        assert_eq!(points_of(&store, &customer).await, Some(25));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_missing_customer_rolls_back_mark(pool: PgPool) {
        let store = PgStore::new(pool);
        let batch = seed_batch(&store, "B1", 25, 1).await;

        let outcome = store
            .commit_redemption(&claim(&batch, 0, &"ghost".into()))
            .await
            .unwrap();

        assert_eq!(outcome, CommitOutcome::CustomerMissing);
        assert!(!scanned(&store, &batch, 0).await);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_inactive_batch_is_unavailable(pool: PgPool) {
        let store = PgStore::new(pool.clone());
        let customer = seed_customer(&pool, "c-1", 0).await;
        let batch = seed_batch(&store, "B1", 25, 2).await;

        let first = store
            .commit_redemption(&claim(&batch, 0, &customer))
            .await
            .unwrap();
        assert!(matches!(first, CommitOutcome::Credited(_)));

        assert!(store.set_batch_active(&batch.batch_id, false).await.unwrap());
        assert!(store.active_batch(&batch.batch_id).await.unwrap().is_none());

        for index in 0..2 {
            let outcome = store
                .commit_redemption(&claim(&batch, index, &customer))
                .await
                .unwrap();
            assert_eq!(outcome, CommitOutcome::BatchUnavailable);
        }

        assert_eq!(points_of(&store, &customer).await, Some(25));
        assert!(!scanned(&store, &batch, 1).await);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_unknown_code_is_missing(pool: PgPool) {
        let store = PgStore::new(pool.clone());
        let customer = seed_customer(&pool, "c-1", 0).await;
        let batch = seed_batch(&store, "B1", 25, 1).await;

        let mut attempt = claim(&batch, 0, &customer);
        attempt.qr_id = "NOT-A-CODE".into();

        let outcome = store.commit_redemption(&attempt).await.unwrap();
        assert_eq!(outcome, CommitOutcome::CodeMissing);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_balance_overflow_rolls_back_mark(pool: PgPool) {
        let store = PgStore::new(pool.clone());
        let customer = seed_customer(&pool, "c-1", i64::MAX - 10).await;
        let batch = seed_batch(&store, "B1", 25, 1).await;

        let outcome = store
            .commit_redemption(&claim(&batch, 0, &customer))
            .await
            .unwrap();

        assert_eq!(outcome, CommitOutcome::BalanceOverflow);
        assert_eq!(points_of(&store, &customer).await, Some(i64::MAX - 10));
        assert!(!scanned(&store, &batch, 0).await);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_scanned_code_cannot_be_reset(pool: PgPool) {
        let store = PgStore::new(pool.clone());
        let customer = seed_customer(&pool, "c-1", 0).await;
        let batch = seed_batch(&store, "B1", 25, 1).await;

        store
            .commit_redemption(&claim(&batch, 0, &customer))
            .await
            .unwrap();

        let reset = sqlx::query(
            r#"
            UPDATE qr_code
            SET is_scanned = FALSE, scanned_by = NULL, scanned_at = NULL
            WHERE batch_id = $1 AND qr_id = $2
            "#,
        )
        .bind(&batch.batch_id)
        .bind(&batch.codes[0].qr_id)
        .execute(&pool)
        .await;

        assert!(reset.is_err());
        assert!(scanned(&store, &batch, 0).await);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_adjust_points(pool: PgPool) {
        let store = PgStore::new(pool.clone());
        let customer = seed_customer(&pool, "c-1", 30).await;

        let adjustment = store
            .adjust_points(&customer, PointOperation::Subtract, 100)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(adjustment.previous_points, 30);
        assert_eq!(adjustment.current_points, 0);

        let adjustment = store
            .adjust_points(&customer, PointOperation::Add, 15)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(adjustment.current_points, 15);
        assert_eq!(points_of(&store, &customer).await, Some(15));

        let missing = store
            .adjust_points(&"nobody".into(), PointOperation::Set, 5)
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_insert_batch_rejects_duplicate_id(pool: PgPool) {
        let store = PgStore::new(pool);
        let batch = seed_batch(&store, "B1", 25, 5).await;

        let duplicate = NewBatch {
            batch_id: Some("B1".into()),
            name: "again".to_string(),
            points: 10,
            count: 1,
            url: None,
        }
        .into_batch()
        .unwrap();
        assert!(!store.insert_batch(&duplicate).await.unwrap());

        let stored = store.batch(&batch.batch_id).await.unwrap().unwrap();
        assert_eq!(stored.name, "B1 batch");
        assert_eq!(stored.points, 25);

        let stored_ids: Vec<_> = stored.codes.iter().map(|c| c.qr_id.clone()).collect();
        let minted_ids: Vec<_> = batch.codes.iter().map(|c| c.qr_id.clone()).collect();
        assert_eq!(stored_ids, minted_ids);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_schemes_are_paged_by_cost(pool: PgPool) {
        let schemes = [("s-1", "Mug", 300i64), ("s-2", "Sticker", 50), ("s-3", "Poster", 120)];

        for (id, title, points) in schemes {
            sqlx::query("INSERT INTO scheme (id, title, points) VALUES ($1, $2, $3)")
                .bind(id)
                .bind(title)
                .bind(points)
                .execute(&pool)
                .await
                .unwrap();
        }

        let store = PgStore::new(pool);
        let page = store.schemes(&Pagination::new(2, 0)).await.unwrap();

        assert_eq!(page.total_items, 3);
        assert_eq!(page.total_pages, 2);
        let titles: Vec<_> = page.items.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, ["Sticker", "Poster"]);
    }
}
