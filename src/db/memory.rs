//! In-memory `RecordStore` for tests.
//!
//! Everything lives behind a single mutex, so `commit_redemption` gets its atomicity for free. The
//! `fail_commits` switch makes commits fail the way a dropped connection would, before anything
//! is written.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::db::models::batch::{BatchId, NewBatch, QrBatch};
use crate::db::models::customer::{Customer, CustomerId, CustomerSummary, PointAdjustment};
use crate::db::models::scheme::Scheme;
use crate::db::models::{PaginatedResponse, Pagination};
use crate::db::{CommitOutcome, RecordStore, RedemptionClaim, StoreResult};
use crate::redeem::adjust::PointOperation;

#[derive(Debug, Default)]
struct Records {
    customers: HashMap<CustomerId, Customer>,
    batches: HashMap<BatchId, QrBatch>,
    schemes: Vec<Scheme>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Records>,
    fail_commits: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub async fn seed_customer(&self, id: &str, username: &str, points: i64) -> CustomerId {
        let now = Utc::now().naive_utc();
        let customer = Customer {
            id: id.into(),
            name: format!("{username} (test)"),
            username: username.to_string(),
            phone: format!("+1555{:07}", self.records.lock().await.customers.len()),
            email: None,
            points,
            created_at: now,
            updated_at: now,
        };

        let id = customer.id.clone();
        self.records
            .lock()
            .await
            .customers
            .insert(id.clone(), customer);

        id
    }

    pub async fn seed_batch(&self, batch_id: &str, points: i64, count: i64) -> QrBatch {
        let batch = NewBatch {
            batch_id: Some(batch_id.into()),
            name: format!("{batch_id} batch"),
            points,
            count,
            url: Some("https://example.com/scan".to_string()),
        }
        .into_batch()
        .expect("valid test batch");

        self.records
            .lock()
            .await
            .batches
            .insert(batch.batch_id.clone(), batch.clone());

        batch
    }

    pub async fn seed_scheme(&self, id: &str, title: &str, points: i64) {
        self.records.lock().await.schemes.push(Scheme {
            id: id.to_string(),
            title: title.to_string(),
            description: format!("{title} description"),
            image: None,
            points,
        });
    }

    pub async fn points_of(&self, id: &CustomerId) -> Option<i64> {
        self.records
            .lock()
            .await
            .customers
            .get(id)
            .map(|c| c.points)
    }

    pub async fn batch_snapshot(&self, batch_id: &BatchId) -> Option<QrBatch> {
        self.records.lock().await.batches.get(batch_id).cloned()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn customer(&self, id: &CustomerId) -> StoreResult<Option<Customer>> {
        Ok(self.records.lock().await.customers.get(id).cloned())
    }

    async fn active_batch(&self, batch_id: &BatchId) -> StoreResult<Option<QrBatch>> {
        Ok(self
            .records
            .lock()
            .await
            .batches
            .get(batch_id)
            .filter(|b| b.is_active)
            .cloned())
    }

    async fn batch(&self, batch_id: &BatchId) -> StoreResult<Option<QrBatch>> {
        Ok(self.batch_snapshot(batch_id).await)
    }

    async fn insert_batch(&self, batch: &QrBatch) -> StoreResult<bool> {
        let mut records = self.records.lock().await;
        if records.batches.contains_key(&batch.batch_id) {
            return Ok(false);
        }

        records
            .batches
            .insert(batch.batch_id.clone(), batch.clone());
        Ok(true)
    }

    async fn set_batch_active(&self, batch_id: &BatchId, active: bool) -> StoreResult<bool> {
        match self.records.lock().await.batches.get_mut(batch_id) {
            Some(batch) => {
                batch.is_active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn commit_redemption(&self, claim: &RedemptionClaim) -> StoreResult<CommitOutcome> {
        let mut guard = self.records.lock().await;
        let records = &mut *guard;

        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(sqlx::Error::PoolTimedOut.into());
        }

        let Some(batch) = records
            .batches
            .get_mut(&claim.batch_id)
            .filter(|b| b.is_active)
        else {
            return Ok(CommitOutcome::BatchUnavailable);
        };

        let Some(entry) = batch.codes.iter_mut().find(|c| c.qr_id == claim.qr_id) else {
            return Ok(CommitOutcome::CodeMissing);
        };

        if entry.is_scanned {
            return Ok(CommitOutcome::AlreadyScanned);
        }

        let Some(customer) = records.customers.get_mut(&claim.customer_id) else {
            return Ok(CommitOutcome::CustomerMissing);
        };

        let Some(points) = customer.points.checked_add(claim.points) else {
            return Ok(CommitOutcome::BalanceOverflow);
        };

        let now = Utc::now().naive_utc();
        customer.points = points;
        customer.updated_at = now;

        entry.is_scanned = true;
        entry.scanned_by = Some(claim.customer_id.clone());
        entry.scanned_at = Some(now);

        Ok(CommitOutcome::Credited(CustomerSummary::from(&*customer)))
    }

    async fn adjust_points(
        &self,
        id: &CustomerId,
        operation: PointOperation,
        amount: i64,
    ) -> StoreResult<Option<PointAdjustment>> {
        let mut records = self.records.lock().await;
        let Some(customer) = records.customers.get_mut(id) else {
            return Ok(None);
        };

        let previous_points = customer.points;
        customer.points = operation.apply(previous_points, amount);
        customer.updated_at = Utc::now().naive_utc();

        Ok(Some(PointAdjustment {
            customer_id: id.clone(),
            previous_points,
            current_points: customer.points,
            operation,
        }))
    }

    async fn schemes(&self, pagination: &Pagination) -> StoreResult<PaginatedResponse<Scheme>> {
        let records = self.records.lock().await;
        let mut schemes = records.schemes.clone();
        schemes.sort_by(|a, b| a.points.cmp(&b.points).then_with(|| a.title.cmp(&b.title)));

        let page_size = pagination.page_size();
        let items = schemes
            .iter()
            .skip(pagination.offset() as usize)
            .take(page_size as usize)
            .cloned()
            .collect();

        Ok(PaginatedResponse::new(
            items,
            schemes.len() as i64,
            page_size,
            pagination.page(),
        ))
    }
}
