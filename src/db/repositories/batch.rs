use sqlx::{PgPool, Result as SqlxResult};
use tracing::instrument;

use super::sql_fragment;
use crate::db::models::batch::{BatchId, BatchRow, QrBatch, QrCodeEntry};
use crate::db::repositories::Repository;

#[derive(Debug)]
pub struct BatchRepository {
    pool: PgPool,
}

#[async_trait::async_trait]
impl Repository for BatchRepository {
    type Ident = BatchId;
    type Output = BatchRow;

    const BASE_FIELDS: &'static str = sql_fragment::BATCH_FIELDS;
    const TABLE_NAME: &'static str = "qr_batch";
    const ID_COLUMN: &'static str = "batch_id";

    fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl BatchRepository {
    /// Codes belonging to a batch, in the order they were minted
    #[instrument(skip(self))]
    pub async fn get_codes(&self, batch_id: &BatchId) -> SqlxResult<Vec<QrCodeEntry>> {
        sqlx::query_as::<_, QrCodeEntry>(&format!(
            "SELECT {} FROM qr_code WHERE batch_id = $1 ORDER BY position ASC",
            sql_fragment::CODE_FIELDS
        ))
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await
    }

    #[instrument(skip(self))]
    pub async fn get_with_codes(&self, batch_id: &BatchId) -> SqlxResult<Option<QrBatch>> {
        let Some(row) = self.get_by_id(batch_id).await? else {
            return Ok(None);
        };

        let codes = self.get_codes(batch_id).await?;
        Ok(Some(QrBatch::from_parts(row, codes)))
    }

    #[instrument(skip(self))]
    pub async fn set_active(&self, batch_id: &BatchId, active: bool) -> SqlxResult<bool> {
        let updated = sqlx::query("UPDATE qr_batch SET is_active = $2 WHERE batch_id = $1")
            .bind(batch_id)
            .bind(active)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(updated == 1)
    }
}
