use core::fmt;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Result as SqlxResult, Transaction};
use tracing::instrument;

use crate::db::CommitOutcome;
use crate::db::models::batch::{BatchId, QrBatch, QrId};
use crate::db::models::customer::{CustomerId, CustomerSummary};

pub mod batch;
pub mod customer;
pub mod scheme;

pub struct Tx {
    inner: Option<Transaction<'static, Postgres>>,
}

impl Tx {
    /// "Automatic" transaction handler
    ///
    /// # Usage
    ///
    /// `f` receives the open transaction and hands it back alongside its result; the transaction
    /// is committed only if that result is `Ok`, otherwise it is dropped (and so rolled back).
    #[instrument(skip(pool, f))]
    pub async fn with_tx<F, Fut, T>(pool: &PgPool, f: F) -> SqlxResult<T>
    where
        F: FnOnce(Tx) -> Fut,
        Fut: Future<Output = (Tx, SqlxResult<T>)>,
    {
        let tx = Self::begin(pool).await?;
        let (mut tx, result) = f(tx).await;

        match result {
            Ok(val) => {
                tx.commit().await?;
                Ok(val)
            }
            Err(e) => {
                tracing::trace!(error = ?e, "transacted query failure");
                Err(e)
            }
        }
    }

    #[instrument(skip(pool))]
    pub async fn begin(pool: &PgPool) -> SqlxResult<Self> {
        let inner = pool.begin().await?;
        Ok(Self { inner: Some(inner) })
    }

    #[instrument(skip(self))]
    pub async fn commit(&mut self) -> SqlxResult<()> {
        if let Some(tx) = self.inner.take() {
            tx.commit().await
        } else {
            Err(sqlx::Error::Protocol("Transaction already completed".into()))
        }
    }

    #[instrument(skip(self))]
    pub async fn rollback(&mut self) -> SqlxResult<()> {
        if let Some(tx) = self.inner.take() {
            tx.rollback().await
        } else {
            Err(sqlx::Error::Protocol("Transaction already completed".into()))
        }
    }

    fn inner_mut(&mut self) -> SqlxResult<&mut Transaction<'static, Postgres>> {
        self.inner
            .as_mut()
            .ok_or_else(|| sqlx::Error::Protocol("Transaction already completed".into()))
    }

    /// Conditionally marks a code as scanned - only succeeds if the code exists, belongs to an
    /// active batch, and hasn't been scanned yet. The row lock taken here is what serialises
    /// concurrent attempts on the same code.
    #[instrument(skip(self))]
    pub async fn claim_code(
        &mut self,
        batch_id: &BatchId,
        qr_id: &QrId,
        customer_id: &CustomerId,
    ) -> SqlxResult<bool> {
        let claimed = sqlx::query(
            r#"
            UPDATE qr_code AS c
            SET
                is_scanned = TRUE,
                scanned_by = $3,
                scanned_at = NOW()
            FROM qr_batch AS b
            WHERE c.batch_id = b.batch_id
                AND b.is_active
                AND c.batch_id = $1
                AND c.qr_id = $2
                AND NOT c.is_scanned
            "#,
        )
        .bind(batch_id)
        .bind(qr_id)
        .bind(customer_id)
        .execute(&mut **self.inner_mut()?)
        .await?
        .rows_affected();

        Ok(claimed == 1)
    }

    /// Explains why `claim_code` didn't match a row
    #[instrument(skip(self))]
    pub async fn unclaimed_reason(
        &mut self,
        batch_id: &BatchId,
        qr_id: &QrId,
    ) -> SqlxResult<CommitOutcome> {
        let row: Option<(bool, Option<bool>)> = sqlx::query_as(
            r#"
            SELECT b.is_active, c.is_scanned
            FROM qr_batch AS b
            LEFT JOIN qr_code AS c
                ON c.batch_id = b.batch_id AND c.qr_id = $2
            WHERE b.batch_id = $1
            "#,
        )
        .bind(batch_id)
        .bind(qr_id)
        .fetch_optional(&mut **self.inner_mut()?)
        .await?;

        Ok(match row {
            None | Some((false, _)) => CommitOutcome::BatchUnavailable,
            Some((true, None)) => CommitOutcome::CodeMissing,
            Some((true, Some(_))) => CommitOutcome::AlreadyScanned,
        })
    }

    #[instrument(skip(self))]
    pub async fn credit_points(
        &mut self,
        customer_id: &CustomerId,
        points: i64,
    ) -> SqlxResult<Option<CustomerSummary>> {
        sqlx::query_as::<_, CustomerSummary>(
            r#"
            UPDATE customer
            SET
                points = points + $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, name, username, points
            "#,
        )
        .bind(customer_id)
        .bind(points)
        .fetch_optional(&mut **self.inner_mut()?)
        .await
    }

    /// Reads a customer's balance while holding the row lock until the transaction ends
    #[instrument(skip(self))]
    pub async fn lock_points(&mut self, customer_id: &CustomerId) -> SqlxResult<Option<i64>> {
        sqlx::query_scalar::<_, i64>("SELECT points FROM customer WHERE id = $1 FOR UPDATE")
            .bind(customer_id)
            .fetch_optional(&mut **self.inner_mut()?)
            .await
    }

    #[instrument(skip(self))]
    pub async fn set_points(&mut self, customer_id: &CustomerId, points: i64) -> SqlxResult<()> {
        sqlx::query(
            r#"
            UPDATE customer
            SET
                points = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(customer_id)
        .bind(points)
        .execute(&mut **self.inner_mut()?)
        .await?;

        Ok(())
    }

    /// Inserts the batch row; `false` if the batch id already exists
    #[instrument(skip(self, batch), fields(batch_id = %batch.batch_id))]
    pub async fn insert_batch(&mut self, batch: &QrBatch) -> SqlxResult<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO qr_batch (
                batch_id,
                name,
                points,
                url,
                is_active,
                created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (batch_id)
            DO NOTHING
            "#,
        )
        .bind(&batch.batch_id)
        .bind(&batch.name)
        .bind(batch.points)
        .bind(&batch.url)
        .bind(batch.is_active)
        .bind(batch.created_at)
        .execute(&mut **self.inner_mut()?)
        .await?
        .rows_affected();

        Ok(inserted == 1)
    }

    /// Bulk-inserts a batch's codes, preserving their order via `position`
    #[instrument(skip(self, batch), fields(batch_id = %batch.batch_id, count = batch.codes.len()))]
    pub async fn insert_codes(&mut self, batch: &QrBatch) -> SqlxResult<()> {
        let (qr_ids, images): (Vec<String>, Vec<Option<String>>) = batch
            .codes
            .iter()
            .map(|c| (c.qr_id.0.clone(), c.image.clone()))
            .unzip();
        let positions: Vec<i64> = (0..batch.codes.len() as i64).collect();

        sqlx::query(
            r#"
            INSERT INTO qr_code (batch_id, qr_id, position, image)
            SELECT $1, codes.qr_id, codes.position, codes.image
            FROM UNNEST($2::TEXT[], $3::BIGINT[], $4::TEXT[])
                AS codes (qr_id, position, image)
            "#,
        )
        .bind(&batch.batch_id)
        .bind(qr_ids)
        .bind(positions)
        .bind(images)
        .execute(&mut **self.inner_mut()?)
        .await?;

        Ok(())
    }
}

pub mod sql_fragment {
    pub const CUSTOMER_FIELDS: &str = r#"
        id,
        name,
        username,
        phone,
        email,
        points,
        created_at,
        updated_at
    "#;

    pub const BATCH_FIELDS: &str = r#"
        batch_id,
        name,
        points,
        url,
        is_active,
        created_at
    "#;

    pub const CODE_FIELDS: &str = r#"
        qr_id,
        image,
        is_scanned,
        scanned_by,
        scanned_at
    "#;

    pub const SCHEME_FIELDS: &str = r#"
        id,
        title,
        description,
        image,
        points
    "#;
}

#[async_trait]
pub trait Repository {
    type Ident: for<'q> sqlx::Encode<'q, Postgres> + sqlx::Type<Postgres> + Send + Sync + fmt::Debug;
    type Output: for<'r> sqlx::FromRow<'r, PgRow> + Sized + Unpin + Send + fmt::Debug;

    const BASE_FIELDS: &'static str;
    const TABLE_NAME: &'static str;
    const ID_COLUMN: &'static str = "id";

    fn new(pool: PgPool) -> Self
    where
        Self: Sized;

    fn pool(&self) -> &PgPool;

    #[instrument(skip(self, id))]
    async fn get_by_id(&self, id: &Self::Ident) -> SqlxResult<Option<Self::Output>> {
        sqlx::query_as::<_, Self::Output>(&format!(
            "SELECT {} FROM {} WHERE {} = $1",
            Self::BASE_FIELDS,
            Self::TABLE_NAME,
            Self::ID_COLUMN,
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
    }
}
