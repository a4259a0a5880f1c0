use sqlx::{PgPool, Result as SqlxResult};
use tracing::instrument;

use super::sql_fragment;
use crate::db::models::scheme::Scheme;
use crate::db::repositories::Repository;

#[derive(Debug)]
pub struct SchemeRepository {
    pool: PgPool,
}

#[async_trait::async_trait]
impl Repository for SchemeRepository {
    type Ident = String;
    type Output = Scheme;

    const BASE_FIELDS: &'static str = sql_fragment::SCHEME_FIELDS;
    const TABLE_NAME: &'static str = "scheme";

    fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl SchemeRepository {
    #[instrument(skip(self))]
    pub async fn get_by_range(&self, limit: i64, offset: i64) -> SqlxResult<Vec<Scheme>> {
        sqlx::query_as::<_, Scheme>(&format!(
            "SELECT {} FROM {} ORDER BY points ASC, title ASC LIMIT $1 OFFSET $2",
            Self::BASE_FIELDS,
            Self::TABLE_NAME,
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    #[instrument(skip(self))]
    pub async fn count(&self) -> SqlxResult<i64> {
        sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", Self::TABLE_NAME))
            .fetch_one(&self.pool)
            .await
    }
}
