use sqlx::PgPool;

use super::sql_fragment;
use crate::db::models::customer::{Customer, CustomerId};
use crate::db::repositories::Repository;

#[derive(Debug)]
pub struct CustomerRepository {
    pool: PgPool,
}

#[async_trait::async_trait]
impl Repository for CustomerRepository {
    type Ident = CustomerId;
    type Output = Customer;

    const BASE_FIELDS: &'static str = sql_fragment::CUSTOMER_FIELDS;
    const TABLE_NAME: &'static str = "customer";

    fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }
}
