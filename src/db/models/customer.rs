use core::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::redeem::adjust::PointOperation;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct CustomerId(pub String);

/// Base customer table model
///
/// Identity fields are owned by the account service; this service only ever touches `points`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,
    pub username: String,
    pub phone: String,
    pub email: Option<String>,
    pub points: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CustomerSummary {
    pub id: CustomerId,
    pub name: String,
    pub username: String,
    pub points: i64,
}

/// Balance before and after an administrative adjustment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointAdjustment {
    pub customer_id: CustomerId,
    pub previous_points: i64,
    pub current_points: i64,
    pub operation: PointOperation,
}

impl From<&Customer> for CustomerSummary {
    fn from(value: &Customer) -> Self {
        Self {
            id: value.id.clone(),
            name: value.name.clone(),
            username: value.username.clone(),
            points: value.points,
        }
    }
}

impl From<String> for CustomerId {
    fn from(value: String) -> Self {
        CustomerId(value)
    }
}

impl From<&str> for CustomerId {
    fn from(value: &str) -> Self {
        CustomerId(value.to_string())
    }
}

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
