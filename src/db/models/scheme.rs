use serde::{Deserialize, Serialize};

/// Catalog item customers can spend points on; read-only here
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Scheme {
    pub id: String,
    pub title: String,
    pub description: String,
    pub image: Option<String>,
    pub points: i64,
}
