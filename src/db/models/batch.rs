use core::fmt;

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::customer::CustomerId;
use crate::redeem::payload::{MAX_POINTS, ScanPayload};

pub const MAX_BATCH_SIZE: i64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct BatchId(pub String);

/// Identifier of a single code; only unique within its batch
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct QrId(pub String);

/// Base `qr_batch` table model, without its codes
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BatchRow {
    pub batch_id: BatchId,
    pub name: String,
    pub points: i64,
    pub url: Option<String>,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct QrCodeEntry {
    pub qr_id: QrId,
    pub image: Option<String>,
    pub is_scanned: bool,
    pub scanned_by: Option<CustomerId>,
    pub scanned_at: Option<NaiveDateTime>,
}

/// A batch together with the ordered list of codes it owns
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrBatch {
    pub batch_id: BatchId,
    pub name: String,
    pub points: i64,
    pub url: Option<String>,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub codes: Vec<QrCodeEntry>,
}

/// Admin request to mint a new batch of codes
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBatch {
    pub batch_id: Option<BatchId>,
    pub name: String,
    pub points: i64,
    pub count: i64,
    pub url: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidBatch {
    #[error("batch name must not be empty")]
    EmptyName,

    #[error("batch id must not be empty")]
    EmptyBatchId,

    #[error("points must be greater than zero (got {0})")]
    NonPositivePoints(i64),

    #[error("points must not exceed {MAX_POINTS} (got {0})")]
    PointsTooLarge(i64),

    #[error("count must be between 1 and {MAX_BATCH_SIZE} (got {0})")]
    BadCount(i64),
}

impl QrCodeEntry {
    pub fn unscanned(qr_id: QrId) -> Self {
        Self {
            qr_id,
            image: None,
            is_scanned: false,
            scanned_by: None,
            scanned_at: None,
        }
    }
}

impl QrBatch {
    pub fn from_parts(row: BatchRow, codes: Vec<QrCodeEntry>) -> Self {
        Self {
            batch_id: row.batch_id,
            name: row.name,
            points: row.points,
            url: row.url,
            is_active: row.is_active,
            created_at: row.created_at,
            codes,
        }
    }

    pub fn find_code(&self, qr_id: &QrId) -> Option<&QrCodeEntry> {
        self.codes.iter().find(|c| &c.qr_id == qr_id)
    }

    pub fn scanned_count(&self) -> usize {
        self.codes.iter().filter(|c| c.is_scanned).count()
    }

    /// Text to be encoded into the printed QR for `entry`
    pub fn payload_for(&self, entry: &QrCodeEntry) -> String {
        ScanPayload {
            qr_id: entry.qr_id.clone(),
            batch_id: self.batch_id.clone(),
            points: self.points,
        }
        .render(self.url.as_deref())
    }
}

impl NewBatch {
    pub fn validate(&self) -> Result<(), InvalidBatch> {
        if self.name.trim().is_empty() {
            return Err(InvalidBatch::EmptyName);
        }

        if self
            .batch_id
            .as_ref()
            .is_some_and(|id| id.0.trim().is_empty())
        {
            return Err(InvalidBatch::EmptyBatchId);
        }

        if self.points <= 0 {
            return Err(InvalidBatch::NonPositivePoints(self.points));
        }

        if self.points > MAX_POINTS {
            return Err(InvalidBatch::PointsTooLarge(self.points));
        }

        if !(1..=MAX_BATCH_SIZE).contains(&self.count) {
            return Err(InvalidBatch::BadCount(self.count));
        }

        Ok(())
    }

    /// Validates the request and mints an active batch with `count` fresh codes
    pub fn into_batch(self) -> Result<QrBatch, InvalidBatch> {
        self.validate()?;

        let batch_id = match self.batch_id {
            Some(id) => BatchId(id.0.trim().to_string()),
            None => BatchId::generate(),
        };

        let codes = (0..self.count)
            .map(|_| QrCodeEntry::unscanned(QrId::generate()))
            .collect();

        Ok(QrBatch {
            batch_id,
            name: self.name.trim().to_string(),
            points: self.points,
            url: self.url.filter(|u| !u.trim().is_empty()),
            is_active: true,
            created_at: Utc::now().naive_utc(),
            codes,
        })
    }
}

impl BatchId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string().to_uppercase())
    }
}

impl QrId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string().to_uppercase())
    }
}

impl From<&str> for BatchId {
    fn from(value: &str) -> Self {
        BatchId(value.to_string())
    }
}

impl From<String> for BatchId {
    fn from(value: String) -> Self {
        BatchId(value)
    }
}

impl From<&str> for QrId {
    fn from(value: &str) -> Self {
        QrId(value.to_string())
    }
}

impl From<String> for QrId {
    fn from(value: String) -> Self {
        QrId(value)
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for QrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
