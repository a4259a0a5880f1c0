//! Scan payload parsing.
//!
//! A printed code encodes a handful of `Label: value` lines, e.g.
//!
//! ```text
//! QR ID: 5F1C0A...
//! Batch ID: SPRING-24
//! Points: 50
//! URL: https://example.com/scan
//! ```
//!
//! Labels are matched case-insensitively on the text before the first `:`, in any order. Only the
//! first occurrence of a label is used and unknown labels are skipped.

use core::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::db::models::batch::{BatchId, QrId};

pub const QR_ID_LABEL: &str = "QR ID";
pub const BATCH_ID_LABEL: &str = "Batch ID";
pub const POINTS_LABEL: &str = "Points";
pub const URL_LABEL: &str = "URL";

/// Largest point value a single code may carry
pub const MAX_POINTS: i64 = 1_000_000;

pub type PayloadResult<T> = core::result::Result<T, PayloadError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("missing '{0}' line")]
    MissingLabel(&'static str),

    #[error("empty value for '{0}'")]
    EmptyValue(&'static str),

    #[error("points value '{0}' is not an integer")]
    InvalidPoints(String),

    #[error("points value must be greater than zero (got {0})")]
    NonPositivePoints(i64),

    #[error("points value must not exceed {MAX_POINTS} (got {0})")]
    PointsTooLarge(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPayload {
    pub qr_id: QrId,
    pub batch_id: BatchId,
    pub points: i64,
}

impl ScanPayload {
    pub fn parse(raw: &str) -> PayloadResult<Self> {
        let mut qr_id = None;
        let mut batch_id = None;
        let mut points = None;

        for (label, value) in raw.lines().filter_map(split_line) {
            let slot = if label.eq_ignore_ascii_case(QR_ID_LABEL) {
                &mut qr_id
            } else if label.eq_ignore_ascii_case(BATCH_ID_LABEL) {
                &mut batch_id
            } else if label.eq_ignore_ascii_case(POINTS_LABEL) {
                &mut points
            } else {
                continue;
            };

            if slot.is_none() {
                *slot = Some(value);
            }
        }

        let qr_id = required(qr_id, QR_ID_LABEL)?;
        let batch_id = required(batch_id, BATCH_ID_LABEL)?;
        let points = parse_points(required(points, POINTS_LABEL)?)?;

        Ok(Self {
            qr_id: qr_id.into(),
            batch_id: batch_id.into(),
            points,
        })
    }

    /// Canonical text form, as printed into generated codes
    pub fn render(&self, url: Option<&str>) -> String {
        let mut out = format!(
            "{QR_ID_LABEL}: {}\n{BATCH_ID_LABEL}: {}\n{POINTS_LABEL}: {}",
            self.qr_id, self.batch_id, self.points
        );

        if let Some(url) = url {
            out.push_str(&format!("\n{URL_LABEL}: {url}"));
        }

        out
    }
}

fn split_line(line: &str) -> Option<(&str, &str)> {
    line.split_once(':')
        .map(|(label, value)| (label.trim(), value.trim()))
}

fn required<'a>(value: Option<&'a str>, label: &'static str) -> PayloadResult<&'a str> {
    match value {
        None => Err(PayloadError::MissingLabel(label)),
        Some("") => Err(PayloadError::EmptyValue(label)),
        Some(v) => Ok(v),
    }
}

fn parse_points(raw: &str) -> PayloadResult<i64> {
    let points = raw
        .parse::<i64>()
        .map_err(|_| PayloadError::InvalidPoints(raw.to_string()))?;

    if points <= 0 {
        return Err(PayloadError::NonPositivePoints(points));
    }

    if points > MAX_POINTS {
        return Err(PayloadError::PointsTooLarge(points));
    }

    Ok(points)
}

impl FromStr for ScanPayload {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ScanPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} (+{})", self.batch_id, self.qr_id, self.points)
    }
}
