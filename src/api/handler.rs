use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use chrono::NaiveDateTime;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::api::middleware::verify_customer::AuthedCustomer;
use crate::api::server::{AppState, JsonResult, RouteError};
use crate::db::prelude::*;
use crate::redeem::adjust::PointOperation;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemRequest {
    pub qr_data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemResponse {
    pub success: bool,
    pub message: String,
    pub points_earned: i64,
    pub total_points: i64,
    pub qr_id: QrId,
    pub batch_id: BatchId,
    pub customer: CustomerSummary,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustRequest {
    pub points: i64,
    #[serde(default)]
    pub operation: PointOperation,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustResponse {
    pub success: bool,
    pub message: String,
    pub customer_id: CustomerId,
    pub previous_points: i64,
    pub current_points: i64,
    pub operation: PointOperation,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBatchRequest {
    pub is_active: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeView {
    pub qr_id: QrId,
    pub image: Option<String>,
    pub is_scanned: bool,
    pub scanned_by: Option<CustomerId>,
    pub scanned_at: Option<NaiveDateTime>,
    pub payload: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub batch_id: BatchId,
    pub name: String,
    pub points: i64,
    pub url: Option<String>,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub total_codes: usize,
    pub scanned_codes: usize,
    pub codes: Vec<CodeView>,
}

impl From<QrBatch> for BatchResponse {
    fn from(batch: QrBatch) -> Self {
        let codes = batch
            .codes
            .iter()
            .map(|entry| CodeView {
                qr_id: entry.qr_id.clone(),
                image: entry.image.clone(),
                is_scanned: entry.is_scanned,
                scanned_by: entry.scanned_by.clone(),
                scanned_at: entry.scanned_at,
                payload: batch.payload_for(entry),
            })
            .collect();

        Self {
            total_codes: batch.codes.len(),
            scanned_codes: batch.scanned_count(),
            batch_id: batch.batch_id,
            name: batch.name,
            points: batch.points,
            url: batch.url,
            is_active: batch.is_active,
            created_at: batch.created_at,
            codes,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatusResponse {
    pub success: bool,
    pub message: String,
    pub batch_id: BatchId,
    pub is_active: bool,
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, RouteError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| RouteError::BadRequest(rejection.body_text()))
}

#[instrument(skip(state, payload), fields(customer = %customer_id))]
pub async fn redeem_qr(
    State(state): State<Arc<AppState>>,
    AuthedCustomer(customer_id): AuthedCustomer,
    payload: Result<Json<RedeemRequest>, JsonRejection>,
) -> JsonResult<RedeemResponse> {
    let request = json_body(payload)?;
    let redemption = state.engine.redeem(&customer_id, &request.qr_data).await?;

    Ok(Json(RedeemResponse {
        success: true,
        message: format!("redeemed {} points", redemption.points_earned),
        points_earned: redemption.points_earned,
        total_points: redemption.total_points,
        qr_id: redemption.qr_id,
        batch_id: redemption.batch_id,
        customer: redemption.customer,
    }))
}

#[instrument(skip(state), fields(customer = %customer_id))]
pub async fn customer_me(
    State(state): State<Arc<AppState>>,
    AuthedCustomer(customer_id): AuthedCustomer,
) -> JsonResult<CustomerSummary> {
    match state.store.customer(&customer_id).await? {
        Some(customer) => Ok(Json(CustomerSummary::from(&customer))),
        None => Err(RouteError::NotFound(String::from("customer not found"))),
    }
}

#[instrument(skip(state))]
pub async fn list_schemes(
    Query(param): Query<Pagination>,
    State(state): State<Arc<AppState>>,
) -> JsonResult<PaginatedResponse<Scheme>> {
    Ok(Json(state.store.schemes(&param).await?))
}

#[instrument(skip(state, payload))]
pub async fn adjust_points(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<AdjustRequest>, JsonRejection>,
) -> JsonResult<AdjustResponse> {
    let request = json_body(payload)?;
    let adjustment = state
        .adjuster
        .adjust(&id.into(), request.operation, request.points)
        .await?;

    Ok(Json(AdjustResponse {
        success: true,
        message: format!("points {} applied", adjustment.operation),
        customer_id: adjustment.customer_id,
        previous_points: adjustment.previous_points,
        current_points: adjustment.current_points,
        operation: adjustment.operation,
    }))
}

#[instrument(skip(state, payload))]
pub async fn create_batch(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewBatch>, JsonRejection>,
) -> Result<(StatusCode, Json<BatchResponse>), RouteError> {
    let batch = json_body(payload)?.into_batch()?;

    if !state.store.insert_batch(&batch).await? {
        return Err(RouteError::Conflict(format!(
            "batch '{}' already exists",
            batch.batch_id
        )));
    }

    tracing::info!(
        batch_id = %batch.batch_id,
        count = batch.codes.len(),
        points = batch.points,
        "created qr batch"
    );

    Ok((StatusCode::CREATED, Json(BatchResponse::from(batch))))
}

#[instrument(skip(state))]
pub async fn get_batch(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<String>,
) -> JsonResult<BatchResponse> {
    match state.store.batch(&batch_id.clone().into()).await? {
        Some(batch) => Ok(Json(BatchResponse::from(batch))),
        None => Err(RouteError::NotFound(format!("batch '{batch_id}' not found"))),
    }
}

#[instrument(skip(state, payload))]
pub async fn update_batch(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<String>,
    payload: Result<Json<UpdateBatchRequest>, JsonRejection>,
) -> JsonResult<BatchStatusResponse> {
    let request = json_body(payload)?;
    let batch_id = BatchId::from(batch_id);

    if !state
        .store
        .set_batch_active(&batch_id, request.is_active)
        .await?
    {
        return Err(RouteError::NotFound(format!("batch '{batch_id}' not found")));
    }

    tracing::info!(%batch_id, is_active = request.is_active, "updated batch status");

    Ok(Json(BatchStatusResponse {
        success: true,
        message: String::from(if request.is_active {
            "batch activated"
        } else {
            "batch deactivated"
        }),
        batch_id,
        is_active: request.is_active,
    }))
}
