use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::models::{BankAccount, RefundStatus};
use crate::state::AppState;
use crate::utils::caller::Caller;
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

#[derive(Deserialize)]
pub struct CreateRefundBody {
    pub ticket_id: Uuid,
    pub reason: String,
    pub bank_account: BankAccount,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub status: Option<RefundStatus>,
}

#[derive(Deserialize, Default)]
pub struct ApproveBody {
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Deserialize)]
pub struct RejectBody {
    pub reason: String,
}

pub async fn create_refund(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<CreateRefundBody>,
) -> Result<Response, AppError> {
    let request = state
        .refunds
        .request_refund(&caller, body.ticket_id, body.reason, body.bank_account)
        .await?;
    Ok(created(request, "Refund request submitted").into_response())
}

pub async fn list_refunds(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<ListQuery>,
) -> Result<Response, AppError> {
    let requests = state.refunds.list(&caller, query.status).await?;
    Ok(success(requests, "Refund requests").into_response())
}

pub async fn approve_refund(
    State(state): State<AppState>,
    caller: Caller,
    Path(request_id): Path<Uuid>,
    body: Option<Json<ApproveBody>>,
) -> Result<Response, AppError> {
    let note = body.and_then(|Json(b)| b.note);
    let request = state.refunds.approve(&caller, request_id, note).await?;
    Ok(success(request, "Refund request approved").into_response())
}

pub async fn reject_refund(
    State(state): State<AppState>,
    caller: Caller,
    Path(request_id): Path<Uuid>,
    Json(body): Json<RejectBody>,
) -> Result<Response, AppError> {
    let request = state.refunds.reject(&caller, request_id, body.reason).await?;
    Ok(success(request, "Refund request rejected").into_response())
}

pub async fn complete_refund(
    State(state): State<AppState>,
    caller: Caller,
    Path(request_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let request = state.refunds.complete(&caller, request_id).await?;
    Ok(success(request, "Refund completed").into_response())
}
