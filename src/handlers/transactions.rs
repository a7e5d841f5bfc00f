use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::services::CheckoutRequest;
use crate::state::AppState;
use crate::utils::caller::Caller;
use crate::utils::error::AppError;
use crate::utils::response::{created, empty_success};

pub async fn create_checkout(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<CheckoutRequest>,
) -> Result<Response, AppError> {
    let customer_id = caller.customer()?;
    let response = state.invoices.create_invoice(customer_id, request).await?;
    Ok(created(response, "Invoice created, complete payment at checkout_url").into_response())
}

/// Public endpoint; authenticity is enforced by signature verification
/// inside the reconciler, and accepted-or-ignored both answer 200 so the
/// gateway stops retrying.
pub async fn payos_webhook(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, AppError> {
    state.reconciler.handle_webhook(&body).await?;
    Ok(empty_success("Webhook processed").into_response())
}
