use axum::routing::{get, post};
use axum::Router;

use crate::config::{apply_security_headers, create_cors_layer};
use crate::handlers::{health_check, refunds, seats, transactions};
use crate::state::AppState;

pub fn create_routes(state: AppState) -> Router {
    let router = Router::new()
        .route("/health", get(health_check))
        .route("/seats/hold", post(seats::hold_seats))
        .route("/seats/release", post(seats::release_seats))
        .route("/transactions/checkout", post(transactions::create_checkout))
        .route("/transactions/payos/webhook", post(transactions::payos_webhook))
        .route("/refunds", post(refunds::create_refund).get(refunds::list_refunds))
        .route("/refunds/:id/approve", post(refunds::approve_refund))
        .route("/refunds/:id/reject", post(refunds::reject_refund))
        .route("/refunds/:id/complete", post(refunds::complete_refund));

    apply_security_headers(router)
        .layer(create_cors_layer())
        .with_state(state)
}
