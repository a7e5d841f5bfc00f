//! Translates verified payment-gateway notifications into invoice and seat
//! state transitions, idempotently.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::gateway::{PaymentGateway, PaymentOutcome};
use crate::models::InvoiceStatus;
use crate::store::{FinalizeOutcome, InventoryStore};
use crate::utils::error::AppError;

/// What handling a webhook did. `Ignored` still answers HTTP 200: the event
/// was authentic, it just required no action here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied,
    Ignored,
    Flagged,
}

pub struct PaymentReconciler {
    store: Arc<dyn InventoryStore>,
    gateway: Arc<dyn PaymentGateway>,
}

impl PaymentReconciler {
    pub fn new(store: Arc<dyn InventoryStore>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { store, gateway }
    }

    /// Verification comes first; a body failing the signature check mutates
    /// nothing. Every transition is gated on the invoice status read inside
    /// the transaction that writes it, so re-delivery and out-of-order
    /// delivery are safe.
    pub async fn handle_webhook(&self, raw_body: &[u8]) -> Result<WebhookOutcome, AppError> {
        let event = self.gateway.verify_webhook(raw_body)?;

        let invoice = match self.store.invoice_by_order_code(event.order_code).await? {
            Some(invoice) => invoice,
            None => {
                // The gateway also notifies about orders this system never
                // issued (e.g. other merchants' test events).
                info!(order_code = event.order_code, "Webhook for unknown order code ignored");
                return Ok(WebhookOutcome::Ignored);
            }
        };

        match event.outcome {
            PaymentOutcome::Paid => {
                if event.amount != invoice.total {
                    warn!(
                        invoice_id = %invoice.id,
                        expected = %invoice.total,
                        received = %event.amount,
                        "Paid amount differs from invoice total"
                    );
                    self.store
                        .add_reconciliation_flag(
                            invoice.id,
                            &format!(
                                "paid amount {} differs from invoice total {}",
                                event.amount, invoice.total
                            ),
                        )
                        .await?;
                    return Ok(WebhookOutcome::Flagged);
                }
                self.apply_paid(invoice.id).await
            }
            PaymentOutcome::Cancelled => self.apply_cancelled(invoice.id).await,
        }
    }

    async fn apply_paid(&self, invoice_id: uuid::Uuid) -> Result<WebhookOutcome, AppError> {
        match self.store.finalize_paid_invoice(invoice_id).await? {
            FinalizeOutcome::Finalized(tickets) => {
                info!(
                    %invoice_id,
                    tickets = tickets.len(),
                    "Invoice paid, seats sold, tickets issued"
                );
                Ok(WebhookOutcome::Applied)
            }
            FinalizeOutcome::NotPending(InvoiceStatus::Paid) => {
                debug!(%invoice_id, "Replayed paid webhook, already applied");
                Ok(WebhookOutcome::Ignored)
            }
            FinalizeOutcome::NotPending(status) => {
                // The seats may already be released or resold; accepting the
                // money silently would double-sell. Leave it to operations.
                warn!(%invoice_id, ?status, "Paid webhook for a closed invoice");
                self.store
                    .add_reconciliation_flag(
                        invoice_id,
                        &format!("paid webhook arrived while invoice was {status:?}"),
                    )
                    .await?;
                Ok(WebhookOutcome::Flagged)
            }
            FinalizeOutcome::SeatsLost(seats) => {
                warn!(%invoice_id, ?seats, "Paid webhook but seat holds were reclaimed");
                self.store
                    .add_reconciliation_flag(
                        invoice_id,
                        &format!("paid webhook but seats {seats:?} were reclaimed"),
                    )
                    .await?;
                Ok(WebhookOutcome::Flagged)
            }
        }
    }

    async fn apply_cancelled(&self, invoice_id: uuid::Uuid) -> Result<WebhookOutcome, AppError> {
        if self.store.cancel_invoice(invoice_id).await? {
            info!(%invoice_id, "Invoice cancelled, holds released");
            return Ok(WebhookOutcome::Applied);
        }
        let status = self
            .store
            .invoice(invoice_id)
            .await?
            .map(|i| i.status)
            .unwrap_or(InvoiceStatus::Cancelled);
        if status == InvoiceStatus::Paid {
            warn!(%invoice_id, "Cancellation webhook for a paid invoice");
            self.store
                .add_reconciliation_flag(invoice_id, "cancellation webhook after payment")
                .await?;
            return Ok(WebhookOutcome::Flagged);
        }
        debug!(%invoice_id, ?status, "Cancellation webhook required no action");
        Ok(WebhookOutcome::Ignored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockGateway;
    use crate::models::{SeatStatus, Showtime, ShowtimeSeat, TicketStatus};
    use crate::services::invoices::{CheckoutRequest, InvoiceBuilder};
    use crate::store::MemoryStore;
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;
    use std::sync::Arc;
    use uuid::Uuid;

    struct Fixture {
        store: Arc<MemoryStore>,
        gateway: Arc<MockGateway>,
        reconciler: PaymentReconciler,
        seat_ids: Vec<Uuid>,
        invoice_id: Uuid,
        order_code: i64,
        total: i64,
    }

    async fn paid_checkout_fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockGateway::new("test-checksum"));

        let start = Utc::now() + Duration::hours(4);
        let showtime = Showtime {
            id: Uuid::new_v4(),
            film_title: "Ran".into(),
            room: "R3".into(),
            start_time: start,
            end_time: start + Duration::minutes(162),
            base_price: Decimal::from(75_000),
            format_factor: Decimal::ONE,
            language_factor: Decimal::ONE,
        };
        let seat_ids: Vec<Uuid> = ["C1", "C2"]
            .iter()
            .map(|label| {
                let seat = ShowtimeSeat {
                    id: Uuid::new_v4(),
                    showtime_id: showtime.id,
                    seat_label: (*label).into(),
                    seat_factor: Decimal::ONE,
                    status: SeatStatus::Free,
                    hold_expires_at: None,
                    hold_session: None,
                };
                let id = seat.id;
                store.insert_seat(seat);
                id
            })
            .collect();
        store.insert_showtime(showtime);

        let builder = InvoiceBuilder::new(
            store.clone(),
            gateway.clone(),
            Duration::seconds(300),
            Duration::seconds(900),
        );
        let response = builder
            .create_invoice(
                Uuid::new_v4(),
                CheckoutRequest {
                    seat_ids: seat_ids.clone(),
                    hold_session: None,
                    combos: vec![],
                    voucher_codes: vec![],
                },
            )
            .await
            .unwrap();

        let reconciler = PaymentReconciler::new(store.clone(), gateway.clone());
        Fixture {
            store,
            gateway,
            reconciler,
            seat_ids,
            invoice_id: response.invoice_id,
            order_code: response.order_code,
            total: 150_000,
        }
    }

    #[tokio::test]
    async fn paid_webhook_sells_seats_and_issues_tickets() {
        let f = paid_checkout_fixture().await;
        let body = f.gateway.webhook_body(f.order_code, f.total, true);

        let outcome = f.reconciler.handle_webhook(&body).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Applied);

        let invoice = f.store.invoice(f.invoice_id).await.unwrap().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Paid);

        let seats = f.store.seats(&f.seat_ids).await.unwrap();
        assert!(seats.iter().all(|s| s.status == SeatStatus::Sold));

        let tickets = f.store.tickets_for_invoice(f.invoice_id).await.unwrap();
        assert_eq!(tickets.len(), 2);
        assert!(tickets.iter().all(|t| t.status == TicketStatus::Unused));
    }

    #[tokio::test]
    async fn replayed_paid_webhook_is_idempotent() {
        let f = paid_checkout_fixture().await;
        let body = f.gateway.webhook_body(f.order_code, f.total, true);

        assert_eq!(
            f.reconciler.handle_webhook(&body).await.unwrap(),
            WebhookOutcome::Applied
        );
        for _ in 0..3 {
            assert_eq!(
                f.reconciler.handle_webhook(&body).await.unwrap(),
                WebhookOutcome::Ignored
            );
        }

        let tickets = f.store.tickets_for_invoice(f.invoice_id).await.unwrap();
        assert_eq!(tickets.len(), 2, "replays must not duplicate tickets");
    }

    #[tokio::test]
    async fn cancelled_webhook_releases_the_holds() {
        let f = paid_checkout_fixture().await;
        let body = f.gateway.webhook_body(f.order_code, f.total, false);

        let outcome = f.reconciler.handle_webhook(&body).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Applied);

        let invoice = f.store.invoice(f.invoice_id).await.unwrap().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Cancelled);
        let seats = f.store.seats(&f.seat_ids).await.unwrap();
        assert!(seats.iter().all(|s| s.status == SeatStatus::Free));
    }

    #[tokio::test]
    async fn paid_webhook_never_resurrects_a_cancelled_invoice() {
        let f = paid_checkout_fixture().await;
        let cancel = f.gateway.webhook_body(f.order_code, f.total, false);
        let paid = f.gateway.webhook_body(f.order_code, f.total, true);

        f.reconciler.handle_webhook(&cancel).await.unwrap();
        let outcome = f.reconciler.handle_webhook(&paid).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Flagged);

        let invoice = f.store.invoice(f.invoice_id).await.unwrap().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Cancelled);

        let flags = f.store.reconciliation_flags().await.unwrap();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].invoice_id, f.invoice_id);
    }

    #[tokio::test]
    async fn tampered_payload_is_rejected_without_mutation() {
        let f = paid_checkout_fixture().await;
        let mut body: serde_json::Value =
            serde_json::from_slice(&f.gateway.webhook_body(f.order_code, f.total, true)).unwrap();
        body["data"]["amount"] = serde_json::json!(1);

        let err = f
            .reconciler
            .handle_webhook(&serde_json::to_vec(&body).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Signature(_)));

        let invoice = f.store.invoice(f.invoice_id).await.unwrap().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Pending);
    }

    #[tokio::test]
    async fn unknown_order_code_is_ignored() {
        let f = paid_checkout_fixture().await;
        let body = f.gateway.webhook_body(999_999, 1_000, true);
        assert_eq!(
            f.reconciler.handle_webhook(&body).await.unwrap(),
            WebhookOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn amount_mismatch_is_flagged_not_applied() {
        let f = paid_checkout_fixture().await;
        let body = f.gateway.webhook_body(f.order_code, f.total - 1, true);

        let outcome = f.reconciler.handle_webhook(&body).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Flagged);

        let invoice = f.store.invoice(f.invoice_id).await.unwrap().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Pending);
    }
}
