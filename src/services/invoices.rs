//! Checkout validation, pricing, and invoice + payment-session creation.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::gateway::PaymentGateway;
use crate::models::{
    invoice::order_code_for, seat_price, ComboLine, Invoice, InvoiceStatus, Voucher, VoucherTarget,
};
use crate::store::InventoryStore;
use crate::utils::error::AppError;

#[derive(Debug, Clone, Deserialize)]
pub struct ComboSelection {
    pub combo_item_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    pub seat_ids: Vec<Uuid>,
    /// Hold session from a prior `/seats/hold` call. When absent the seats
    /// are held as part of this checkout.
    #[serde(default)]
    pub hold_session: Option<Uuid>,
    #[serde(default)]
    pub combos: Vec<ComboSelection>,
    #[serde(default)]
    pub voucher_codes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutResponse {
    pub invoice_id: Uuid,
    pub order_code: i64,
    pub total: Decimal,
    pub checkout_url: String,
    pub payment_due_at: DateTime<Utc>,
}

pub struct InvoiceBuilder {
    store: Arc<dyn InventoryStore>,
    gateway: Arc<dyn PaymentGateway>,
    hold_duration: Duration,
    payment_timeout: Duration,
}

/// Applies at most one voucher per target, each capped by its ceiling.
/// Order of the voucher list does not affect the result.
fn discounted_total(seat_subtotal: Decimal, combo_subtotal: Decimal, vouchers: &[Voucher]) -> Decimal {
    let mut total = seat_subtotal + combo_subtotal;
    for voucher in vouchers {
        let base = match voucher.target {
            VoucherTarget::TicketDiscount => seat_subtotal,
            VoucherTarget::ComboDiscount => combo_subtotal,
        };
        total -= voucher.discount_for(base);
    }
    total.max(Decimal::ZERO)
}

impl InvoiceBuilder {
    pub fn new(
        store: Arc<dyn InventoryStore>,
        gateway: Arc<dyn PaymentGateway>,
        hold_duration: Duration,
        payment_timeout: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            hold_duration,
            payment_timeout,
        }
    }

    pub async fn create_invoice(
        &self,
        customer_id: Uuid,
        request: CheckoutRequest,
    ) -> Result<CheckoutResponse, AppError> {
        let now = Utc::now();

        // Seats: exist, distinct, one future showtime.
        if request.seat_ids.is_empty() {
            return Err(AppError::Validation("no seats in checkout".to_string()));
        }
        let unique: HashSet<Uuid> = request.seat_ids.iter().copied().collect();
        if unique.len() != request.seat_ids.len() {
            return Err(AppError::Validation("duplicate seats in checkout".to_string()));
        }
        let seats = self.store.seats(&request.seat_ids).await?;
        let showtime_id = seats[0].showtime_id;
        if seats.iter().any(|s| s.showtime_id != showtime_id) {
            return Err(AppError::Validation(
                "seats span more than one showtime".to_string(),
            ));
        }
        let showtime = self
            .store
            .showtime(showtime_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("showtime {showtime_id}")))?;
        if showtime.start_time <= now {
            return Err(AppError::Validation(
                "showtime has already started".to_string(),
            ));
        }

        // Combo lines: valid references, positive quantities, enough stock.
        let mut combo_lines = Vec::with_capacity(request.combos.len());
        let mut combo_subtotal = Decimal::ZERO;
        for selection in &request.combos {
            if selection.quantity <= 0 {
                return Err(AppError::Validation("combo quantity must be positive".to_string()));
            }
            let item = self
                .store
                .combo_item(selection.combo_item_id)
                .await?
                .ok_or_else(|| {
                    AppError::Validation(format!("unknown combo item {}", selection.combo_item_id))
                })?;
            if let Some(stock) = item.stock {
                if stock < selection.quantity {
                    return Err(AppError::conflict(format!(
                        "combo item '{}' has only {stock} left",
                        item.name
                    )));
                }
            }
            combo_subtotal += item.price * Decimal::from(selection.quantity);
            combo_lines.push(ComboLine {
                combo_item_id: item.id,
                quantity: selection.quantity,
                unit_price: item.price,
            });
        }

        let seat_subtotal: Decimal = seats.iter().map(|s| seat_price(&showtime, s)).sum();

        // Vouchers: active, in window, under cap, over minimum, one per
        // target kind.
        let mut vouchers: Vec<Voucher> = Vec::with_capacity(request.voucher_codes.len());
        for code in &request.voucher_codes {
            let voucher = self
                .store
                .voucher_by_code(code)
                .await?
                .ok_or_else(|| AppError::Validation(format!("unknown voucher '{code}'")))?;
            if voucher.usage_count >= voucher.usage_cap {
                return Err(AppError::conflict(format!(
                    "voucher '{code}' has reached its usage cap"
                )));
            }
            if !voucher.is_usable_at(now) {
                return Err(AppError::Validation(format!("voucher '{code}' is not active")));
            }
            if vouchers.iter().any(|v| v.target == voucher.target) {
                return Err(AppError::Validation(format!(
                    "only one {:?} voucher may be applied",
                    voucher.target
                )));
            }
            let base = match voucher.target {
                VoucherTarget::TicketDiscount => seat_subtotal,
                VoucherTarget::ComboDiscount => combo_subtotal,
            };
            if base < voucher.min_subtotal {
                return Err(AppError::Validation(format!(
                    "voucher '{code}' requires a subtotal of at least {}",
                    voucher.min_subtotal
                )));
            }
            vouchers.push(voucher);
        }

        let total = discounted_total(seat_subtotal, combo_subtotal, &vouchers);

        // Hold: adopt whatever the caller's session already owns and hold
        // the rest under that same session; without a session, hold fresh.
        let (hold_session, fresh_seats) = match request.hold_session {
            Some(session) => {
                let lost: Vec<Uuid> = seats
                    .iter()
                    .filter(|s| !s.held_by_at(session, now) && !s.claimable_at(now))
                    .map(|s| s.id)
                    .collect();
                if !lost.is_empty() {
                    return Err(AppError::seat_conflict(&lost));
                }
                let fresh: Vec<Uuid> = seats
                    .iter()
                    .filter(|s| !s.held_by_at(session, now))
                    .map(|s| s.id)
                    .collect();
                if !fresh.is_empty() {
                    self.store
                        .hold_seats(&fresh, session, now + self.hold_duration, now)
                        .await?;
                }
                (session, fresh)
            }
            None => {
                let session = Uuid::new_v4();
                self.store
                    .hold_seats(&request.seat_ids, session, now + self.hold_duration, now)
                    .await?;
                (session, request.seat_ids.clone())
            }
        };

        let invoice = Invoice {
            id: Uuid::new_v4(),
            customer_id,
            order_code: 0,
            seat_ids: request.seat_ids.clone(),
            combo_lines,
            voucher_ids: vouchers.iter().map(|v| v.id).collect(),
            total,
            status: InvoiceStatus::Pending,
            hold_session,
            payment_due_at: now + self.payment_timeout,
            payment_session_id: None,
            created_at: now,
        };
        let invoice = Invoice {
            order_code: order_code_for(invoice.id),
            ..invoice
        };

        if let Err(e) = self.store.insert_invoice(&invoice).await {
            // Only the holds this call took; a pre-existing hold stays up.
            if !fresh_seats.is_empty() {
                let _ = self
                    .store
                    .release_seats(&fresh_seats, Some(hold_session))
                    .await;
            }
            return Err(e.into());
        }

        let description = format!("{} x{} seats", showtime.film_title, invoice.seat_ids.len());
        let session = match self
            .gateway
            .create_checkout_session(invoice.order_code, total, &description)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                // No stranded inventory: drop the invoice and its holds.
                warn!(invoice_id = %invoice.id, error = %e, "Checkout session failed, rolling back invoice");
                self.store.delete_invoice(invoice.id).await?;
                return Err(e.into());
            }
        };
        self.store
            .set_invoice_session(invoice.id, &session.session_id)
            .await?;

        info!(
            invoice_id = %invoice.id,
            order_code = invoice.order_code,
            %total,
            "Invoice created, awaiting payment"
        );
        Ok(CheckoutResponse {
            invoice_id: invoice.id,
            order_code: invoice.order_code,
            total,
            checkout_url: session.checkout_url,
            payment_due_at: invoice.payment_due_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{MockFailure, MockGateway};
    use crate::models::{ComboItem, SeatStatus, Showtime, ShowtimeSeat};
    use crate::store::MemoryStore;

    fn future_showtime(base_price: i64) -> Showtime {
        let start = Utc::now() + Duration::hours(6);
        Showtime {
            id: Uuid::new_v4(),
            film_title: "Playtime".into(),
            room: "R2".into(),
            start_time: start,
            end_time: start + Duration::minutes(155),
            base_price: Decimal::from(base_price),
            format_factor: Decimal::ONE,
            language_factor: Decimal::ONE,
        }
    }

    fn seat_for(showtime: &Showtime, label: &str) -> ShowtimeSeat {
        ShowtimeSeat {
            id: Uuid::new_v4(),
            showtime_id: showtime.id,
            seat_label: label.into(),
            seat_factor: Decimal::ONE,
            status: SeatStatus::Free,
            hold_expires_at: None,
            hold_session: None,
        }
    }

    fn voucher(code: &str, target: VoucherTarget, percent: i64, cap: i64) -> Voucher {
        Voucher {
            id: Uuid::new_v4(),
            code: code.into(),
            target,
            percent_off: Decimal::from(percent),
            max_discount: Decimal::from(cap),
            min_subtotal: Decimal::ZERO,
            valid_from: Utc::now() - Duration::days(1),
            valid_until: Utc::now() + Duration::days(1),
            usage_cap: 100,
            usage_count: 0,
            active: true,
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        gateway: Arc<MockGateway>,
        builder: InvoiceBuilder,
        seat_ids: Vec<Uuid>,
    }

    fn fixture(base_price: i64) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockGateway::new("test-checksum"));
        let showtime = future_showtime(base_price);
        let seat_ids: Vec<Uuid> = ["B1", "B2"]
            .iter()
            .map(|label| {
                let s = seat_for(&showtime, label);
                let id = s.id;
                store.insert_seat(s);
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
        Fixture {
            store,
            gateway,
            builder,
            seat_ids,
        }
    }

    fn request(seat_ids: &[Uuid]) -> CheckoutRequest {
        CheckoutRequest {
            seat_ids: seat_ids.to_vec(),
            hold_session: None,
            combos: vec![],
            voucher_codes: vec![],
        }
    }

    #[tokio::test]
    async fn checkout_creates_pending_invoice_with_session() {
        let f = fixture(75_000);
        let response = f
            .builder
            .create_invoice(Uuid::new_v4(), request(&f.seat_ids))
            .await
            .unwrap();

        assert_eq!(response.total, Decimal::from(150_000));
        assert!(response.checkout_url.contains(&response.order_code.to_string()));

        let invoice = f.store.invoice(response.invoice_id).await.unwrap().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Pending);
        assert!(invoice.payment_session_id.is_some());

        let seats = f.store.seats(&f.seat_ids).await.unwrap();
        assert!(seats.iter().all(|s| s.status == SeatStatus::Held));
        assert!(seats
            .iter()
            .all(|s| s.hold_expires_at == Some(invoice.payment_due_at)));
    }

    #[tokio::test]
    async fn capped_voucher_discounts_to_the_ceiling() {
        let f = fixture(75_000);
        f.store.insert_voucher(voucher("TENOFF", VoucherTarget::TicketDiscount, 10, 10_000));

        let mut req = request(&f.seat_ids);
        req.voucher_codes = vec!["TENOFF".into()];
        let response = f.builder.create_invoice(Uuid::new_v4(), req).await.unwrap();

        // 150,000 at 10% would be 15,000 off; the cap keeps it at 10,000.
        assert_eq!(response.total, Decimal::from(140_000));
    }

    #[tokio::test]
    async fn voucher_order_does_not_change_the_total() {
        let totals: Vec<Decimal> = {
            let mut out = Vec::new();
            for codes in [["TICKET", "COMBO"], ["COMBO", "TICKET"]] {
                let f = fixture(75_000);
                f.store
                    .insert_voucher(voucher("TICKET", VoucherTarget::TicketDiscount, 10, 50_000));
                f.store
                    .insert_voucher(voucher("COMBO", VoucherTarget::ComboDiscount, 20, 50_000));
                let combo = ComboItem {
                    id: Uuid::new_v4(),
                    name: "Popcorn L".into(),
                    price: Decimal::from(40_000),
                    stock: Some(10),
                };
                let combo_id = combo.id;
                f.store.insert_combo_item(combo);

                let mut req = request(&f.seat_ids);
                req.combos = vec![ComboSelection {
                    combo_item_id: combo_id,
                    quantity: 1,
                }];
                req.voucher_codes = codes.iter().map(|c| c.to_string()).collect();
                out.push(
                    f.builder
                        .create_invoice(Uuid::new_v4(), req)
                        .await
                        .unwrap()
                        .total,
                );
            }
            out
        };
        // 150,000 − 15,000 ticket discount + 40,000 − 8,000 combo discount.
        assert_eq!(totals[0], Decimal::from(167_000));
        assert_eq!(totals[0], totals[1]);
    }

    #[tokio::test]
    async fn two_vouchers_of_the_same_target_are_rejected() {
        let f = fixture(75_000);
        f.store.insert_voucher(voucher("A", VoucherTarget::TicketDiscount, 10, 10_000));
        f.store.insert_voucher(voucher("B", VoucherTarget::TicketDiscount, 5, 10_000));

        let mut req = request(&f.seat_ids);
        req.voucher_codes = vec!["A".into(), "B".into()];
        let err = f.builder.create_invoice(Uuid::new_v4(), req).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn insufficient_combo_stock_conflicts() {
        let f = fixture(75_000);
        let combo = ComboItem {
            id: Uuid::new_v4(),
            name: "Nachos".into(),
            price: Decimal::from(35_000),
            stock: Some(1),
        };
        let combo_id = combo.id;
        f.store.insert_combo_item(combo);

        let mut req = request(&f.seat_ids);
        req.combos = vec![ComboSelection {
            combo_item_id: combo_id,
            quantity: 3,
        }];
        let err = f.builder.create_invoice(Uuid::new_v4(), req).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));
    }

    #[tokio::test]
    async fn seats_held_elsewhere_conflict() {
        let f = fixture(75_000);
        let now = Utc::now();
        f.store
            .hold_seats(&f.seat_ids[..1], Uuid::new_v4(), now + Duration::seconds(300), now)
            .await
            .unwrap();

        let err = f
            .builder
            .create_invoice(Uuid::new_v4(), request(&f.seat_ids))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));

        // Fail-fast left the other seat untouched.
        let seats = f.store.seats(&f.seat_ids[1..]).await.unwrap();
        assert_eq!(seats[0].status, SeatStatus::Free);
    }

    #[tokio::test]
    async fn gateway_failure_rolls_back_invoice_and_holds() {
        let f = fixture(75_000);
        f.gateway.fail_next_checkout(MockFailure::Provider);

        let err = f
            .builder
            .create_invoice(Uuid::new_v4(), request(&f.seat_ids))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Gateway(_)));

        let seats = f.store.seats(&f.seat_ids).await.unwrap();
        assert!(seats.iter().all(|s| s.status == SeatStatus::Free));
    }

    #[tokio::test]
    async fn checkout_holds_remaining_seats_under_the_presented_session() {
        let f = fixture(75_000);
        let now = Utc::now();
        let session = Uuid::new_v4();
        // The customer held B1 from the seat map, then checks out B1+B2.
        f.store
            .hold_seats(&f.seat_ids[..1], session, now + Duration::seconds(300), now)
            .await
            .unwrap();

        let mut req = request(&f.seat_ids);
        req.hold_session = Some(session);
        let response = f.builder.create_invoice(Uuid::new_v4(), req).await.unwrap();

        let invoice = f.store.invoice(response.invoice_id).await.unwrap().unwrap();
        assert_eq!(invoice.hold_session, session);
        let seats = f.store.seats(&f.seat_ids).await.unwrap();
        assert!(seats
            .iter()
            .all(|s| s.status == SeatStatus::Held && s.hold_session == Some(session)));
    }

    #[tokio::test]
    async fn presented_session_still_conflicts_on_seats_held_elsewhere() {
        let f = fixture(75_000);
        let now = Utc::now();
        let mine = Uuid::new_v4();
        f.store
            .hold_seats(&f.seat_ids[..1], mine, now + Duration::seconds(300), now)
            .await
            .unwrap();
        f.store
            .hold_seats(&f.seat_ids[1..], Uuid::new_v4(), now + Duration::seconds(300), now)
            .await
            .unwrap();

        let mut req = request(&f.seat_ids);
        req.hold_session = Some(mine);
        let err = f.builder.create_invoice(Uuid::new_v4(), req).await.unwrap_err();
        match err {
            AppError::Conflict { details, .. } => {
                let listed = details.unwrap()["unavailable_seats"].clone();
                assert_eq!(listed, serde_json::json!([f.seat_ids[1]]));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn adopts_an_existing_hold_session() {
        let f = fixture(75_000);
        let now = Utc::now();
        let session = Uuid::new_v4();
        f.store
            .hold_seats(&f.seat_ids, session, now + Duration::seconds(300), now)
            .await
            .unwrap();

        let mut req = request(&f.seat_ids);
        req.hold_session = Some(session);
        let response = f.builder.create_invoice(Uuid::new_v4(), req).await.unwrap();

        let invoice = f.store.invoice(response.invoice_id).await.unwrap().unwrap();
        assert_eq!(invoice.hold_session, session);
    }
}
