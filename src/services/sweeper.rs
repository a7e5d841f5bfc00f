//! Periodic background sweep: expires unused tickets after their showtime
//! ends, and expires Pending invoices whose payment window lapsed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::store::InventoryStore;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub tickets_expired: u64,
    pub invoices_expired: u64,
    pub failed_batches: u64,
}

pub struct Sweeper {
    store: Arc<dyn InventoryStore>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(store: Arc<dyn InventoryStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        // A slow sweep just runs again next tick, no catch-up burst.
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let report = self.sweep_once(Utc::now()).await;
            if report != SweepReport::default() {
                info!(
                    tickets_expired = report.tickets_expired,
                    invoices_expired = report.invoices_expired,
                    failed_batches = report.failed_batches,
                    "Sweep finished"
                );
            }
        }
    }

    /// One full sweep. Both passes are idempotent; a failing batch is logged
    /// and skipped so the rest still make progress, and the next run retries.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        // Tickets: Unused past showtime end become Expired. Seat and invoice
        // state is deliberately untouched; a sold seat of an ended showtime
        // stays Sold.
        match self.store.showtimes_with_stale_tickets(now).await {
            Err(e) => {
                warn!(error = %e, "Could not list showtimes for ticket expiry");
                report.failed_batches += 1;
            }
            Ok(showtimes) => {
                for showtime_id in showtimes {
                    match self.store.expire_unused_tickets(showtime_id, now).await {
                        Ok(count) => report.tickets_expired += count,
                        Err(e) => {
                            warn!(%showtime_id, error = %e, "Ticket expiry batch failed");
                            report.failed_batches += 1;
                        }
                    }
                }
            }
        }

        // Invoices: Pending past their payment window become Expired and
        // their holds are released, so a late "paid" webhook gets flagged
        // instead of applied.
        match self.store.pending_invoices_due_before(now).await {
            Err(e) => {
                warn!(error = %e, "Could not list overdue invoices");
                report.failed_batches += 1;
            }
            Ok(invoices) => {
                for invoice_id in invoices {
                    match self.store.expire_invoice(invoice_id).await {
                        Ok(true) => report.invoices_expired += 1,
                        Ok(false) => {}
                        Err(e) => {
                            warn!(%invoice_id, error = %e, "Invoice expiry failed");
                            report.failed_batches += 1;
                        }
                    }
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        InvoiceStatus, SeatStatus, Showtime, ShowtimeSeat, Ticket, TicketStatus,
    };
    use crate::store::MemoryStore;
    use chrono::Duration as ChronoDuration;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn ended_showtime() -> Showtime {
        let start = Utc::now() - ChronoDuration::hours(5);
        Showtime {
            id: Uuid::new_v4(),
            film_title: "M".into(),
            room: "R1".into(),
            start_time: start,
            end_time: start + ChronoDuration::minutes(110),
            base_price: Decimal::from(60_000),
            format_factor: Decimal::ONE,
            language_factor: Decimal::ONE,
        }
    }

    fn sold_seat(showtime_id: Uuid) -> ShowtimeSeat {
        ShowtimeSeat {
            id: Uuid::new_v4(),
            showtime_id,
            seat_label: "D1".into(),
            seat_factor: Decimal::ONE,
            status: SeatStatus::Sold,
            hold_expires_at: None,
            hold_session: None,
        }
    }

    fn unused_ticket(seat: &ShowtimeSeat) -> Ticket {
        Ticket {
            id: Uuid::new_v4(),
            invoice_id: Uuid::new_v4(),
            showtime_seat_id: seat.id,
            customer_id: Uuid::new_v4(),
            price: Decimal::from(60_000),
            status: TicketStatus::Unused,
        }
    }

    #[tokio::test]
    async fn expires_unused_tickets_of_ended_showtimes_only() {
        let store = Arc::new(MemoryStore::new());

        let ended = ended_showtime();
        let ended_seat = sold_seat(ended.id);
        let stale = unused_ticket(&ended_seat);

        let mut running = ended_showtime();
        running.end_time = Utc::now() + ChronoDuration::hours(1);
        let running_seat = sold_seat(running.id);
        let fresh = unused_ticket(&running_seat);

        store.insert_showtime(ended);
        store.insert_showtime(running);
        store.insert_seat(ended_seat.clone());
        store.insert_seat(running_seat);
        store.insert_ticket(stale.clone());
        store.insert_ticket(fresh.clone());

        let sweeper = Sweeper::new(store.clone(), Duration::from_secs(60));
        let report = sweeper.sweep_once(Utc::now()).await;
        assert_eq!(report.tickets_expired, 1);

        let stale = store.ticket(stale.id).await.unwrap().unwrap();
        assert_eq!(stale.status, TicketStatus::Expired);
        let fresh = store.ticket(fresh.id).await.unwrap().unwrap();
        assert_eq!(fresh.status, TicketStatus::Unused);

        // Expiry reflects gate usability, not inventory: the seat stays Sold.
        let seat = store.seats(&[ended_seat.id]).await.unwrap();
        assert_eq!(seat[0].status, SeatStatus::Sold);
    }

    #[tokio::test]
    async fn sweep_is_monotonic() {
        let store = Arc::new(MemoryStore::new());
        let showtime = ended_showtime();
        let seat = sold_seat(showtime.id);
        let ticket = unused_ticket(&seat);
        store.insert_showtime(showtime);
        store.insert_seat(seat);
        store.insert_ticket(ticket);

        let sweeper = Sweeper::new(store, Duration::from_secs(60));
        assert_eq!(sweeper.sweep_once(Utc::now()).await.tickets_expired, 1);
        assert_eq!(sweeper.sweep_once(Utc::now()).await, SweepReport::default());
    }

    #[tokio::test]
    async fn overdue_pending_invoice_expires_and_frees_its_seats() {
        use crate::models::Invoice;

        let store = Arc::new(MemoryStore::new());
        let mut showtime = ended_showtime();
        showtime.start_time = Utc::now() + ChronoDuration::hours(2);
        showtime.end_time = Utc::now() + ChronoDuration::hours(4);
        let showtime_id = showtime.id;
        store.insert_showtime(showtime);

        let seat = ShowtimeSeat {
            id: Uuid::new_v4(),
            showtime_id,
            seat_label: "E1".into(),
            seat_factor: Decimal::ONE,
            status: SeatStatus::Free,
            hold_expires_at: None,
            hold_session: None,
        };
        let seat_id = seat.id;
        store.insert_seat(seat);

        let session = Uuid::new_v4();
        let now = Utc::now();
        store
            .hold_seats(&[seat_id], session, now + ChronoDuration::seconds(900), now)
            .await
            .unwrap();

        let invoice_id = Uuid::new_v4();
        let invoice = Invoice {
            id: invoice_id,
            customer_id: Uuid::new_v4(),
            order_code: crate::models::invoice::order_code_for(invoice_id),
            seat_ids: vec![seat_id],
            combo_lines: vec![],
            voucher_ids: vec![],
            total: Decimal::from(60_000),
            status: InvoiceStatus::Pending,
            hold_session: session,
            payment_due_at: now - ChronoDuration::seconds(1),
            payment_session_id: None,
            created_at: now - ChronoDuration::seconds(901),
        };
        store.insert_invoice(&invoice).await.unwrap();

        let sweeper = Sweeper::new(store.clone(), Duration::from_secs(60));
        let report = sweeper.sweep_once(Utc::now()).await;
        assert_eq!(report.invoices_expired, 1);

        let invoice = store.invoice(invoice_id).await.unwrap().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Expired);
        let seat = store.seats(&[seat_id]).await.unwrap();
        assert_eq!(seat[0].status, SeatStatus::Free);
    }
}
