use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::models::{
    seat_price, ComboItem, Invoice, InvoiceStatus, ReconciliationFlag, RefundRequest,
    RefundStatus, SeatStatus, Showtime, ShowtimeSeat, Ticket, TicketStatus, Voucher,
};
use crate::store::{FinalizeOutcome, InventoryStore, StoreError};

#[derive(Default)]
struct Inner {
    showtimes: HashMap<Uuid, Showtime>,
    seats: HashMap<Uuid, ShowtimeSeat>,
    combo_items: HashMap<Uuid, ComboItem>,
    vouchers: HashMap<Uuid, Voucher>,
    invoices: HashMap<Uuid, Invoice>,
    order_codes: HashMap<i64, Uuid>,
    tickets: HashMap<Uuid, Ticket>,
    refunds: HashMap<Uuid, RefundRequest>,
    flags: Vec<ReconciliationFlag>,
}

/// In-memory `InventoryStore` used by tests and DATABASE_URL-less local
/// runs. A single mutex stands in for the database's transaction isolation;
/// no lock is ever held across an await point.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_showtime(&self, showtime: Showtime) {
        self.inner.lock().showtimes.insert(showtime.id, showtime);
    }

    pub fn insert_seat(&self, seat: ShowtimeSeat) {
        self.inner.lock().seats.insert(seat.id, seat);
    }

    pub fn insert_combo_item(&self, item: ComboItem) {
        self.inner.lock().combo_items.insert(item.id, item);
    }

    pub fn insert_voucher(&self, voucher: Voucher) {
        self.inner.lock().vouchers.insert(voucher.id, voucher);
    }

    /// Test helper: a ticket outside the paid-invoice flow.
    pub fn insert_ticket(&self, ticket: Ticket) {
        self.inner.lock().tickets.insert(ticket.id, ticket);
    }
}

impl Inner {
    fn release(&mut self, seat_ids: &[Uuid], session: Option<Uuid>) {
        for id in seat_ids {
            if let Some(seat) = self.seats.get_mut(id) {
                let owned = session.is_none() || seat.hold_session == session;
                if seat.status == SeatStatus::Held && owned {
                    seat.status = SeatStatus::Free;
                    seat.hold_expires_at = None;
                    seat.hold_session = None;
                }
            }
        }
    }
}

#[async_trait]
impl InventoryStore for MemoryStore {
    async fn showtime(&self, id: Uuid) -> Result<Option<Showtime>, StoreError> {
        Ok(self.inner.lock().showtimes.get(&id).cloned())
    }

    async fn seats(&self, seat_ids: &[Uuid]) -> Result<Vec<ShowtimeSeat>, StoreError> {
        let inner = self.inner.lock();
        seat_ids
            .iter()
            .map(|id| {
                inner
                    .seats
                    .get(id)
                    .cloned()
                    .ok_or_else(|| StoreError::NotFound(format!("seat {id}")))
            })
            .collect()
    }

    async fn combo_item(&self, id: Uuid) -> Result<Option<ComboItem>, StoreError> {
        Ok(self.inner.lock().combo_items.get(&id).cloned())
    }

    async fn voucher_by_code(&self, code: &str) -> Result<Option<Voucher>, StoreError> {
        Ok(self
            .inner
            .lock()
            .vouchers
            .values()
            .find(|v| v.code == code)
            .cloned())
    }

    async fn hold_seats(
        &self,
        seat_ids: &[Uuid],
        session: Uuid,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();

        let mut conflicts = Vec::new();
        for id in seat_ids {
            match inner.seats.get(id) {
                None => return Err(StoreError::NotFound(format!("seat {id}"))),
                Some(seat) if !seat.claimable_at(now) && !seat.held_by_at(session, now) => {
                    conflicts.push(*id)
                }
                Some(_) => {}
            }
        }
        if !conflicts.is_empty() {
            return Err(StoreError::SeatConflict(conflicts));
        }

        for id in seat_ids {
            let seat = inner.seats.get_mut(id).unwrap();
            seat.status = SeatStatus::Held;
            seat.hold_expires_at = Some(expires_at);
            seat.hold_session = Some(session);
        }
        Ok(())
    }

    async fn release_seats(
        &self,
        seat_ids: &[Uuid],
        session: Option<Uuid>,
    ) -> Result<(), StoreError> {
        self.inner.lock().release(seat_ids, session);
        Ok(())
    }

    async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let now = Utc::now();

        let conflicts: Vec<Uuid> = invoice
            .seat_ids
            .iter()
            .filter(|id| {
                inner
                    .seats
                    .get(id)
                    .map(|s| !s.held_by_at(invoice.hold_session, now))
                    .unwrap_or(true)
            })
            .copied()
            .collect();
        if !conflicts.is_empty() {
            return Err(StoreError::SeatConflict(conflicts));
        }

        for id in &invoice.seat_ids {
            let seat = inner.seats.get_mut(id).unwrap();
            seat.hold_expires_at = Some(invoice.payment_due_at);
        }
        inner.order_codes.insert(invoice.order_code, invoice.id);
        inner.invoices.insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn set_invoice_session(
        &self,
        invoice_id: Uuid,
        session_id: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let invoice = inner
            .invoices
            .get_mut(&invoice_id)
            .ok_or_else(|| StoreError::NotFound(format!("invoice {invoice_id}")))?;
        invoice.payment_session_id = Some(session_id.to_string());
        Ok(())
    }

    async fn delete_invoice(&self, invoice_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if let Some(invoice) = inner.invoices.remove(&invoice_id) {
            inner.order_codes.remove(&invoice.order_code);
            let session = invoice.hold_session;
            inner.release(&invoice.seat_ids, Some(session));
        }
        Ok(())
    }

    async fn invoice(&self, id: Uuid) -> Result<Option<Invoice>, StoreError> {
        Ok(self.inner.lock().invoices.get(&id).cloned())
    }

    async fn invoice_by_order_code(&self, order_code: i64) -> Result<Option<Invoice>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .order_codes
            .get(&order_code)
            .and_then(|id| inner.invoices.get(id))
            .cloned())
    }

    async fn finalize_paid_invoice(&self, invoice_id: Uuid) -> Result<FinalizeOutcome, StoreError> {
        let mut inner = self.inner.lock();

        let invoice = match inner.invoices.get(&invoice_id) {
            None => return Err(StoreError::NotFound(format!("invoice {invoice_id}"))),
            Some(i) => i.clone(),
        };
        if invoice.status != InvoiceStatus::Pending {
            return Ok(FinalizeOutcome::NotPending(invoice.status));
        }

        // A lapsed hold that nobody reclaimed is still ours to finish; a
        // reclaimed or resold seat is not.
        let lost: Vec<Uuid> = invoice
            .seat_ids
            .iter()
            .filter(|id| {
                inner
                    .seats
                    .get(id)
                    .map(|s| {
                        s.status != SeatStatus::Held || s.hold_session != Some(invoice.hold_session)
                    })
                    .unwrap_or(true)
            })
            .copied()
            .collect();
        if !lost.is_empty() {
            return Ok(FinalizeOutcome::SeatsLost(lost));
        }

        let mut tickets = Vec::with_capacity(invoice.seat_ids.len());
        for id in &invoice.seat_ids {
            let seat = inner.seats.get_mut(id).unwrap();
            seat.status = SeatStatus::Sold;
            seat.hold_expires_at = None;
            seat.hold_session = None;

            let seat = inner.seats.get(id).unwrap().clone();
            let showtime = inner
                .showtimes
                .get(&seat.showtime_id)
                .ok_or_else(|| StoreError::NotFound(format!("showtime {}", seat.showtime_id)))?;
            tickets.push(Ticket {
                id: Uuid::new_v4(),
                invoice_id,
                showtime_seat_id: *id,
                customer_id: invoice.customer_id,
                price: seat_price(showtime, &seat),
                status: TicketStatus::Unused,
            });
        }
        for ticket in &tickets {
            inner.tickets.insert(ticket.id, ticket.clone());
        }

        for voucher_id in &invoice.voucher_ids {
            if let Some(voucher) = inner.vouchers.get_mut(voucher_id) {
                voucher.usage_count += 1;
            }
        }
        for line in &invoice.combo_lines {
            if let Some(item) = inner.combo_items.get_mut(&line.combo_item_id) {
                item.stock = item.stock.map(|s| (s - line.quantity).max(0));
            }
        }

        inner.invoices.get_mut(&invoice_id).unwrap().status = InvoiceStatus::Paid;
        Ok(FinalizeOutcome::Finalized(tickets))
    }

    async fn cancel_invoice(&self, invoice_id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let invoice = match inner.invoices.get_mut(&invoice_id) {
            None => return Err(StoreError::NotFound(format!("invoice {invoice_id}"))),
            Some(i) => i,
        };
        if invoice.status != InvoiceStatus::Pending {
            return Ok(false);
        }
        invoice.status = InvoiceStatus::Cancelled;
        let seat_ids = invoice.seat_ids.clone();
        let session = invoice.hold_session;
        inner.release(&seat_ids, Some(session));
        Ok(true)
    }

    async fn expire_invoice(&self, invoice_id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let invoice = match inner.invoices.get_mut(&invoice_id) {
            None => return Err(StoreError::NotFound(format!("invoice {invoice_id}"))),
            Some(i) => i,
        };
        if invoice.status != InvoiceStatus::Pending {
            return Ok(false);
        }
        invoice.status = InvoiceStatus::Expired;
        let seat_ids = invoice.seat_ids.clone();
        let session = invoice.hold_session;
        inner.release(&seat_ids, Some(session));
        Ok(true)
    }

    async fn pending_invoices_due_before(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        Ok(self
            .inner
            .lock()
            .invoices
            .values()
            .filter(|i| i.status == InvoiceStatus::Pending && i.payment_due_at < now)
            .map(|i| i.id)
            .collect())
    }

    async fn add_reconciliation_flag(
        &self,
        invoice_id: Uuid,
        note: &str,
    ) -> Result<(), StoreError> {
        self.inner.lock().flags.push(ReconciliationFlag {
            id: Uuid::new_v4(),
            invoice_id,
            note: note.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn reconciliation_flags(&self) -> Result<Vec<ReconciliationFlag>, StoreError> {
        Ok(self.inner.lock().flags.clone())
    }

    async fn ticket(&self, id: Uuid) -> Result<Option<Ticket>, StoreError> {
        Ok(self.inner.lock().tickets.get(&id).cloned())
    }

    async fn tickets_for_invoice(&self, invoice_id: Uuid) -> Result<Vec<Ticket>, StoreError> {
        Ok(self
            .inner
            .lock()
            .tickets
            .values()
            .filter(|t| t.invoice_id == invoice_id)
            .cloned()
            .collect())
    }

    async fn showtimes_with_stale_tickets(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let inner = self.inner.lock();
        let mut showtimes = BTreeSet::new();
        for ticket in inner.tickets.values() {
            if ticket.status != TicketStatus::Unused {
                continue;
            }
            let showtime_id = match inner.seats.get(&ticket.showtime_seat_id) {
                Some(seat) => seat.showtime_id,
                None => continue,
            };
            if let Some(showtime) = inner.showtimes.get(&showtime_id) {
                if showtime.end_time < now {
                    showtimes.insert(showtime_id);
                }
            }
        }
        Ok(showtimes.into_iter().collect())
    }

    async fn expire_unused_tickets(
        &self,
        showtime_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();
        let ended = inner
            .showtimes
            .get(&showtime_id)
            .map(|s| s.end_time < now)
            .unwrap_or(false);
        if !ended {
            return Ok(0);
        }

        let seat_ids: Vec<Uuid> = inner
            .seats
            .values()
            .filter(|s| s.showtime_id == showtime_id)
            .map(|s| s.id)
            .collect();
        let mut flipped = 0;
        for ticket in inner.tickets.values_mut() {
            if ticket.status == TicketStatus::Unused && seat_ids.contains(&ticket.showtime_seat_id)
            {
                ticket.status = TicketStatus::Expired;
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    async fn insert_refund_request(&self, request: &RefundRequest) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let duplicate = inner
            .refunds
            .values()
            .any(|r| r.ticket_id == request.ticket_id && r.status.is_active());
        if duplicate {
            return Err(StoreError::DuplicateRefund(request.ticket_id));
        }
        inner.refunds.insert(request.id, request.clone());
        Ok(())
    }

    async fn refund_request(&self, id: Uuid) -> Result<Option<RefundRequest>, StoreError> {
        Ok(self.inner.lock().refunds.get(&id).cloned())
    }

    async fn list_refund_requests(
        &self,
        status: Option<RefundStatus>,
    ) -> Result<Vec<RefundRequest>, StoreError> {
        let mut requests: Vec<RefundRequest> = self
            .inner
            .lock()
            .refunds
            .values()
            .filter(|r| status.map(|s| r.status == s).unwrap_or(true))
            .cloned()
            .collect();
        requests.sort_by_key(|r| r.created_at);
        Ok(requests)
    }

    async fn update_refund_status(
        &self,
        id: Uuid,
        from: RefundStatus,
        to: RefundStatus,
        note: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let request = inner
            .refunds
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("refund request {id}")))?;
        if request.status != from {
            return Ok(false);
        }
        request.status = to;
        if let Some(note) = note {
            request.staff_note = Some(note.to_string());
        }
        request.updated_at = Utc::now();
        Ok(true)
    }

    async fn complete_refund(&self, id: Uuid, payout_reference: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();

        let (ticket_id, seat_id) = {
            let request = inner
                .refunds
                .get(&id)
                .ok_or_else(|| StoreError::NotFound(format!("refund request {id}")))?;
            if request.status != RefundStatus::Approved {
                return Ok(false);
            }
            let ticket = inner
                .tickets
                .get(&request.ticket_id)
                .ok_or_else(|| StoreError::NotFound(format!("ticket {}", request.ticket_id)))?;
            (ticket.id, ticket.showtime_seat_id)
        };

        let request = inner.refunds.get_mut(&id).unwrap();
        request.status = RefundStatus::Completed;
        request.payout_reference = Some(payout_reference.to_string());
        request.updated_at = Utc::now();

        inner.tickets.get_mut(&ticket_id).unwrap().status = TicketStatus::Refunded;

        if let Some(seat) = inner.seats.get_mut(&seat_id) {
            if seat.status == SeatStatus::Sold {
                seat.status = SeatStatus::Free;
                seat.hold_expires_at = None;
                seat.hold_session = None;
            }
        }
        Ok(true)
    }
}
