use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    ComboItem, Invoice, InvoiceStatus, ReconciliationFlag, RefundRequest, RefundStatus, Showtime,
    ShowtimeSeat, Ticket, Voucher,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("seats unavailable: {0:?}")]
    SeatConflict(Vec<Uuid>),

    #[error("active refund request already exists for ticket {0}")]
    DuplicateRefund(Uuid),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Result of applying a verified "paid" notification to an invoice.
#[derive(Debug)]
pub enum FinalizeOutcome {
    /// Invoice went Pending→Paid; seats are Sold and these tickets exist.
    Finalized(Vec<Ticket>),
    /// The invoice was not Pending; nothing was changed.
    NotPending(InvoiceStatus),
    /// The invoice was Pending but its holds had been reclaimed by another
    /// session. Nothing was changed; the named seats are lost to this order.
    SeatsLost(Vec<Uuid>),
}

/// Transactional datastore contract for the booking core.
///
/// Every method that touches more than one row is all-or-nothing, and every
/// state transition is conditional on the current status read inside the
/// same transaction that writes it.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    // Catalog -------------------------------------------------------------

    async fn showtime(&self, id: Uuid) -> Result<Option<Showtime>, StoreError>;

    /// Seats in input order. Missing ids yield `NotFound`.
    async fn seats(&self, seat_ids: &[Uuid]) -> Result<Vec<ShowtimeSeat>, StoreError>;

    async fn combo_item(&self, id: Uuid) -> Result<Option<ComboItem>, StoreError>;

    async fn voucher_by_code(&self, code: &str) -> Result<Option<Voucher>, StoreError>;

    // Seat holds ----------------------------------------------------------

    /// Batch compare-and-set Free→Held (reclaiming lapsed holds) for
    /// `session`. Seats already held by `session` are re-held with the new
    /// expiry. Fails with `SeatConflict` naming every unavailable seat,
    /// leaving no seat flipped.
    async fn hold_seats(
        &self,
        seat_ids: &[Uuid],
        session: Uuid,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Held→Free for holds owned by `session` (any owner when None).
    /// Idempotent: free or reassigned seats are skipped.
    async fn release_seats(&self, seat_ids: &[Uuid], session: Option<Uuid>)
        -> Result<(), StoreError>;

    // Invoices ------------------------------------------------------------

    /// Persists a Pending invoice and extends its seat holds to
    /// `invoice.payment_due_at`, atomically. Fails with `SeatConflict` if
    /// any seat is no longer held by `invoice.hold_session`.
    async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), StoreError>;

    async fn set_invoice_session(&self, invoice_id: Uuid, session_id: &str)
        -> Result<(), StoreError>;

    /// Rollback path for gateway failures: removes the invoice and releases
    /// its seat holds so inventory is not stranded.
    async fn delete_invoice(&self, invoice_id: Uuid) -> Result<(), StoreError>;

    async fn invoice(&self, id: Uuid) -> Result<Option<Invoice>, StoreError>;

    async fn invoice_by_order_code(&self, order_code: i64) -> Result<Option<Invoice>, StoreError>;

    /// Pending→Paid, seats Held→Sold, one Unused ticket per seat, voucher
    /// usage incremented and tracked combo stock decremented — one
    /// transaction, gated on the invoice still being Pending.
    async fn finalize_paid_invoice(&self, invoice_id: Uuid) -> Result<FinalizeOutcome, StoreError>;

    /// Pending→Cancelled and holds released. Returns false when the invoice
    /// was not Pending (nothing changed).
    async fn cancel_invoice(&self, invoice_id: Uuid) -> Result<bool, StoreError>;

    /// Pending→Expired and holds released. Returns false when not Pending.
    async fn expire_invoice(&self, invoice_id: Uuid) -> Result<bool, StoreError>;

    /// Pending invoices whose payment window lapsed before `now`.
    async fn pending_invoices_due_before(&self, now: DateTime<Utc>)
        -> Result<Vec<Uuid>, StoreError>;

    // Reconciliation audit ------------------------------------------------

    async fn add_reconciliation_flag(&self, invoice_id: Uuid, note: &str)
        -> Result<(), StoreError>;

    async fn reconciliation_flags(&self) -> Result<Vec<ReconciliationFlag>, StoreError>;

    // Tickets -------------------------------------------------------------

    async fn ticket(&self, id: Uuid) -> Result<Option<Ticket>, StoreError>;

    async fn tickets_for_invoice(&self, invoice_id: Uuid) -> Result<Vec<Ticket>, StoreError>;

    /// Showtimes that ended before `now` and still carry Unused tickets.
    async fn showtimes_with_stale_tickets(&self, now: DateTime<Utc>)
        -> Result<Vec<Uuid>, StoreError>;

    /// Unused→Expired for tickets of one ended showtime. Returns the number
    /// of tickets flipped.
    async fn expire_unused_tickets(
        &self,
        showtime_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    // Refunds -------------------------------------------------------------

    /// Fails with `DuplicateRefund` if a Pending/Approved request already
    /// exists for the ticket; the check and insert are atomic.
    async fn insert_refund_request(&self, request: &RefundRequest) -> Result<(), StoreError>;

    async fn refund_request(&self, id: Uuid) -> Result<Option<RefundRequest>, StoreError>;

    async fn list_refund_requests(
        &self,
        status: Option<RefundStatus>,
    ) -> Result<Vec<RefundRequest>, StoreError>;

    /// Conditional `from`→`to`, recording the staff note. Returns false when
    /// the request was not in `from`.
    async fn update_refund_status(
        &self,
        id: Uuid,
        from: RefundStatus,
        to: RefundStatus,
        note: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Approved→Completed with the payout reference, the ticket →Refunded,
    /// and the seat Sold→Free — one transaction. Returns false when the
    /// request was not Approved.
    async fn complete_refund(&self, id: Uuid, payout_reference: &str) -> Result<bool, StoreError>;
}
