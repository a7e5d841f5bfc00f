use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::{
    seat_price, BankAccount, ComboItem, ComboLine, Invoice, InvoiceStatus, ReconciliationFlag,
    RefundRequest, RefundStatus, SeatStatus, Showtime, ShowtimeSeat, Ticket, TicketStatus, Voucher,
};
use crate::store::{FinalizeOutcome, InventoryStore, StoreError};

/// Constraint backing the one-active-refund-per-ticket rule (partial unique
/// index in the migrations).
const ONE_ACTIVE_REFUND: &str = "refund_requests_one_active";

/// Durable `InventoryStore` on Postgres. Batch transitions take row locks
/// with `SELECT … FOR UPDATE` and gate every status flip on the value read
/// inside the same transaction.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!()
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(sqlx::Error::Migrate(Box::new(e))))
    }

    async fn lock_seats(
        tx: &mut Transaction<'_, Postgres>,
        seat_ids: &[Uuid],
    ) -> Result<Vec<ShowtimeSeat>, StoreError> {
        let rows: Vec<ShowtimeSeat> = sqlx::query_as(
            "SELECT id, showtime_id, seat_label, seat_factor, status, hold_expires_at, hold_session
             FROM showtime_seats WHERE id = ANY($1) ORDER BY id FOR UPDATE",
        )
        .bind(seat_ids)
        .fetch_all(&mut **tx)
        .await?;

        if rows.len() != seat_ids.len() {
            let missing = seat_ids
                .iter()
                .find(|id| !rows.iter().any(|r| r.id == **id))
                .copied()
                .unwrap_or_default();
            return Err(StoreError::NotFound(format!("seat {missing}")));
        }
        Ok(rows)
    }

    async fn release_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        seat_ids: &[Uuid],
        session: Option<Uuid>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE showtime_seats
             SET status = 'free', hold_expires_at = NULL, hold_session = NULL
             WHERE id = ANY($1) AND status = 'held'
               AND ($2::uuid IS NULL OR hold_session = $2)",
        )
        .bind(seat_ids)
        .bind(session)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn fetch_invoice(&self, id: Uuid) -> Result<Option<Invoice>, StoreError> {
        let row: Option<InvoiceRow> = sqlx::query_as(
            "SELECT id, customer_id, order_code, total, status, hold_session,
                    payment_due_at, payment_session_id, created_at
             FROM invoices WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            None => Ok(None),
            Some(row) => Ok(Some(self.assemble_invoice(row).await?)),
        }
    }

    async fn assemble_invoice(&self, row: InvoiceRow) -> Result<Invoice, StoreError> {
        let seat_ids: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT seat_id FROM invoice_seats WHERE invoice_id = $1 ORDER BY position",
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await?;

        let combo_lines: Vec<ComboLineRow> = sqlx::query_as(
            "SELECT combo_item_id, quantity, unit_price
             FROM invoice_combos WHERE invoice_id = $1",
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await?;

        let voucher_ids: Vec<(Uuid,)> =
            sqlx::query_as("SELECT voucher_id FROM invoice_vouchers WHERE invoice_id = $1")
                .bind(row.id)
                .fetch_all(&self.pool)
                .await?;

        Ok(Invoice {
            id: row.id,
            customer_id: row.customer_id,
            order_code: row.order_code,
            seat_ids: seat_ids.into_iter().map(|(id,)| id).collect(),
            combo_lines: combo_lines
                .into_iter()
                .map(|l| ComboLine {
                    combo_item_id: l.combo_item_id,
                    quantity: l.quantity,
                    unit_price: l.unit_price,
                })
                .collect(),
            voucher_ids: voucher_ids.into_iter().map(|(id,)| id).collect(),
            total: row.total,
            status: row.status,
            hold_session: row.hold_session,
            payment_due_at: row.payment_due_at,
            payment_session_id: row.payment_session_id,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct InvoiceRow {
    id: Uuid,
    customer_id: Uuid,
    order_code: i64,
    total: Decimal,
    status: InvoiceStatus,
    hold_session: Uuid,
    payment_due_at: DateTime<Utc>,
    payment_session_id: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ComboLineRow {
    combo_item_id: Uuid,
    quantity: i32,
    unit_price: Decimal,
}

#[derive(sqlx::FromRow)]
struct RefundRow {
    id: Uuid,
    ticket_id: Uuid,
    customer_id: Uuid,
    reason: String,
    holder_name: String,
    account_number: String,
    bank_name: String,
    status: RefundStatus,
    amount: Decimal,
    payout_reference: Option<String>,
    staff_note: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RefundRow> for RefundRequest {
    fn from(r: RefundRow) -> Self {
        RefundRequest {
            id: r.id,
            ticket_id: r.ticket_id,
            customer_id: r.customer_id,
            reason: r.reason,
            bank_account: BankAccount {
                holder_name: r.holder_name,
                account_number: r.account_number,
                bank_name: r.bank_name,
            },
            status: r.status,
            amount: r.amount,
            payout_reference: r.payout_reference,
            staff_note: r.staff_note,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[async_trait]
impl InventoryStore for PostgresStore {
    async fn showtime(&self, id: Uuid) -> Result<Option<Showtime>, StoreError> {
        let row = sqlx::query_as::<_, Showtime>(
            "SELECT id, film_title, room, start_time, end_time, base_price,
                    format_factor, language_factor
             FROM showtimes WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn seats(&self, seat_ids: &[Uuid]) -> Result<Vec<ShowtimeSeat>, StoreError> {
        let rows: Vec<ShowtimeSeat> = sqlx::query_as(
            "SELECT id, showtime_id, seat_label, seat_factor, status, hold_expires_at, hold_session
             FROM showtime_seats WHERE id = ANY($1)",
        )
        .bind(seat_ids)
        .fetch_all(&self.pool)
        .await?;

        seat_ids
            .iter()
            .map(|id| {
                rows.iter()
                    .find(|r| r.id == *id)
                    .cloned()
                    .ok_or_else(|| StoreError::NotFound(format!("seat {id}")))
            })
            .collect()
    }

    async fn combo_item(&self, id: Uuid) -> Result<Option<ComboItem>, StoreError> {
        let row = sqlx::query_as::<_, ComboItem>(
            "SELECT id, name, price, stock FROM combo_items WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn voucher_by_code(&self, code: &str) -> Result<Option<Voucher>, StoreError> {
        let row = sqlx::query_as::<_, Voucher>(
            "SELECT id, code, target, percent_off, max_discount, min_subtotal,
                    valid_from, valid_until, usage_cap, usage_count, active
             FROM vouchers WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn hold_seats(
        &self,
        seat_ids: &[Uuid],
        session: Uuid,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let rows = Self::lock_seats(&mut tx, seat_ids).await?;

        let conflicts: Vec<Uuid> = rows
            .iter()
            .filter(|s| !s.claimable_at(now) && !s.held_by_at(session, now))
            .map(|s| s.id)
            .collect();
        if !conflicts.is_empty() {
            // Dropping the transaction rolls the locks back.
            return Err(StoreError::SeatConflict(conflicts));
        }

        sqlx::query(
            "UPDATE showtime_seats
             SET status = 'held', hold_expires_at = $2, hold_session = $3
             WHERE id = ANY($1)",
        )
        .bind(seat_ids)
        .bind(expires_at)
        .bind(session)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn release_seats(
        &self,
        seat_ids: &[Uuid],
        session: Option<Uuid>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::release_in_tx(&mut tx, seat_ids, session).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let rows = Self::lock_seats(&mut tx, &invoice.seat_ids).await?;
        let now = Utc::now();

        let conflicts: Vec<Uuid> = rows
            .iter()
            .filter(|s| !s.held_by_at(invoice.hold_session, now))
            .map(|s| s.id)
            .collect();
        if !conflicts.is_empty() {
            return Err(StoreError::SeatConflict(conflicts));
        }

        sqlx::query("UPDATE showtime_seats SET hold_expires_at = $2 WHERE id = ANY($1)")
            .bind(&invoice.seat_ids)
            .bind(invoice.payment_due_at)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO invoices
                 (id, customer_id, order_code, total, status, hold_session,
                  payment_due_at, payment_session_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(invoice.id)
        .bind(invoice.customer_id)
        .bind(invoice.order_code)
        .bind(invoice.total)
        .bind(invoice.status)
        .bind(invoice.hold_session)
        .bind(invoice.payment_due_at)
        .bind(&invoice.payment_session_id)
        .bind(invoice.created_at)
        .execute(&mut *tx)
        .await?;

        for (position, seat_id) in invoice.seat_ids.iter().enumerate() {
            sqlx::query(
                "INSERT INTO invoice_seats (invoice_id, seat_id, position) VALUES ($1, $2, $3)",
            )
            .bind(invoice.id)
            .bind(seat_id)
            .bind(position as i32)
            .execute(&mut *tx)
            .await?;
        }
        for line in &invoice.combo_lines {
            sqlx::query(
                "INSERT INTO invoice_combos (invoice_id, combo_item_id, quantity, unit_price)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(invoice.id)
            .bind(line.combo_item_id)
            .bind(line.quantity)
            .bind(line.unit_price)
            .execute(&mut *tx)
            .await?;
        }
        for voucher_id in &invoice.voucher_ids {
            sqlx::query("INSERT INTO invoice_vouchers (invoice_id, voucher_id) VALUES ($1, $2)")
                .bind(invoice.id)
                .bind(voucher_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn set_invoice_session(
        &self,
        invoice_id: Uuid,
        session_id: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE invoices SET payment_session_id = $2 WHERE id = $1")
            .bind(invoice_id)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("invoice {invoice_id}")));
        }
        Ok(())
    }

    async fn delete_invoice(&self, invoice_id: Uuid) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT hold_session FROM invoices WHERE id = $1 FOR UPDATE")
                .bind(invoice_id)
                .fetch_optional(&mut *tx)
                .await?;
        let session = match row {
            None => return Ok(()),
            Some((session,)) => session,
        };

        let seat_ids: Vec<(Uuid,)> =
            sqlx::query_as("SELECT seat_id FROM invoice_seats WHERE invoice_id = $1")
                .bind(invoice_id)
                .fetch_all(&mut *tx)
                .await?;
        let seat_ids: Vec<Uuid> = seat_ids.into_iter().map(|(id,)| id).collect();
        Self::release_in_tx(&mut tx, &seat_ids, Some(session)).await?;

        sqlx::query("DELETE FROM invoices WHERE id = $1")
            .bind(invoice_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn invoice(&self, id: Uuid) -> Result<Option<Invoice>, StoreError> {
        self.fetch_invoice(id).await
    }

    async fn invoice_by_order_code(&self, order_code: i64) -> Result<Option<Invoice>, StoreError> {
        let id: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM invoices WHERE order_code = $1")
            .bind(order_code)
            .fetch_optional(&self.pool)
            .await?;
        match id {
            None => Ok(None),
            Some((id,)) => self.fetch_invoice(id).await,
        }
    }

    async fn finalize_paid_invoice(&self, invoice_id: Uuid) -> Result<FinalizeOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(InvoiceStatus, Uuid, Uuid)> = sqlx::query_as(
            "SELECT status, hold_session, customer_id FROM invoices WHERE id = $1 FOR UPDATE",
        )
        .bind(invoice_id)
        .fetch_optional(&mut *tx)
        .await?;
        let (status, hold_session, customer_id) = match row {
            None => return Err(StoreError::NotFound(format!("invoice {invoice_id}"))),
            Some(r) => r,
        };
        if status != InvoiceStatus::Pending {
            return Ok(FinalizeOutcome::NotPending(status));
        }

        let seat_ids: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT seat_id FROM invoice_seats WHERE invoice_id = $1 ORDER BY position",
        )
        .bind(invoice_id)
        .fetch_all(&mut *tx)
        .await?;
        let seat_ids: Vec<Uuid> = seat_ids.into_iter().map(|(id,)| id).collect();
        let seats = Self::lock_seats(&mut tx, &seat_ids).await?;

        let lost: Vec<Uuid> = seats
            .iter()
            .filter(|s| s.status != SeatStatus::Held || s.hold_session != Some(hold_session))
            .map(|s| s.id)
            .collect();
        if !lost.is_empty() {
            return Ok(FinalizeOutcome::SeatsLost(lost));
        }

        sqlx::query(
            "UPDATE showtime_seats
             SET status = 'sold', hold_expires_at = NULL, hold_session = NULL
             WHERE id = ANY($1)",
        )
        .bind(&seat_ids)
        .execute(&mut *tx)
        .await?;

        let mut tickets = Vec::with_capacity(seats.len());
        let mut showtimes: HashMap<Uuid, Showtime> = HashMap::new();
        for seat in &seats {
            if !showtimes.contains_key(&seat.showtime_id) {
                let row: Showtime = sqlx::query_as(
                    "SELECT id, film_title, room, start_time, end_time, base_price,
                            format_factor, language_factor
                     FROM showtimes WHERE id = $1",
                )
                .bind(seat.showtime_id)
                .fetch_one(&mut *tx)
                .await?;
                showtimes.insert(seat.showtime_id, row);
            }
            let showtime = &showtimes[&seat.showtime_id];

            let ticket = Ticket {
                id: Uuid::new_v4(),
                invoice_id,
                showtime_seat_id: seat.id,
                customer_id,
                price: seat_price(showtime, seat),
                status: TicketStatus::Unused,
            };
            sqlx::query(
                "INSERT INTO tickets (id, invoice_id, showtime_seat_id, customer_id, price, status)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(ticket.id)
            .bind(ticket.invoice_id)
            .bind(ticket.showtime_seat_id)
            .bind(ticket.customer_id)
            .bind(ticket.price)
            .bind(ticket.status)
            .execute(&mut *tx)
            .await?;
            tickets.push(ticket);
        }

        sqlx::query(
            "UPDATE vouchers SET usage_count = usage_count + 1
             WHERE id IN (SELECT voucher_id FROM invoice_vouchers WHERE invoice_id = $1)",
        )
        .bind(invoice_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE combo_items c
             SET stock = GREATEST(c.stock - l.quantity, 0)
             FROM invoice_combos l
             WHERE l.invoice_id = $1 AND l.combo_item_id = c.id AND c.stock IS NOT NULL",
        )
        .bind(invoice_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE invoices SET status = 'paid' WHERE id = $1")
            .bind(invoice_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(FinalizeOutcome::Finalized(tickets))
    }

    async fn cancel_invoice(&self, invoice_id: Uuid) -> Result<bool, StoreError> {
        self.close_pending(invoice_id, InvoiceStatus::Cancelled).await
    }

    async fn expire_invoice(&self, invoice_id: Uuid) -> Result<bool, StoreError> {
        self.close_pending(invoice_id, InvoiceStatus::Expired).await
    }

    async fn pending_invoices_due_before(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM invoices WHERE status = 'pending' AND payment_due_at < $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn add_reconciliation_flag(
        &self,
        invoice_id: Uuid,
        note: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO reconciliation_flags (id, invoice_id, note, created_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::new_v4())
        .bind(invoice_id)
        .bind(note)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reconciliation_flags(&self) -> Result<Vec<ReconciliationFlag>, StoreError> {
        let rows = sqlx::query_as::<_, ReconciliationFlag>(
            "SELECT id, invoice_id, note, created_at
             FROM reconciliation_flags ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn ticket(&self, id: Uuid) -> Result<Option<Ticket>, StoreError> {
        let row = sqlx::query_as::<_, Ticket>(
            "SELECT id, invoice_id, showtime_seat_id, customer_id, price, status
             FROM tickets WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn tickets_for_invoice(&self, invoice_id: Uuid) -> Result<Vec<Ticket>, StoreError> {
        let rows = sqlx::query_as::<_, Ticket>(
            "SELECT id, invoice_id, showtime_seat_id, customer_id, price, status
             FROM tickets WHERE invoice_id = $1",
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn showtimes_with_stale_tickets(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT DISTINCT s.showtime_id
             FROM tickets t
             JOIN showtime_seats s ON s.id = t.showtime_seat_id
             JOIN showtimes st ON st.id = s.showtime_id
             WHERE t.status = 'unused' AND st.end_time < $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn expire_unused_tickets(
        &self,
        showtime_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE tickets SET status = 'expired'
             WHERE status = 'unused'
               AND showtime_seat_id IN
                   (SELECT id FROM showtime_seats WHERE showtime_id = $1)
               AND (SELECT end_time FROM showtimes WHERE id = $1) < $2",
        )
        .bind(showtime_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_refund_request(&self, request: &RefundRequest) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO refund_requests
                 (id, ticket_id, customer_id, reason, holder_name, account_number, bank_name,
                  status, amount, payout_reference, staff_note, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(request.id)
        .bind(request.ticket_id)
        .bind(request.customer_id)
        .bind(&request.reason)
        .bind(&request.bank_account.holder_name)
        .bind(&request.bank_account.account_number)
        .bind(&request.bank_account.bank_name)
        .bind(request.status)
        .bind(request.amount)
        .bind(&request.payout_reference)
        .bind(&request.staff_note)
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.constraint() == Some(ONE_ACTIVE_REFUND) => {
                Err(StoreError::DuplicateRefund(request.ticket_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn refund_request(&self, id: Uuid) -> Result<Option<RefundRequest>, StoreError> {
        let row: Option<RefundRow> =
            sqlx::query_as("SELECT * FROM refund_requests WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Into::into))
    }

    async fn list_refund_requests(
        &self,
        status: Option<RefundStatus>,
    ) -> Result<Vec<RefundRequest>, StoreError> {
        let rows: Vec<RefundRow> = sqlx::query_as(
            "SELECT * FROM refund_requests
             WHERE $1::refund_status IS NULL OR status = $1
             ORDER BY created_at",
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update_refund_status(
        &self,
        id: Uuid,
        from: RefundStatus,
        to: RefundStatus,
        note: Option<&str>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE refund_requests
             SET status = $3, staff_note = COALESCE($4, staff_note), updated_at = $5
             WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(note)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        // Distinguish "wrong state" from "no such request".
        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM refund_requests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(StoreError::NotFound(format!("refund request {id}")));
        }
        Ok(false)
    }

    async fn complete_refund(&self, id: Uuid, payout_reference: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(RefundStatus, Uuid)> = sqlx::query_as(
            "SELECT status, ticket_id FROM refund_requests WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let (status, ticket_id) = match row {
            None => return Err(StoreError::NotFound(format!("refund request {id}"))),
            Some(r) => r,
        };
        if status != RefundStatus::Approved {
            return Ok(false);
        }

        sqlx::query(
            "UPDATE refund_requests
             SET status = 'completed', payout_reference = $2, updated_at = $3
             WHERE id = $1",
        )
        .bind(id)
        .bind(payout_reference)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE tickets SET status = 'refunded' WHERE id = $1")
            .bind(ticket_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE showtime_seats
             SET status = 'free', hold_expires_at = NULL, hold_session = NULL
             WHERE id = (SELECT showtime_seat_id FROM tickets WHERE id = $1)
               AND status = 'sold'",
        )
        .bind(ticket_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }
}

impl PostgresStore {
    async fn close_pending(
        &self,
        invoice_id: Uuid,
        to: InvoiceStatus,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(InvoiceStatus, Uuid)> =
            sqlx::query_as("SELECT status, hold_session FROM invoices WHERE id = $1 FOR UPDATE")
                .bind(invoice_id)
                .fetch_optional(&mut *tx)
                .await?;
        let (status, session) = match row {
            None => return Err(StoreError::NotFound(format!("invoice {invoice_id}"))),
            Some(r) => r,
        };
        if status != InvoiceStatus::Pending {
            return Ok(false);
        }

        sqlx::query("UPDATE invoices SET status = $2 WHERE id = $1")
            .bind(invoice_id)
            .bind(to)
            .execute(&mut *tx)
            .await?;

        let seat_ids: Vec<(Uuid,)> =
            sqlx::query_as("SELECT seat_id FROM invoice_seats WHERE invoice_id = $1")
                .bind(invoice_id)
                .fetch_all(&mut *tx)
                .await?;
        let seat_ids: Vec<Uuid> = seat_ids.into_iter().map(|(id,)| id).collect();
        Self::release_in_tx(&mut tx, &seat_ids, Some(session)).await?;

        tx.commit().await?;
        Ok(true)
    }
}
