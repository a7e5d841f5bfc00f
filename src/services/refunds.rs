//! Customer refund requests, staff review, and gateway payout.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::gateway::PaymentGateway;
use crate::models::{BankAccount, RefundRequest, RefundStatus, TicketStatus};
use crate::store::InventoryStore;
use crate::utils::caller::{Caller, Capability};
use crate::utils::error::AppError;

pub struct RefundWorkflow {
    store: Arc<dyn InventoryStore>,
    gateway: Arc<dyn PaymentGateway>,
    /// Minimum notice before showtime start for a refund request.
    refund_window: Duration,
}

impl RefundWorkflow {
    pub fn new(
        store: Arc<dyn InventoryStore>,
        gateway: Arc<dyn PaymentGateway>,
        refund_window: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            refund_window,
        }
    }

    /// Customer-initiated. The ticket must belong to the caller, be Unused,
    /// and its showtime must start later than the refund window from now.
    /// At most one Pending/Approved request may exist per ticket.
    pub async fn request_refund(
        &self,
        caller: &Caller,
        ticket_id: Uuid,
        reason: String,
        bank_account: BankAccount,
    ) -> Result<RefundRequest, AppError> {
        let customer_id = caller.customer()?;
        if reason.trim().is_empty() {
            return Err(AppError::Validation("refund reason is required".to_string()));
        }
        if bank_account.holder_name.trim().is_empty()
            || bank_account.account_number.trim().is_empty()
            || bank_account.bank_name.trim().is_empty()
        {
            return Err(AppError::Validation(
                "complete bank account details are required".to_string(),
            ));
        }

        let ticket = self
            .store
            .ticket(ticket_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("ticket {ticket_id}")))?;
        if ticket.customer_id != customer_id {
            return Err(AppError::Forbidden(
                "ticket belongs to a different customer".to_string(),
            ));
        }
        match ticket.status {
            TicketStatus::Unused => {}
            TicketStatus::CheckedIn => {
                return Err(AppError::conflict("ticket has already been checked in"))
            }
            TicketStatus::Refunded => {
                return Err(AppError::conflict("ticket has already been refunded"))
            }
            TicketStatus::Expired => {
                return Err(AppError::conflict("ticket has expired"))
            }
        }

        let seat = self
            .store
            .seats(&[ticket.showtime_seat_id])
            .await?
            .remove(0);
        let showtime = self
            .store
            .showtime(seat.showtime_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("showtime {}", seat.showtime_id)))?;
        let now = Utc::now();
        if now + self.refund_window > showtime.start_time {
            return Err(AppError::Validation(format!(
                "refunds close {} hours before the showtime",
                self.refund_window.num_hours()
            )));
        }

        let request = RefundRequest {
            id: Uuid::new_v4(),
            ticket_id,
            customer_id,
            reason,
            bank_account,
            status: RefundStatus::Pending,
            amount: ticket.price,
            payout_reference: None,
            staff_note: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_refund_request(&request).await?;

        info!(request_id = %request.id, %ticket_id, amount = %request.amount, "Refund requested");
        Ok(request)
    }

    /// Staff approval authorizes the payout; no money moves and the ticket
    /// is untouched until completion.
    pub async fn approve(
        &self,
        caller: &Caller,
        request_id: Uuid,
        note: Option<String>,
    ) -> Result<RefundRequest, AppError> {
        caller.require(Capability::RefundReview)?;
        let applied = self
            .store
            .update_refund_status(
                request_id,
                RefundStatus::Pending,
                RefundStatus::Approved,
                note.as_deref(),
            )
            .await?;
        if !applied {
            return Err(AppError::conflict("refund request is not pending"));
        }
        info!(%request_id, "Refund request approved");
        self.fetch(request_id).await
    }

    /// Rejection requires a reason and leaves the ticket Unused.
    pub async fn reject(
        &self,
        caller: &Caller,
        request_id: Uuid,
        reason: String,
    ) -> Result<RefundRequest, AppError> {
        caller.require(Capability::RefundReview)?;
        if reason.trim().is_empty() {
            return Err(AppError::Validation("rejection reason is required".to_string()));
        }
        let applied = self
            .store
            .update_refund_status(
                request_id,
                RefundStatus::Pending,
                RefundStatus::Rejected,
                Some(&reason),
            )
            .await?;
        if !applied {
            return Err(AppError::conflict("refund request is not pending"));
        }
        info!(%request_id, "Refund request rejected");
        self.fetch(request_id).await
    }

    /// Moves the money. The payout call is the only blocking external call
    /// in the workflow; on failure or timeout the request stays Approved so
    /// completion can be retried, and the ticket is not marked Refunded.
    pub async fn complete(&self, caller: &Caller, request_id: Uuid) -> Result<RefundRequest, AppError> {
        caller.require(Capability::RefundPayout)?;

        let request = self
            .store
            .refund_request(request_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("refund request {request_id}")))?;
        if request.status != RefundStatus::Approved {
            return Err(AppError::conflict("refund request is not approved"));
        }

        let reference = match self
            .gateway
            .initiate_payout(
                &request.bank_account,
                request.amount,
                &format!("Ticket refund {request_id}"),
            )
            .await
        {
            Ok(reference) => reference,
            Err(e) => {
                warn!(%request_id, error = %e, "Payout failed, request stays approved");
                return Err(e.into());
            }
        };

        let applied = self.store.complete_refund(request_id, &reference).await?;
        if !applied {
            // The payout went out but someone else completed concurrently;
            // the recorded reference on the winning completion stands.
            return Err(AppError::conflict("refund request is no longer approved"));
        }

        info!(%request_id, %reference, "Refund completed");
        self.fetch(request_id).await
    }

    pub async fn list(
        &self,
        caller: &Caller,
        status: Option<RefundStatus>,
    ) -> Result<Vec<RefundRequest>, AppError> {
        caller.require(Capability::RefundReview)?;
        Ok(self.store.list_refund_requests(status).await?)
    }

    async fn fetch(&self, request_id: Uuid) -> Result<RefundRequest, AppError> {
        self.store
            .refund_request(request_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("refund request {request_id}")))
    }
}
