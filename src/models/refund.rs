use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "refund_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
}

impl RefundStatus {
    /// Pending and Approved requests block a second request for the same
    /// ticket.
    pub fn is_active(self) -> bool {
        matches!(self, RefundStatus::Pending | RefundStatus::Approved)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankAccount {
    pub holder_name: String,
    pub account_number: String,
    pub bank_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub customer_id: Uuid,
    pub reason: String,
    pub bank_account: BankAccount,
    pub status: RefundStatus,
    pub amount: Decimal,
    pub payout_reference: Option<String>,
    pub staff_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Audit record for webhooks that could not be applied safely, e.g. a "paid"
/// notification arriving after the invoice was already cancelled or expired.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReconciliationFlag {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub note: String,
    pub created_at: DateTime<Utc>,
}
