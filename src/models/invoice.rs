use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "invoice_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComboLine {
    pub combo_item_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub customer_id: Uuid,
    /// Numeric key shared with the payment gateway, derived from `id`.
    pub order_code: i64,
    pub seat_ids: Vec<Uuid>,
    pub combo_lines: Vec<ComboLine>,
    pub voucher_ids: Vec<Uuid>,
    pub total: Decimal,
    pub status: InvoiceStatus,
    /// Checkout session that holds the seats while this invoice is Pending.
    pub hold_session: Uuid,
    /// The payment window. A Pending invoice past this instant is eligible
    /// for expiry and its holds for reclaiming.
    pub payment_due_at: DateTime<Utc>,
    pub payment_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The gateway only accepts positive numeric order codes, so fold the UUID
/// down to 63 bits. Uniqueness is still enforced by the store.
pub fn order_code_for(invoice_id: Uuid) -> i64 {
    let bytes = invoice_id.as_bytes();
    let mut code = i64::from_be_bytes(bytes[..8].try_into().unwrap()) & i64::MAX;
    if code == 0 {
        code = 1;
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_code_is_positive() {
        for _ in 0..64 {
            assert!(order_code_for(Uuid::new_v4()) > 0);
        }
    }

    #[test]
    fn order_code_is_stable_per_invoice() {
        let id = Uuid::new_v4();
        assert_eq!(order_code_for(id), order_code_for(id));
    }
}
