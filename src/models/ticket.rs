use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ticket_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Unused,
    CheckedIn,
    Expired,
    Refunded,
}

/// One ticket per seat within a paid invoice. `price` is the seat's share of
/// the invoice total before discounts, used as the refundable amount.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Ticket {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub showtime_seat_id: Uuid,
    pub customer_id: Uuid,
    pub price: Decimal,
    pub status: TicketStatus,
}
