use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "seat_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SeatStatus {
    Free,
    Held,
    Sold,
}

/// One physical seat bound to one showtime. The status column is the source
/// of truth for availability; `hold_expires_at` bounds how long a Held seat
/// stays claimed by `hold_session`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ShowtimeSeat {
    pub id: Uuid,
    pub showtime_id: Uuid,
    pub seat_label: String,
    pub seat_factor: Decimal,
    pub status: SeatStatus,
    pub hold_expires_at: Option<DateTime<Utc>>,
    pub hold_session: Option<Uuid>,
}

impl ShowtimeSeat {
    /// A seat can be claimed when Free, or when a previous hold has lapsed.
    pub fn claimable_at(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            SeatStatus::Free => true,
            SeatStatus::Held => self.hold_expires_at.map(|t| t <= now).unwrap_or(false),
            SeatStatus::Sold => false,
        }
    }

    pub fn held_by_at(&self, session: Uuid, now: DateTime<Utc>) -> bool {
        self.status == SeatStatus::Held
            && self.hold_session == Some(session)
            && self.hold_expires_at.map(|t| t > now).unwrap_or(false)
    }
}
