use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Showtime {
    pub id: Uuid,
    pub film_title: String,
    pub room: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub base_price: Decimal,
    pub format_factor: Decimal,
    pub language_factor: Decimal,
}

/// Ticket price for one seat: base price scaled by the showtime's format
/// and language surcharges and the seat-type factor.
pub fn seat_price(showtime: &Showtime, seat: &crate::models::ShowtimeSeat) -> Decimal {
    (showtime.base_price * showtime.format_factor * showtime.language_factor * seat.seat_factor)
        .round_dp(2)
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ComboItem {
    pub id: Uuid,
    pub name: String,
    pub price: Decimal,
    /// None means stock is not tracked for this item.
    pub stock: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "voucher_target", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VoucherTarget {
    TicketDiscount,
    ComboDiscount,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Voucher {
    pub id: Uuid,
    pub code: String,
    pub target: VoucherTarget,
    pub percent_off: Decimal,
    pub max_discount: Decimal,
    pub min_subtotal: Decimal,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub usage_cap: i32,
    pub usage_count: i32,
    pub active: bool,
}

impl Voucher {
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.active
            && self.valid_from <= now
            && now <= self.valid_until
            && self.usage_count < self.usage_cap
    }

    /// Discount for a subtotal, after the percentage and the per-voucher cap.
    pub fn discount_for(&self, subtotal: Decimal) -> Decimal {
        let raw = (subtotal * self.percent_off / Decimal::from(100)).round_dp(2);
        raw.min(self.max_discount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voucher(percent: i64, cap: i64) -> Voucher {
        Voucher {
            id: Uuid::new_v4(),
            code: "WELCOME".into(),
            target: VoucherTarget::TicketDiscount,
            percent_off: Decimal::from(percent),
            max_discount: Decimal::from(cap),
            min_subtotal: Decimal::ZERO,
            valid_from: Utc::now() - chrono::Duration::days(1),
            valid_until: Utc::now() + chrono::Duration::days(1),
            usage_cap: 10,
            usage_count: 0,
            active: true,
        }
    }

    #[test]
    fn seat_price_rounds_midpoints_to_even() {
        let showtime = Showtime {
            id: Uuid::new_v4(),
            film_title: "Le Samourai".into(),
            room: "R1".into(),
            start_time: Utc::now(),
            end_time: Utc::now(),
            base_price: Decimal::new(75_125, 3),
            format_factor: Decimal::ONE,
            language_factor: Decimal::ONE,
        };
        let seat = crate::models::ShowtimeSeat {
            id: Uuid::new_v4(),
            showtime_id: showtime.id,
            seat_label: "A1".into(),
            seat_factor: Decimal::ONE,
            status: crate::models::SeatStatus::Free,
            hold_expires_at: None,
            hold_session: None,
        };
        // 75.125 lands on 75.12, not 75.13.
        assert_eq!(seat_price(&showtime, &seat), Decimal::new(7_512, 2));
    }

    #[test]
    fn discount_is_capped_at_ceiling() {
        let v = voucher(10, 10_000);
        assert_eq!(v.discount_for(Decimal::from(150_000)), Decimal::from(10_000));
    }

    #[test]
    fn discount_below_ceiling_uses_percentage() {
        let v = voucher(10, 10_000);
        assert_eq!(v.discount_for(Decimal::from(50_000)), Decimal::from(5_000));
    }

    #[test]
    fn exhausted_voucher_is_not_usable() {
        let mut v = voucher(10, 10_000);
        v.usage_count = v.usage_cap;
        assert!(!v.is_usable_at(Utc::now()));
    }
}
