//! Time-boxed exclusive seat holds for the checkout window.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::store::InventoryStore;
use crate::utils::error::AppError;

#[derive(Debug, Clone, Serialize)]
pub struct HoldResult {
    /// Checkout session owning the hold; checkout presents it to adopt the
    /// held seats.
    pub session: Uuid,
    pub seat_ids: Vec<Uuid>,
    pub expires_at: DateTime<Utc>,
}

pub struct SeatHoldManager {
    store: Arc<dyn InventoryStore>,
    default_duration: Duration,
}

impl SeatHoldManager {
    pub fn new(store: Arc<dyn InventoryStore>, default_duration: Duration) -> Self {
        Self {
            store,
            default_duration,
        }
    }

    /// All-or-nothing batch hold: every seat must be Free or carry a lapsed
    /// hold, and all must belong to `showtime_id`. Conflicts fail the whole
    /// batch immediately, naming the unavailable seats.
    pub async fn hold(
        &self,
        showtime_id: Uuid,
        seat_ids: &[Uuid],
        duration: Option<Duration>,
    ) -> Result<HoldResult, AppError> {
        if seat_ids.is_empty() {
            return Err(AppError::Validation("no seats requested".to_string()));
        }
        let unique: HashSet<Uuid> = seat_ids.iter().copied().collect();
        if unique.len() != seat_ids.len() {
            return Err(AppError::Validation("duplicate seats in request".to_string()));
        }
        let duration = duration.unwrap_or(self.default_duration);
        if duration <= Duration::zero() {
            return Err(AppError::Validation("hold duration must be positive".to_string()));
        }

        let now = Utc::now();
        let showtime = self
            .store
            .showtime(showtime_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("showtime {showtime_id}")))?;
        if showtime.start_time <= now {
            return Err(AppError::Validation(
                "showtime has already started".to_string(),
            ));
        }

        let seats = self.store.seats(seat_ids).await?;
        if let Some(stray) = seats.iter().find(|s| s.showtime_id != showtime_id) {
            return Err(AppError::Validation(format!(
                "seat {} does not belong to showtime {showtime_id}",
                stray.id
            )));
        }

        let session = Uuid::new_v4();
        let expires_at = now + duration;
        self.store
            .hold_seats(seat_ids, session, expires_at, now)
            .await?;

        info!(
            %showtime_id,
            %session,
            seats = seat_ids.len(),
            %expires_at,
            "Seats held"
        );
        Ok(HoldResult {
            session,
            seat_ids: seat_ids.to_vec(),
            expires_at,
        })
    }

    /// Releases holds owned by `session`. Free or reassigned seats are
    /// skipped, so repeated releases are harmless.
    pub async fn release(&self, session: Uuid, seat_ids: &[Uuid]) -> Result<(), AppError> {
        if seat_ids.is_empty() {
            return Err(AppError::Validation("no seats requested".to_string()));
        }
        self.store.release_seats(seat_ids, Some(session)).await?;
        info!(%session, seats = seat_ids.len(), "Seats released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SeatStatus, Showtime, ShowtimeSeat};
    use crate::store::MemoryStore;
    use rust_decimal::Decimal;

    fn showtime(id: Uuid, starts_in_mins: i64) -> Showtime {
        let start = Utc::now() + Duration::minutes(starts_in_mins);
        Showtime {
            id,
            film_title: "Stalker".into(),
            room: "R1".into(),
            start_time: start,
            end_time: start + Duration::minutes(160),
            base_price: Decimal::from(100_000),
            format_factor: Decimal::ONE,
            language_factor: Decimal::ONE,
        }
    }

    fn seat(showtime_id: Uuid, label: &str) -> ShowtimeSeat {
        ShowtimeSeat {
            id: Uuid::new_v4(),
            showtime_id,
            seat_label: label.into(),
            seat_factor: Decimal::ONE,
            status: SeatStatus::Free,
            hold_expires_at: None,
            hold_session: None,
        }
    }

    fn fixture() -> (Arc<MemoryStore>, SeatHoldManager, Uuid, Vec<Uuid>) {
        let store = Arc::new(MemoryStore::new());
        let showtime_id = Uuid::new_v4();
        store.insert_showtime(showtime(showtime_id, 120));
        let seats: Vec<Uuid> = ["A1", "A2", "A3"]
            .iter()
            .map(|label| {
                let s = seat(showtime_id, label);
                let id = s.id;
                store.insert_seat(s);
                id
            })
            .collect();
        let manager = SeatHoldManager::new(store.clone(), Duration::seconds(300));
        (store, manager, showtime_id, seats)
    }

    #[tokio::test]
    async fn holding_free_seats_succeeds() {
        let (store, manager, showtime_id, seats) = fixture();
        let result = manager.hold(showtime_id, &seats, None).await.unwrap();
        assert_eq!(result.seat_ids, seats);

        let held = store.seats(&seats).await.unwrap();
        assert!(held.iter().all(|s| s.status == SeatStatus::Held));
        assert!(held.iter().all(|s| s.hold_session == Some(result.session)));
    }

    #[tokio::test]
    async fn second_session_conflicts_within_window() {
        let (_store, manager, showtime_id, seats) = fixture();
        manager.hold(showtime_id, &seats[..1], None).await.unwrap();

        let err = manager.hold(showtime_id, &seats[..1], None).await.unwrap_err();
        match err {
            AppError::Conflict { details, .. } => {
                let listed = details.unwrap()["unavailable_seats"].clone();
                assert_eq!(listed[0], serde_json::json!(seats[0]));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn batch_fails_whole_when_one_seat_is_taken() {
        let (store, manager, showtime_id, seats) = fixture();
        manager.hold(showtime_id, &seats[..1], None).await.unwrap();

        let err = manager.hold(showtime_id, &seats, None).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));

        // The free seats in the failed batch stay free.
        let after = store.seats(&seats[1..]).await.unwrap();
        assert!(after.iter().all(|s| s.status == SeatStatus::Free));
    }

    #[tokio::test]
    async fn lapsed_hold_is_reclaimed_by_a_new_session() {
        let (_store, manager, showtime_id, seats) = fixture();
        let first = manager
            .hold(showtime_id, &seats[..1], Some(Duration::milliseconds(1)))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let second = manager.hold(showtime_id, &seats[..1], None).await.unwrap();
        assert_ne!(first.session, second.session);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let (store, manager, showtime_id, seats) = fixture();
        let held = manager.hold(showtime_id, &seats, None).await.unwrap();

        manager.release(held.session, &seats).await.unwrap();
        manager.release(held.session, &seats).await.unwrap();

        let after = store.seats(&seats).await.unwrap();
        assert!(after.iter().all(|s| s.status == SeatStatus::Free));
    }

    #[tokio::test]
    async fn release_by_non_owner_is_a_no_op() {
        let (store, manager, showtime_id, seats) = fixture();
        let held = manager.hold(showtime_id, &seats, None).await.unwrap();

        manager.release(Uuid::new_v4(), &seats).await.unwrap();
        let after = store.seats(&seats).await.unwrap();
        assert!(after.iter().all(|s| s.hold_session == Some(held.session)));
    }

    #[tokio::test]
    async fn started_showtime_rejects_holds() {
        let store = Arc::new(MemoryStore::new());
        let showtime_id = Uuid::new_v4();
        store.insert_showtime(showtime(showtime_id, -10));
        let s = seat(showtime_id, "A1");
        let id = s.id;
        store.insert_seat(s);

        let manager = SeatHoldManager::new(store, Duration::seconds(300));
        let err = manager.hold(showtime_id, &[id], None).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
