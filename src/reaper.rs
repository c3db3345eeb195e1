use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{Engine, now_ms};
use crate::model::Ms;

const SWEEP_INTERVAL: Duration = Duration::from_secs(5);
const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Sends `reserved` occupants whose status has not moved for `ttl` back to
/// their initial status, releasing their seats. Only spawned when a TTL is
/// configured.
pub async fn run_reaper(engine: Arc<Engine>, ttl: Ms) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        sweep_expired(&engine, now_ms() - ttl).await;
    }
}

/// One sweep over every location. Returns how many occupants were expired.
pub async fn sweep_expired(engine: &Engine, cutoff: Ms) -> usize {
    let mut expired = 0;
    for occupant in engine.collect_expired_reserved(cutoff) {
        match engine.expire_reserved(occupant).await {
            Ok(status) => {
                info!(%occupant, %status, "reserved hold expired");
                expired += 1;
            }
            // Arrived or canceled since the scan.
            Err(e) => debug!("reaper skip {occupant}: {e}"),
        }
    }
    expired
}

/// Rewrites the tenant's WAL once `threshold` commits have accumulated.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!(appends, "WAL compacted"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::NaiveDate;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("seatd_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn dinner() -> Ms {
        let date = NaiveDate::from_ymd_opt(2030, 6, 3).unwrap();
        crate::engine::midnight_ms(date) + 19 * HOUR_MS
    }

    async fn held_reservation(engine: &Engine) -> (OccupantRef, Ulid) {
        let lid = Ulid::new();
        engine.create_location(lid, None, true, true).await.unwrap();
        for dow in 0..7 {
            engine.set_operating_hours(dow, 11 * 60, 23 * 60, false).await.unwrap();
        }
        let section = Ulid::new();
        engine.create_section(section, lid, None, 0).await.unwrap();
        let seat = Ulid::new();
        engine
            .create_seat(seat, section, "T1".into(), 1, 4, SeatCategory::Standard)
            .await
            .unwrap();
        let rid = Ulid::new();
        engine.create_reservation(rid, lid, None, 2, dinner(), None).await.unwrap();
        let r = OccupantRef::reservation(rid);
        engine
            .bulk_allocate(r, vec![SeatSelector::Id(seat)], dinner(), SeatingIntent::Reserve)
            .await
            .unwrap();
        (r, seat)
    }

    #[tokio::test]
    async fn sweep_expires_stale_reserved_holds() {
        let engine = Engine::new(test_wal_path("sweep_expires.wal")).unwrap();
        let (r, seat) = held_reservation(&engine).await;

        // Still fresh.
        assert_eq!(sweep_expired(&engine, now_ms() - HOUR_MS).await, 0);

        assert_eq!(sweep_expired(&engine, now_ms() + 1).await, 1);
        assert_eq!(engine.get_occupant(r).await.unwrap().status, OccupantStatus::Booked);
        let filter = AllocationFilter { seat_id: Some(seat), active: Some(true), ..Default::default() };
        assert!(engine.list_allocations(&filter).await.unwrap().is_empty());

        // Nothing left to expire.
        assert_eq!(sweep_expired(&engine, now_ms() + 1).await, 0);
    }

    #[tokio::test]
    async fn sweep_leaves_seated_guests_alone() {
        let engine = Engine::new(test_wal_path("sweep_seated.wal")).unwrap();
        let (r, _) = held_reservation(&engine).await;
        engine.arrive(r).await.unwrap();

        assert_eq!(sweep_expired(&engine, now_ms() + 1).await, 0);
        assert_eq!(engine.get_occupant(r).await.unwrap().status, OccupantStatus::Seated);
    }
}
