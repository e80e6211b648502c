use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Engine;

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Background task that rewrites a tenant's WAL once enough appends have
/// accumulated since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BookingLineSpec, DateRange};
    use chrono::NaiveDate;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("bookgate_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[tokio::test]
    async fn compaction_preserves_state_across_restart() {
        let path = test_wal_path("compact_restart.wal");
        let item = Ulid::new();
        let booking = Ulid::new();
        let range = DateRange::new(d(2024, 11, 20), d(2024, 11, 25));

        {
            let engine = Engine::new(path.clone()).unwrap();
            engine
                .create_item(item, "Chairs".into(), None, 100, None)
                .await
                .unwrap();
            engine
                .admit_booking(
                    booking,
                    "cust".into(),
                    range,
                    vec![BookingLineSpec {
                        item_id: item,
                        quantity: 40,
                    }],
                )
                .await
                .unwrap();
            engine
                .change_status(booking, crate::model::BookingStatus::Out)
                .await
                .unwrap();
            engine.compact_wal().await.unwrap();
        }

        let reopened = Engine::new(path.clone()).unwrap();
        let table = reopened.check_availability(item, range, None).await.unwrap();
        assert!(table.iter().all(|row| row.reserved == 40));
        assert_eq!(
            reopened.get_booking(&booking).unwrap().status,
            crate::model::BookingStatus::Out
        );

        let _ = std::fs::remove_file(&path);
    }
}
