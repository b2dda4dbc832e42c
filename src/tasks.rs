use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Engine;

/// Background task that rewrites a tenant's WAL once enough appends have
/// accumulated since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
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
    use crate::auth::{Principal, Role};
    use crate::engine::{CreateBooking, FieldAttrs, SlotGrid};
    use crate::model::*;
    use crate::notify::NotifyHub;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("pitchbook_test_tasks");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn append_counter_resets_after_compaction() {
        let path = test_wal_path("compact_counter.wal");
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(path, SlotGrid::default(), notify).unwrap());

        let fid = Ulid::new();
        engine
            .create_field(
                fid,
                FieldAttrs {
                    name: "Pitch 1".into(),
                    capacity: 22,
                    indoor: false,
                    maintenance_notes: None,
                },
            )
            .await
            .unwrap();
        engine
            .create_booking(
                CreateBooking {
                    field_id: fid,
                    title: "U15 training".into(),
                    date: "2030-06-01".parse().unwrap(),
                    slot: TimeSlot::new(TimeOfDay::from_hm(14, 0), TimeOfDay::from_hm(15, 30)),
                    kind: BookingKind::Training,
                    notes: None,
                    recurrence: None,
                },
                &Principal {
                    user: "office".into(),
                    role: Role::Manager,
                },
            )
            .await
            .unwrap();

        assert_eq!(engine.wal_appends_since_compact().await, 2);
        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
    }
}
