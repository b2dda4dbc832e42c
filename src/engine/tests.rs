use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::auth::{Principal, Role};
use crate::model::*;
use crate::notify::NotifyHub;

use super::{BookingFilter, BookingPatch, CreateBooking, Engine, EngineError, FieldAttrs, SlotGrid};

fn temp_wal() -> PathBuf {
    let dir = std::env::temp_dir().join("pitchbook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(format!("{}.wal", Ulid::new()))
}

fn engine_at(path: &PathBuf) -> Engine {
    Engine::new(path.clone(), SlotGrid::default(), Arc::new(NotifyHub::new())).unwrap()
}

fn coach(user: &str) -> Principal {
    Principal {
        user: user.into(),
        role: Role::Coach,
    }
}

fn admin() -> Principal {
    Principal {
        user: "boss".into(),
        role: Role::Admin,
    }
}

fn t(h: u16, m: u16) -> TimeOfDay {
    TimeOfDay::from_hm(h, m)
}

fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

async fn seed_field(engine: &Engine) -> Ulid {
    let id = Ulid::new();
    engine
        .create_field(
            id,
            FieldAttrs {
                name: "Pitch 1".into(),
                capacity: 22,
                indoor: false,
                maintenance_notes: None,
            },
        )
        .await
        .unwrap();
    id
}

fn req(field_id: Ulid, day: &str, start: TimeOfDay, end: TimeOfDay) -> CreateBooking {
    CreateBooking {
        field_id,
        title: "U15 training".into(),
        date: date(day),
        slot: TimeSlot::new(start, end),
        kind: BookingKind::Training,
        notes: None,
        recurrence: None,
    }
}

#[tokio::test]
async fn overlapping_booking_is_rejected_with_conflict_list() {
    let path = temp_wal();
    let engine = engine_at(&path);
    let field = seed_field(&engine).await;

    let first = engine
        .create_booking(req(field, "2030-06-01", t(14, 0), t(15, 30)), &coach("c1"))
        .await
        .unwrap();

    let err = engine
        .create_booking(req(field, "2030-06-01", t(15, 0), t(16, 0)), &coach("c2"))
        .await
        .unwrap_err();
    match err {
        EngineError::Conflict(conflicts) => {
            assert_eq!(conflicts.len(), 1);
            assert_eq!(conflicts[0].id, first.id);
        }
        other => panic!("expected Conflict, got {other:?}"),
    }
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn touching_slots_both_commit() {
    let path = temp_wal();
    let engine = engine_at(&path);
    let field = seed_field(&engine).await;

    engine
        .create_booking(req(field, "2030-06-01", t(14, 0), t(15, 30)), &coach("c1"))
        .await
        .unwrap();
    engine
        .create_booking(req(field, "2030-06-01", t(15, 30), t(17, 0)), &coach("c2"))
        .await
        .unwrap();
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn moving_a_booking_frees_its_old_slot() {
    let path = temp_wal();
    let engine = engine_at(&path);
    let field = seed_field(&engine).await;

    let b = engine
        .create_booking(req(field, "2030-06-01", t(14, 0), t(15, 30)), &coach("c1"))
        .await
        .unwrap();

    let moved = engine
        .update_booking(
            b.id,
            BookingPatch {
                start: Some(t(16, 0)),
                end: Some(t(17, 0)),
                ..Default::default()
            },
            &coach("c1"),
        )
        .await
        .unwrap();
    assert_eq!(moved.slot, TimeSlot::new(t(16, 0), t(17, 0)));

    // The vacated 14:00-15:30 slot is bookable again.
    engine
        .create_booking(req(field, "2030-06-01", t(14, 0), t(15, 30)), &coach("c2"))
        .await
        .unwrap();
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn update_into_occupied_slot_conflicts_but_own_slot_does_not() {
    let path = temp_wal();
    let engine = engine_at(&path);
    let field = seed_field(&engine).await;

    let b = engine
        .create_booking(req(field, "2030-06-01", t(14, 0), t(15, 30)), &coach("c1"))
        .await
        .unwrap();
    engine
        .create_booking(req(field, "2030-06-01", t(16, 0), t(17, 30)), &coach("c2"))
        .await
        .unwrap();

    // Shifting within its own slot is fine (self-exclusion).
    engine
        .update_booking(
            b.id,
            BookingPatch {
                start: Some(t(14, 30)),
                ..Default::default()
            },
            &coach("c1"),
        )
        .await
        .unwrap();

    // Moving onto the other booking is not.
    let err = engine
        .update_booking(
            b.id,
            BookingPatch {
                start: Some(t(16, 30)),
                end: Some(t(18, 0)),
                ..Default::default()
            },
            &coach("c1"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn cancel_keeps_history_and_frees_the_slot() {
    let path = temp_wal();
    let engine = engine_at(&path);
    let field = seed_field(&engine).await;

    let b = engine
        .create_booking(req(field, "2030-06-01", t(14, 0), t(15, 30)), &coach("c1"))
        .await
        .unwrap();
    engine
        .cancel_booking(b.id, Some("rain".into()), &coach("c1"))
        .await
        .unwrap();

    let cancelled = engine.get_booking(&b.id).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert!(cancelled.notes.as_deref().unwrap().contains("Cancelled: rain"));

    // Still visible in the per-field listing.
    let listed = engine
        .bookings_for_field(field, Some(date("2030-06-01")), None)
        .await
        .unwrap();
    assert!(listed.iter().any(|x| x.id == b.id));

    // And the slot is bookable again.
    engine
        .create_booking(req(field, "2030-06-01", t(14, 0), t(15, 30)), &coach("c2"))
        .await
        .unwrap();
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn re_cancel_is_a_silent_noop() {
    let path = temp_wal();
    let engine = engine_at(&path);
    let field = seed_field(&engine).await;

    let b = engine
        .create_booking(req(field, "2030-06-01", t(14, 0), t(15, 30)), &coach("c1"))
        .await
        .unwrap();
    engine
        .cancel_booking(b.id, Some("rain".into()), &coach("c1"))
        .await
        .unwrap();
    engine
        .cancel_booking(b.id, Some("flood".into()), &coach("c1"))
        .await
        .unwrap();

    let cancelled = engine.get_booking(&b.id).await.unwrap();
    let notes = cancelled.notes.as_deref().unwrap();
    assert!(notes.contains("rain"));
    assert!(!notes.contains("flood"));
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn coach_cannot_touch_someone_elses_booking() {
    let path = temp_wal();
    let engine = engine_at(&path);
    let field = seed_field(&engine).await;

    let b = engine
        .create_booking(req(field, "2030-06-01", t(14, 0), t(15, 30)), &coach("c1"))
        .await
        .unwrap();

    let patch = BookingPatch {
        title: Some("Hijacked".into()),
        ..Default::default()
    };
    let err = engine
        .update_booking(b.id, patch.clone(), &coach("c2"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden));

    let err = engine
        .cancel_booking(b.id, None, &coach("c2"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden));

    // A privileged role may.
    engine.update_booking(b.id, patch, &admin()).await.unwrap();
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn notes_patch_distinguishes_keep_replace_and_clear() {
    let path = temp_wal();
    let engine = engine_at(&path);
    let field = seed_field(&engine).await;

    let mut create = req(field, "2030-06-01", t(14, 0), t(15, 30));
    create.notes = Some("bring cones".into());
    let b = engine.create_booking(create, &coach("c1")).await.unwrap();

    // Absent notes keep the existing value
    let kept = engine
        .update_booking(
            b.id,
            BookingPatch {
                title: Some("U15 training (moved)".into()),
                ..Default::default()
            },
            &coach("c1"),
        )
        .await
        .unwrap();
    assert_eq!(kept.notes.as_deref(), Some("bring cones"));

    // Some(Some(_)) replaces
    let replaced = engine
        .update_booking(
            b.id,
            BookingPatch {
                notes: Some(Some("bring bibs".into())),
                ..Default::default()
            },
            &coach("c1"),
        )
        .await
        .unwrap();
    assert_eq!(replaced.notes.as_deref(), Some("bring bibs"));

    // Some(None) clears
    let cleared = engine
        .update_booking(
            b.id,
            BookingPatch {
                notes: Some(None),
                ..Default::default()
            },
            &coach("c1"),
        )
        .await
        .unwrap();
    assert_eq!(cleared.notes, None);
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn update_cannot_smuggle_a_cancellation() {
    let path = temp_wal();
    let engine = engine_at(&path);
    let field = seed_field(&engine).await;

    let b = engine
        .create_booking(req(field, "2030-06-01", t(14, 0), t(15, 30)), &coach("c1"))
        .await
        .unwrap();
    let err = engine
        .update_booking(
            b.id,
            BookingPatch {
                status: Some(BookingStatus::Cancelled),
                ..Default::default()
            },
            &coach("c1"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn inactive_field_rejects_new_bookings() {
    let path = temp_wal();
    let engine = engine_at(&path);
    let field = seed_field(&engine).await;

    engine.deactivate_field(field).await.unwrap();
    // Deactivating again is a no-op.
    engine.deactivate_field(field).await.unwrap();

    let err = engine
        .create_booking(req(field, "2030-06-01", t(14, 0), t(15, 30)), &coach("c1"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Inactive(_)));
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn availability_probe_reports_conflicts_and_alternatives() {
    let path = temp_wal();
    let engine = engine_at(&path);
    let field = seed_field(&engine).await;

    engine
        .create_booking(req(field, "2030-06-01", t(14, 0), t(15, 30)), &coach("c1"))
        .await
        .unwrap();

    let result = engine
        .check_availability(
            field,
            date("2030-06-01"),
            TimeSlot::new(t(15, 0), t(16, 0)),
        )
        .await
        .unwrap();
    assert!(!result.is_available);
    assert_eq!(result.conflicts.len(), 1);
    assert!(!result.alternative_slots.is_empty());
    assert!(result
        .alternative_slots
        .iter()
        .all(|s| !s.overlaps(&TimeSlot::new(t(14, 0), t(15, 30)))));

    // A free probe returns no alternatives.
    let free = engine
        .check_availability(field, date("2030-06-02"), TimeSlot::new(t(15, 0), t(16, 0)))
        .await
        .unwrap();
    assert!(free.is_available);
    assert!(free.conflicts.is_empty());
    assert!(free.alternative_slots.is_empty());
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn state_survives_restart() {
    let path = temp_wal();
    let booking_id;
    let field;
    {
        let engine = engine_at(&path);
        field = seed_field(&engine).await;
        booking_id = engine
            .create_booking(req(field, "2030-06-01", t(14, 0), t(15, 30)), &coach("c1"))
            .await
            .unwrap()
            .id;
        engine
            .cancel_booking(booking_id, Some("rain".into()), &coach("c1"))
            .await
            .unwrap();
    }

    let engine = engine_at(&path);
    let b = engine.get_booking(&booking_id).await.unwrap();
    assert_eq!(b.field_id, field);
    assert_eq!(b.status, BookingStatus::Cancelled);
    assert!(b.notes.as_deref().unwrap().contains("rain"));
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn concurrent_creates_for_one_slot_commit_exactly_once() {
    let path = temp_wal();
    let engine = Arc::new(engine_at(&path));
    let field = seed_field(&engine).await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .create_booking(
                    req(field, "2030-06-01", t(14, 0), t(15, 30)),
                    &coach(&format!("c{i}")),
                )
                .await
        }));
    }

    let mut ok = 0;
    let mut conflicts = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(EngineError::Conflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(conflicts, 7);
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn past_confirmed_bookings_read_as_completed() {
    let path = temp_wal();
    let engine = engine_at(&path);
    let field = seed_field(&engine).await;

    engine
        .create_booking(req(field, "2020-01-01", t(14, 0), t(15, 30)), &coach("c1"))
        .await
        .unwrap();
    engine
        .create_booking(req(field, "2030-06-01", t(14, 0), t(15, 30)), &coach("c1"))
        .await
        .unwrap();

    let (bookings, stats) = engine
        .list_bookings(&BookingFilter::default())
        .await
        .unwrap();
    assert_eq!(bookings.len(), 2);
    assert_eq!(stats.total, 2);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.confirmed, 1);

    // Status filter narrows rows but stats still cover the whole window.
    let (only_done, stats) = engine
        .list_bookings(&BookingFilter {
            status: Some(BookingStatus::Completed),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(only_done.len(), 1);
    assert_eq!(only_done[0].date, date("2020-01-01"));
    assert_eq!(stats.total, 2);
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn field_listing_reflects_updates_and_deactivation() {
    let path = temp_wal();
    let engine = engine_at(&path);
    let field = seed_field(&engine).await;

    engine
        .update_field(
            field,
            FieldAttrs {
                name: "Pitch 1 (turf)".into(),
                capacity: 14,
                indoor: true,
                maintenance_notes: Some("drainage work".into()),
            },
        )
        .await
        .unwrap();
    engine.deactivate_field(field).await.unwrap();

    let fields = engine.list_fields().await;
    assert_eq!(fields.len(), 1);
    let f = &fields[0];
    assert_eq!(f.name, "Pitch 1 (turf)");
    assert_eq!(f.capacity, 14);
    assert!(f.indoor);
    assert!(!f.active);
    assert_eq!(f.status, FieldStatus::Maintenance);
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = temp_wal();
    let field;
    let cancelled_id;
    {
        let engine = engine_at(&path);
        field = seed_field(&engine).await;
        let b = engine
            .create_booking(req(field, "2030-06-01", t(14, 0), t(15, 30)), &coach("c1"))
            .await
            .unwrap();
        cancelled_id = b.id;
        engine
            .cancel_booking(cancelled_id, Some("rain".into()), &coach("c1"))
            .await
            .unwrap();
        engine
            .create_booking(req(field, "2030-06-01", t(16, 0), t(17, 30)), &coach("c2"))
            .await
            .unwrap();
        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
    }

    let engine = engine_at(&path);
    let listed = engine
        .bookings_for_field(field, Some(date("2030-06-01")), None)
        .await
        .unwrap();
    assert_eq!(listed.len(), 2);
    let b = engine.get_booking(&cancelled_id).await.unwrap();
    assert_eq!(b.status, BookingStatus::Cancelled);
    assert!(b.notes.as_deref().unwrap().contains("rain"));
    std::fs::remove_file(&path).ok();
}
