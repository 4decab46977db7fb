use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use tokio_test::{assert_err, assert_ok};
use ulid::Ulid;

use slotkeeper::clock::ManualClock;
use slotkeeper::engine::{Engine, EngineError, ErrorKind, Policy};
use slotkeeper::model::*;
use slotkeeper::notify::NotifyHub;
use slotkeeper::service::{BookingService, Outcome, StaticIdentity};

const NOW: Ms = 1_767_225_600_000; // 2026-01-01T00:00:00Z

// ── Test infrastructure ──────────────────────────────────────

fn data_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("slotkeeper_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn open_engine(dir: &Path, buffer_minutes: u32, clock: Arc<ManualClock>) -> Arc<Engine> {
    let engine = Engine::new(
        dir.join("slotkeeper.wal"),
        Policy::default().with_buffer_minutes(buffer_minutes),
        Arc::new(NotifyHub::new()),
        clock,
    )
    .unwrap();
    Arc::new(engine)
}

fn as_actor(engine: &Arc<Engine>, actor: Actor) -> BookingService {
    BookingService::new(engine.clone(), Arc::new(StaticIdentity(actor)))
}

// ── Scenarios ────────────────────────────────────────────────

#[tokio::test]
async fn book_confirm_late_cancel_then_desk_cancel() {
    let clock = Arc::new(ManualClock::new(NOW));
    let engine = open_engine(&data_dir(), 0, clock.clone());
    let pro = Ulid::new();
    let patient = Ulid::new();
    let start = NOW + DAY_MS + 9 * HOUR_MS;
    let slot = assert_ok!(engine.add_slot(Ulid::new(), pro, start, start + 30 * MINUTE_MS).await);

    let as_patient = as_actor(&engine, Actor::patient(patient));
    let appt = assert_ok!(as_patient.book(pro, slot.id, patient, Some("checkup".into())).await.into_result());
    assert_eq!(appt.status, AppointmentStatus::Pending);

    let as_pro = as_actor(&engine, Actor::professional(pro));
    let confirmed = assert_ok!(as_pro.change_status(appt.id, AppointmentStatus::Confirmed).await.into_result());
    assert_eq!(confirmed.status, AppointmentStatus::Confirmed);

    clock.set(start - 2 * HOUR_MS);
    let err = assert_err!(as_patient.cancel(appt.id).await.into_result());
    assert_eq!(err.kind(), ErrorKind::LeadTimeViolation);
    assert!(!engine.slot(slot.id).await.unwrap().is_available());

    let as_desk = as_actor(&engine, Actor::front_desk(Ulid::new()));
    let cancelled = assert_ok!(as_desk.cancel(appt.id).await.into_result());
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert!(engine.slot(slot.id).await.unwrap().is_available());
}

#[tokio::test]
async fn crowd_booking_one_slot() {
    let engine = open_engine(&data_dir(), 0, Arc::new(ManualClock::new(NOW)));
    let pro = Ulid::new();
    let start = NOW + 3 * DAY_MS;
    let wanted = engine.add_slot(Ulid::new(), pro, start, start + HOUR_MS).await.unwrap();
    let later = engine
        .add_slot(Ulid::new(), pro, start + 2 * HOUR_MS, start + 3 * HOUR_MS)
        .await
        .unwrap();

    let wanted_id = wanted.id;
    let attempts = (0..32).map(|_| {
        let engine = engine.clone();
        async move {
            let patient = Ulid::new();
            as_actor(&engine, Actor::patient(patient))
                .book(pro, wanted_id, patient, None)
                .await
        }
    });
    let outcomes = join_all(attempts).await;

    let winners = outcomes.iter().filter(|o| o.is_success()).count();
    assert_eq!(winners, 1);
    for outcome in outcomes.iter().filter(|o| !o.is_success()) {
        match outcome {
            Outcome::Conflict { error, suggestions } => {
                assert!(matches!(error, EngineError::SlotConflict { .. }));
                assert_eq!(suggestions.iter().map(|s| s.id).collect::<Vec<_>>(), vec![later.id]);
            }
            other => panic!("loser got {other:?}"),
        }
    }
}

#[tokio::test]
async fn suggestions_never_break_the_buffer() {
    let engine = open_engine(&data_dir(), 20, Arc::new(ManualClock::new(NOW)));
    let pro = Ulid::new();
    let day = NOW + 2 * DAY_MS;
    let desk = as_actor(&engine, Actor::front_desk(Ulid::new()));

    // Quarter-hour grid of 15-minute slots across the morning.
    let mut grid = Vec::new();
    for n in 0..16 {
        let s = day + 8 * HOUR_MS + n * 15 * MINUTE_MS;
        grid.push(engine.add_slot(Ulid::new(), pro, s, s + 15 * MINUTE_MS).await.unwrap());
    }
    for n in [2usize, 9] {
        assert!(desk.book(pro, grid[n].id, Ulid::new(), None).await.is_success());
    }

    let booked: Vec<Span> = [2usize, 9].iter().map(|&n| grid[n].span).collect();
    let suggested = engine.suggest(pro, day, None, Some(50)).await;
    assert!(!suggested.is_empty());
    for slot in &suggested {
        assert!(
            !slotkeeper::engine::has_conflict(&slot.span, &booked, 20 * MINUTE_MS),
            "suggested {} breaks the buffer",
            slot.span
        );
    }
    let first = &suggested[0];
    assert!(desk.book(pro, first.id, Ulid::new(), None).await.is_success());
}

#[tokio::test]
async fn state_reloads_from_data_dir() {
    let dir = data_dir();
    let pro = Ulid::new();
    let patient = Ulid::new();
    let start = NOW + 4 * DAY_MS;
    let appt_id = {
        let engine = open_engine(&dir, 0, Arc::new(ManualClock::new(NOW)));
        let slot = engine.add_slot(Ulid::new(), pro, start, start + HOUR_MS).await.unwrap();
        let appt = as_actor(&engine, Actor::patient(patient))
            .book(pro, slot.id, patient, None)
            .await
            .into_result()
            .unwrap();
        engine.compact_wal().await.unwrap();
        as_actor(&engine, Actor::professional(pro))
            .change_status(appt.id, AppointmentStatus::Confirmed)
            .await
            .into_result()
            .unwrap();
        appt.id
    };

    let engine = open_engine(&dir, 0, Arc::new(ManualClock::new(NOW)));
    let restored = engine.get_appointment(appt_id).await.unwrap();
    assert_eq!(restored.status, AppointmentStatus::Confirmed);
    assert_eq!(engine.appointments_for_patient(patient).await.len(), 1);
    assert!(engine.audit().await.is_empty());
}
