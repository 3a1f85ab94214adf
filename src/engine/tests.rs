use super::*;
use crate::limits::*;

use chrono::{NaiveDate, NaiveDateTime};
use futures::FutureExt;
use tokio_test::{assert_err, assert_ok};

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("slotbook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn new_engine(name: &str) -> (Engine, PathBuf) {
    let path = test_wal_path(name);
    let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
    (engine, path)
}

fn t(s: &str) -> TimeOfDay {
    s.parse().unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Monday 2024-06-10, 08:00.
fn now() -> NaiveDateTime {
    date(2024, 6, 10).and_hms_opt(8, 0, 0).unwrap()
}

/// Tuesday after `now()`.
fn tuesday() -> NaiveDate {
    date(2024, 6, 11)
}

fn weekday_hours() -> WeekdaySchedule {
    WeekdaySchedule::open(t("09:00"), t("18:00")).with_lunch(t("12:00"), t("13:00"))
}

/// A barber open Monday–Friday with one 30-minute service.
async fn barber(engine: &Engine) -> (Ulid, Ulid) {
    let business = Ulid::new();
    engine.create_business(business, "Barber".into(), 30).await.unwrap();
    let days = Weekday::ALL[1..6].iter().map(|w| (*w, weekday_hours())).collect();
    engine.set_schedules(business, days).await.unwrap();
    let service = Ulid::new();
    engine.add_service(service, business, "Haircut".into(), 30).await.unwrap();
    (business, service)
}

fn request(business: Ulid, service: Ulid, date: NaiveDate, time: &str) -> ReserveRequest {
    ReserveRequest {
        id: Ulid::new(),
        business_id: business,
        service_id: service,
        date,
        time: t(time),
        customer_id: "cust-1".into(),
    }
}

fn rejection(result: Result<Appointment, EngineError>) -> Rejection {
    match result {
        Err(EngineError::Rejected(r)) => r,
        other => panic!("expected rejection, got {other:?}"),
    }
}

// ── Business configuration ───────────────────────────────

#[tokio::test]
async fn create_and_get_business() {
    let (engine, _) = new_engine("create_business.wal");
    let id = Ulid::new();
    engine.create_business(id, "Clinic".into(), 20).await.unwrap();

    let info = engine.get_business(id).await.unwrap();
    assert_eq!(info.name, "Clinic");
    assert_eq!(info.slot_step, 20);
    assert_eq!(engine.list_businesses().await.len(), 1);

    // new businesses are closed every day
    let week = engine.weekly_schedule(id).await.unwrap();
    assert!(week.iter().all(|(_, d)| !d.is_open));
}

#[tokio::test]
async fn duplicate_business_rejected() {
    let (engine, _) = new_engine("dup_business.wal");
    let id = Ulid::new();
    engine.create_business(id, "A".into(), 30).await.unwrap();
    let err = assert_err!(engine.create_business(id, "B".into(), 30).await);
    assert!(matches!(err, EngineError::AlreadyExists(_)));
}

#[tokio::test]
async fn business_input_is_checked() {
    let (engine, _) = new_engine("business_input.wal");
    assert!(matches!(
        engine.create_business(Ulid::new(), "".into(), 30).await,
        Err(EngineError::InvalidInput(_))
    ));
    assert!(matches!(
        engine.create_business(Ulid::new(), "x".repeat(MAX_NAME_LEN + 1), 30).await,
        Err(EngineError::LimitExceeded(_))
    ));
    assert!(matches!(
        engine.create_business(Ulid::new(), "A".into(), 0).await,
        Err(EngineError::InvalidInput(_))
    ));
    assert!(matches!(
        engine.create_business(Ulid::new(), "A".into(), MAX_SLOT_STEP_MINUTES + 1).await,
        Err(EngineError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn invalid_schedule_is_refused_whole() {
    let (engine, _) = new_engine("bad_schedule.wal");
    let id = Ulid::new();
    engine.create_business(id, "A".into(), 30).await.unwrap();

    let bad = WeekdaySchedule::open(t("18:00"), t("09:00"));
    let err = engine
        .set_schedules(id, vec![(Weekday::Monday, weekday_hours()), (Weekday::Tuesday, bad)])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidSchedule(ScheduleError::OpenNotBeforeClose { .. })));

    // the valid Monday row was not written either
    let week = engine.weekly_schedule(id).await.unwrap();
    assert!(!week.get(Weekday::Monday).is_open);
}

#[tokio::test]
async fn repeated_weekday_in_one_update_is_refused() {
    let (engine, _) = new_engine("repeat_weekday.wal");
    let id = Ulid::new();
    engine.create_business(id, "A".into(), 30).await.unwrap();
    let err = engine
        .set_schedules(id, vec![(Weekday::Monday, weekday_hours()), (Weekday::Monday, weekday_hours())])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
}

#[tokio::test]
async fn services_add_list_remove() {
    let (engine, _) = new_engine("services.wal");
    let (business, haircut) = barber(&engine).await;
    let beard = Ulid::new();
    engine.add_service(beard, business, "Beard trim".into(), 15).await.unwrap();

    let names: Vec<String> = engine
        .list_services(business)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names, vec!["Beard trim", "Haircut"]);

    assert_eq!(engine.remove_service(haircut).await.unwrap(), business);
    assert_eq!(engine.list_services(business).await.unwrap().len(), 1);
    assert!(matches!(engine.remove_service(haircut).await, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn delete_business_blocked_by_active_appointments() {
    let (engine, _) = new_engine("delete_blocked.wal");
    let (business, service) = barber(&engine).await;
    let appt = engine
        .reserve(request(business, service, tuesday(), "10:00"), now())
        .await
        .unwrap();

    assert!(matches!(
        engine.delete_business(business).await,
        Err(EngineError::HasActiveAppointments(_))
    ));

    engine.cancel_appointment(appt.id).await.unwrap();
    engine.delete_business(business).await.unwrap();
    assert!(matches!(engine.get_business(business).await, Err(EngineError::NotFound(_))));
    assert!(matches!(engine.get_appointment(appt.id).await, Err(EngineError::NotFound(_))));
    assert!(engine.business_for_service(&service).is_none());
}

// ── Reservation ──────────────────────────────────────────

#[tokio::test]
async fn reserve_creates_pending_appointment() {
    let (engine, _) = new_engine("reserve_ok.wal");
    let (business, service) = barber(&engine).await;
    let req = request(business, service, tuesday(), "10:30");
    let id = req.id;

    let appt = assert_ok!(engine.reserve(req, now()).await);
    assert_eq!(appt.id, id);
    assert_eq!(appt.status, AppointmentStatus::Pending);
    assert_eq!(appt.created_at, now());
    assert_eq!(engine.get_appointment(id).await.unwrap(), appt);
}

#[tokio::test]
async fn second_reservation_for_same_slot_is_taken() {
    let (engine, _) = new_engine("reserve_taken.wal");
    let (business, service) = barber(&engine).await;
    engine
        .reserve(request(business, service, tuesday(), "10:00"), now())
        .await
        .unwrap();

    let mut again = request(business, service, tuesday(), "10:00");
    again.customer_id = "cust-2".into();
    assert_eq!(rejection(engine.reserve(again, now()).await), Rejection::SlotAlreadyTaken);

    // neighbouring slot still free
    engine
        .reserve(request(business, service, tuesday(), "10:30"), now())
        .await
        .unwrap();
}

#[tokio::test]
async fn rejections_follow_validation_order() {
    let (engine, _) = new_engine("reserve_order.wal");
    let (business, service) = barber(&engine).await;

    // yesterday at a closed hour: past wins
    let r = engine
        .reserve(request(business, service, date(2024, 6, 9), "20:00"), now())
        .await;
    assert_eq!(rejection(r), Rejection::SlotInPast);

    // Sunday is closed
    let r = engine
        .reserve(request(business, service, date(2024, 6, 16), "10:00"), now())
        .await;
    assert_eq!(rejection(r), Rejection::OutsideBusinessHours);

    // lunch
    let r = engine.reserve(request(business, service, tuesday(), "12:30"), now()).await;
    assert_eq!(rejection(r), Rejection::OutsideBusinessHours);

    // inside hours, off the 30-minute grid
    let r = engine.reserve(request(business, service, tuesday(), "10:10"), now()).await;
    assert_eq!(rejection(r), Rejection::InvalidSlotAlignment);
}

#[tokio::test]
async fn today_slots_before_now_are_past() {
    let (engine, _) = new_engine("reserve_today.wal");
    let (business, service) = barber(&engine).await;
    let at_two = date(2024, 6, 10).and_hms_opt(14, 0, 0).unwrap();

    let r = engine.reserve(request(business, service, date(2024, 6, 10), "14:00"), at_two).await;
    assert_eq!(rejection(r), Rejection::SlotInPast);
    engine
        .reserve(request(business, service, date(2024, 6, 10), "14:30"), at_two)
        .await
        .unwrap();
}

#[tokio::test]
async fn unknown_or_foreign_service_is_not_found() {
    let (engine, _) = new_engine("reserve_service.wal");
    let (business, _) = barber(&engine).await;
    let (_, other_service) = barber(&engine).await;

    let r = engine.reserve(request(business, Ulid::new(), tuesday(), "10:00"), now()).await;
    assert!(matches!(r, Err(EngineError::NotFound(_))));
    let r = engine.reserve(request(business, other_service, tuesday(), "10:00"), now()).await;
    assert!(matches!(r, Err(EngineError::NotFound(id)) if id == other_service));
    let r = engine.reserve(request(Ulid::new(), other_service, tuesday(), "10:00"), now()).await;
    assert!(matches!(r, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn reused_appointment_id_is_refused() {
    let (engine, _) = new_engine("reserve_dup_id.wal");
    let (business, service) = barber(&engine).await;
    let first = request(business, service, tuesday(), "10:00");
    let mut second = request(business, service, tuesday(), "11:00");
    second.id = first.id;
    engine.reserve(first, now()).await.unwrap();
    assert!(matches!(engine.reserve(second, now()).await, Err(EngineError::AlreadyExists(_))));
}

#[tokio::test]
async fn empty_customer_is_invalid() {
    let (engine, _) = new_engine("reserve_customer.wal");
    let (business, service) = barber(&engine).await;
    let mut req = request(business, service, tuesday(), "10:00");
    req.customer_id = String::new();
    assert!(matches!(engine.reserve(req, now()).await, Err(EngineError::InvalidInput(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservations_for_one_slot_have_one_winner() {
    let (engine, _) = new_engine("reserve_race.wal");
    let (business, service) = barber(&engine).await;
    let engine = Arc::new(engine);

    let n = 32;
    let mut handles = Vec::new();
    for i in 0..n {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            let mut req = request(business, service, tuesday(), "15:00");
            req.customer_id = format!("cust-{i}");
            eng.reserve(req, now()).await
        }));
    }

    let mut winners = 0;
    let mut taken = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => winners += 1,
            Err(EngineError::Rejected(Rejection::SlotAlreadyTaken)) => taken += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(taken, n - 1);

    let occ = engine.occupancy(business, tuesday(), tuesday()).await.unwrap();
    assert_eq!(occ.len(), 1);
    assert_eq!(
        engine.list_appointments(business, tuesday(), tuesday()).await.unwrap().len(),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservations_for_distinct_slots_all_succeed() {
    let (engine, _) = new_engine("reserve_distinct.wal");
    let (business, service) = barber(&engine).await;
    let engine = Arc::new(engine);

    let slots = ["09:00", "09:30", "10:00", "10:30", "11:00", "11:30", "13:00", "13:30"];
    let mut handles = Vec::new();
    for slot in slots {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.reserve(request(business, service, tuesday(), slot), now()).await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    let occ = engine.occupancy(business, tuesday(), tuesday()).await.unwrap();
    assert_eq!(occ.len(), slots.len());
}

#[tokio::test]
async fn dropped_reservation_commits_before_the_next_request() {
    let (engine, path) = new_engine("reserve_dropped.wal");
    let (business, service) = barber(&engine).await;

    // a single poll hands the event to the WAL, then the caller goes away
    let first = request(business, service, tuesday(), "10:00");
    let first_id = first.id;
    assert!(engine.reserve(first, now()).now_or_never().is_none());

    let second = request(business, service, tuesday(), "10:00");
    assert_eq!(rejection(engine.reserve(second, now()).await), Rejection::SlotAlreadyTaken);
    assert_eq!(
        engine.get_appointment(first_id).await.unwrap().status,
        AppointmentStatus::Pending
    );
    drop(engine);

    let engine2 = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    let ids: Vec<Ulid> = engine2
        .list_appointments(business, tuesday(), tuesday())
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.id)
        .collect();
    assert_eq!(ids, vec![first_id]);
}

#[tokio::test]
async fn dropped_cancellation_still_frees_the_slot() {
    let (engine, path) = new_engine("cancel_dropped.wal");
    let (business, service) = barber(&engine).await;
    let appt = engine
        .reserve(request(business, service, tuesday(), "10:00"), now())
        .await
        .unwrap();

    assert!(engine.cancel_appointment(appt.id).now_or_never().is_none());
    let again = assert_ok!(
        engine
            .reserve(request(business, service, tuesday(), "10:00"), now())
            .await
    );
    drop(engine);

    let engine2 = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    assert_eq!(
        engine2.get_appointment(appt.id).await.unwrap().status,
        AppointmentStatus::Cancelled
    );
    let occ = engine2.occupancy(business, tuesday(), tuesday()).await.unwrap();
    assert_eq!(occ.len(), 1);
    assert_eq!(engine2.get_appointment(again.id).await.unwrap().status, AppointmentStatus::Pending);
}

// ── Status machine ───────────────────────────────────────

#[tokio::test]
async fn cancel_frees_the_slot() {
    let (engine, _) = new_engine("cancel_frees.wal");
    let (business, service) = barber(&engine).await;
    let first = engine
        .reserve(request(business, service, tuesday(), "10:00"), now())
        .await
        .unwrap();

    let cancelled = engine.cancel_appointment(first.id).await.unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert!(engine.occupancy(business, tuesday(), tuesday()).await.unwrap().is_empty());

    engine
        .reserve(request(business, service, tuesday(), "10:00"), now())
        .await
        .unwrap();
    // the cancelled row is still listed
    assert_eq!(
        engine.list_appointments(business, tuesday(), tuesday()).await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn confirmed_appointments_cannot_be_cancelled() {
    let (engine, _) = new_engine("confirm_then_cancel.wal");
    let (business, service) = barber(&engine).await;
    let appt = engine
        .reserve(request(business, service, tuesday(), "10:00"), now())
        .await
        .unwrap();

    let confirmed = engine.confirm_appointment(appt.id).await.unwrap();
    assert_eq!(confirmed.status, AppointmentStatus::Confirmed);

    let err = engine.cancel_appointment(appt.id).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidTransition {
            current: AppointmentStatus::Confirmed,
            requested: AppointmentStatus::Cancelled,
            ..
        }
    ));
    assert!(matches!(
        engine.confirm_appointment(appt.id).await,
        Err(EngineError::InvalidTransition { .. })
    ));
    // still holds the slot
    let occ = engine.occupancy(business, tuesday(), tuesday()).await.unwrap();
    assert!(occ.is_occupied(tuesday(), t("10:00")));
}

#[tokio::test]
async fn cancelled_is_terminal() {
    let (engine, _) = new_engine("cancel_terminal.wal");
    let (business, service) = barber(&engine).await;
    let appt = engine
        .reserve(request(business, service, tuesday(), "10:00"), now())
        .await
        .unwrap();
    engine.cancel_appointment(appt.id).await.unwrap();
    assert!(matches!(
        engine.confirm_appointment(appt.id).await,
        Err(EngineError::InvalidTransition { .. })
    ));
    assert!(matches!(
        engine.cancel_appointment(appt.id).await,
        Err(EngineError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn unknown_appointment_is_not_found() {
    let (engine, _) = new_engine("unknown_appt.wal");
    assert!(matches!(
        engine.confirm_appointment(Ulid::new()).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Views ────────────────────────────────────────────────

#[tokio::test]
async fn month_view_marks_occupied_slots() {
    let (engine, _) = new_engine("month_view.wal");
    let (business, service) = barber(&engine).await;
    engine
        .reserve(request(business, service, tuesday(), "09:30"), now())
        .await
        .unwrap();

    let cells = engine.month_view(business, 2024, 6, now()).await.unwrap();
    assert_eq!(cells.len(), GRID_DAYS);
    let day = cells.iter().find(|c| c.date == tuesday()).unwrap();
    let state = |time: &str| day.slots.iter().find(|s| s.time == t(time)).unwrap().state;
    assert_eq!(state("09:30"), SlotState::Occupied);
    assert_eq!(state("09:00"), SlotState::Free);
    // 16 slots, one taken
    assert_eq!(day.free_slots(), 15);
}

#[tokio::test]
async fn month_view_rejects_bad_month() {
    let (engine, _) = new_engine("month_view_bad.wal");
    let (business, _) = barber(&engine).await;
    assert!(matches!(
        engine.month_view(business, 2024, 13, now()).await,
        Err(EngineError::InvalidInput(_))
    ));
    assert!(matches!(
        engine.month_view(Ulid::new(), 2024, 6, now()).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn day_slots_match_the_month_grid() {
    let (engine, _) = new_engine("day_slots.wal");
    let (business, service) = barber(&engine).await;
    engine
        .reserve(request(business, service, tuesday(), "16:00"), now())
        .await
        .unwrap();

    let day = engine.day_slots(business, tuesday(), now()).await.unwrap();
    let cells = engine.month_view(business, 2024, 6, now()).await.unwrap();
    let from_grid = cells.iter().find(|c| c.date == tuesday()).unwrap();
    assert_eq!(&day, from_grid);
}

#[tokio::test]
async fn query_windows_are_checked() {
    let (engine, _) = new_engine("windows.wal");
    let (business, _) = barber(&engine).await;
    assert!(matches!(
        engine.occupancy(business, date(2024, 6, 10), date(2024, 6, 1)).await,
        Err(EngineError::InvalidInput(_))
    ));
    assert!(matches!(
        engine.list_appointments(business, date(2024, 1, 1), date(2026, 1, 1)).await,
        Err(EngineError::LimitExceeded(_))
    ));
}

// ── Expiry ───────────────────────────────────────────────

#[tokio::test]
async fn stale_pending_appointments_are_collected() {
    let (engine, _) = new_engine("expiry.wal");
    let (business, service) = barber(&engine).await;
    let stale = engine
        .reserve(request(business, service, tuesday(), "09:00"), now())
        .await
        .unwrap();
    let confirmed = engine
        .reserve(request(business, service, tuesday(), "09:30"), now())
        .await
        .unwrap();
    engine.confirm_appointment(confirmed.id).await.unwrap();
    let later = now() + chrono::Duration::minutes(30);
    engine
        .reserve(request(business, service, tuesday(), "10:00"), later)
        .await
        .unwrap();

    let cutoff = now() + chrono::Duration::minutes(10);
    assert_eq!(engine.collect_expired_pending(cutoff), vec![stale.id]);
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn state_survives_replay() {
    let (engine, path) = new_engine("replay.wal");
    let (business, service) = barber(&engine).await;
    let kept = engine
        .reserve(request(business, service, tuesday(), "10:00"), now())
        .await
        .unwrap();
    engine.confirm_appointment(kept.id).await.unwrap();
    let dropped = engine
        .reserve(request(business, service, tuesday(), "11:00"), now())
        .await
        .unwrap();
    engine.cancel_appointment(dropped.id).await.unwrap();
    drop(engine);

    let engine2 = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    assert_eq!(engine2.get_business(business).await.unwrap().name, "Barber");
    assert!(engine2.weekly_schedule(business).await.unwrap().get(Weekday::Friday).is_open);
    assert_eq!(engine2.list_services(business).await.unwrap().len(), 1);
    assert_eq!(
        engine2.get_appointment(kept.id).await.unwrap().status,
        AppointmentStatus::Confirmed
    );
    assert_eq!(
        engine2.get_appointment(dropped.id).await.unwrap().status,
        AppointmentStatus::Cancelled
    );

    // the unique index is rebuilt too
    let r = engine2.reserve(request(business, service, tuesday(), "10:00"), now()).await;
    assert_eq!(rejection(r), Rejection::SlotAlreadyTaken);
    engine2
        .reserve(request(business, service, tuesday(), "11:00"), now())
        .await
        .unwrap();
}

#[tokio::test]
async fn group_commit_batches_concurrent_reservations() {
    let (engine, path) = new_engine("group_commit.wal");
    let (business, service) = barber(&engine).await;
    let engine = Arc::new(engine);

    let days = [date(2024, 6, 11), date(2024, 6, 12), date(2024, 6, 13), date(2024, 6, 14)];
    let mut handles = Vec::new();
    for day in days {
        for slot in ["09:00", "10:00", "11:00", "14:00", "15:00"] {
            let eng = engine.clone();
            handles.push(tokio::spawn(async move {
                eng.reserve(request(business, service, day, slot), now()).await
            }));
        }
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    drop(engine);

    let engine2 = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    let all = engine2
        .list_appointments(business, days[0], days[3])
        .await
        .unwrap();
    assert_eq!(all.len(), 20);
}

#[tokio::test]
async fn appends_are_counted_and_compaction_resets_them() {
    let (engine, _) = new_engine("compact_counter.wal");
    assert_eq!(engine.wal_appends_since_compact().await, 0);

    let (business, service) = barber(&engine).await;
    // create + 5 schedules + service
    assert_eq!(engine.wal_appends_since_compact().await, 7);
    engine
        .reserve(request(business, service, tuesday(), "10:00"), now())
        .await
        .unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 8);

    engine.compact_wal().await.unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 0);
}

#[tokio::test]
async fn compaction_keeps_live_state_and_drops_cancelled() {
    let (engine, path) = new_engine("compact_state.wal");
    let (business, service) = barber(&engine).await;
    for slot in ["09:00", "09:30", "10:00", "10:30"] {
        let appt = engine
            .reserve(request(business, service, tuesday(), slot), now())
            .await
            .unwrap();
        engine.cancel_appointment(appt.id).await.unwrap();
    }
    let confirmed = engine
        .reserve(request(business, service, tuesday(), "10:00"), now())
        .await
        .unwrap();
    engine.confirm_appointment(confirmed.id).await.unwrap();
    let pending = engine
        .reserve(request(business, service, tuesday(), "11:00"), now())
        .await
        .unwrap();

    let size_before = std::fs::metadata(&path).unwrap().len();
    engine.compact_wal().await.unwrap();
    let size_after = std::fs::metadata(&path).unwrap().len();
    assert!(size_after < size_before, "compacted WAL ({size_after}) should be smaller than {size_before}");

    // an append after compaction lands in the new file
    engine
        .reserve(request(business, service, tuesday(), "13:00"), now())
        .await
        .unwrap();
    drop(engine);

    let engine2 = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    let rows = engine2.list_appointments(business, tuesday(), tuesday()).await.unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|a| a.status.is_active()));
    assert_eq!(
        engine2.get_appointment(confirmed.id).await.unwrap().status,
        AppointmentStatus::Confirmed
    );
    assert_eq!(
        engine2.get_appointment(pending.id).await.unwrap().status,
        AppointmentStatus::Pending
    );
    let week = engine2.weekly_schedule(business).await.unwrap();
    assert_eq!(*week.get(Weekday::Monday), weekday_hours());
    assert!(!week.get(Weekday::Sunday).is_open);
}

#[tokio::test]
async fn compaction_prunes_cancelled_rows_in_memory_too() {
    let (engine, path) = new_engine("compact_prune.wal");
    let (business, service) = barber(&engine).await;
    let cancelled = engine
        .reserve(request(business, service, tuesday(), "10:00"), now())
        .await
        .unwrap();
    engine.cancel_appointment(cancelled.id).await.unwrap();
    let kept = engine
        .reserve(request(business, service, tuesday(), "11:00"), now())
        .await
        .unwrap();
    assert_ok!(engine.get_appointment(cancelled.id).await);

    engine.compact_wal().await.unwrap();
    let err = assert_err!(engine.get_appointment(cancelled.id).await);
    assert!(matches!(err, EngineError::NotFound(id) if id == cancelled.id));
    assert_eq!(engine.business_for_appointment(&cancelled.id), None);
    let live: Vec<Ulid> = engine
        .list_appointments(business, tuesday(), tuesday())
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.id)
        .collect();
    assert_eq!(live, vec![kept.id]);
    drop(engine);

    // a restart sees the same rows
    let engine2 = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    assert!(matches!(
        engine2.get_appointment(cancelled.id).await,
        Err(EngineError::NotFound(_))
    ));
    let replayed: Vec<Ulid> = engine2
        .list_appointments(business, tuesday(), tuesday())
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.id)
        .collect();
    assert_eq!(replayed, live);
}

#[tokio::test]
async fn deleted_business_stays_deleted_after_replay() {
    let (engine, path) = new_engine("delete_replay.wal");
    let (business, _) = barber(&engine).await;
    let (other, _) = barber(&engine).await;
    engine.delete_business(business).await.unwrap();
    drop(engine);

    let engine2 = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    let ids: Vec<Ulid> = engine2.list_businesses().await.into_iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![other]);
}

// ── Notifications ────────────────────────────────────────

#[tokio::test]
async fn subscribers_see_appointment_events() {
    let (engine, _) = new_engine("notify.wal");
    let (business, service) = barber(&engine).await;
    let mut rx = engine.notify.subscribe(business);

    let appt = engine
        .reserve(request(business, service, tuesday(), "10:00"), now())
        .await
        .unwrap();
    engine.cancel_appointment(appt.id).await.unwrap();

    assert!(matches!(rx.recv().await.unwrap(), Event::AppointmentReserved { id, .. } if id == appt.id));
    assert!(matches!(rx.recv().await.unwrap(), Event::AppointmentCancelled { id, .. } if id == appt.id));
}

#[tokio::test]
async fn rejected_reservations_are_not_published() {
    let (engine, _) = new_engine("notify_rejected.wal");
    let (business, service) = barber(&engine).await;
    let mut rx = engine.notify.subscribe(business);

    let _ = engine.reserve(request(business, service, tuesday(), "12:00"), now()).await;
    assert!(rx.try_recv().is_err());
}
