use std::time::Instant;

use chrono::{Days, NaiveDate, NaiveDateTime};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::slots::is_slot_start;
use super::{Engine, EngineError, Rejection};

/// A customer's request for one slot.
#[derive(Debug, Clone)]
pub struct ReserveRequest {
    pub id: Ulid,
    pub business_id: Ulid,
    pub service_id: Ulid,
    pub date: NaiveDate,
    pub time: TimeOfDay,
    pub customer_id: String,
}

/// Checks that need no storage, in order; the first failure wins.
///
/// 1. the slot has already started (or the day is over),
/// 2. the time is outside opening hours or inside the lunch break,
/// 3. the time is not one of the generated slot starts for that weekday.
pub fn validate_slot(
    schedule: &WeeklySchedule,
    step_minutes: u16,
    date: NaiveDate,
    time: TimeOfDay,
    now: &NaiveDateTime,
) -> Result<(), Rejection> {
    let today = now.date();
    if date < today || (date == today && time <= TimeOfDay::of(now)) {
        return Err(Rejection::SlotInPast);
    }
    let day = schedule.for_date(date);
    if !day.within_hours(time) {
        return Err(Rejection::OutsideBusinessHours);
    }
    if !is_slot_start(day, step_minutes, time) {
        return Err(Rejection::InvalidSlotAlignment);
    }
    Ok(())
}

fn check_request(req: &ReserveRequest, now: &NaiveDateTime) -> Result<(), EngineError> {
    if req.customer_id.trim().is_empty() {
        return Err(EngineError::InvalidInput("customer_id must not be empty".into()));
    }
    if req.customer_id.len() > MAX_CUSTOMER_ID_LEN {
        return Err(EngineError::LimitExceeded("customer_id too long"));
    }
    let horizon = now
        .date()
        .checked_add_days(Days::new(MAX_BOOKING_HORIZON_DAYS as u64))
        .unwrap_or(NaiveDate::MAX);
    if req.date > horizon {
        return Err(EngineError::LimitExceeded("date beyond booking horizon"));
    }
    Ok(())
}

impl Engine {
    /// Reserve one slot for a customer.
    ///
    /// Either the appointment is durable in the WAL and holds the slot, or
    /// nothing changed. This holds even if the returned future is dropped
    /// part way. Losing a race for the slot is
    /// `Rejected(SlotAlreadyTaken)`; there is no retry and no substitute slot.
    pub async fn reserve(&self, req: ReserveRequest, now: NaiveDateTime) -> Result<Appointment, EngineError> {
        let started = Instant::now();
        let result = self.try_reserve(req, &now).await;
        metrics::histogram!(observability::RESERVE_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        let outcome = match &result {
            Ok(_) => "reserved",
            Err(EngineError::Rejected(r)) => r.reason(),
            Err(_) => "error",
        };
        metrics::counter!(observability::RESERVATIONS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn try_reserve(&self, req: ReserveRequest, now: &NaiveDateTime) -> Result<Appointment, EngineError> {
        check_request(&req, now)?;
        if self.appointment_to_business.contains_key(&req.id) {
            return Err(EngineError::AlreadyExists(req.id));
        }

        let rs = self.business_state(&req.business_id)?;
        let guard = rs.write_owned().await;

        if !guard.services.contains_key(&req.service_id) {
            return Err(EngineError::NotFound(req.service_id));
        }
        if guard.appointments.contains(&req.id) {
            return Err(EngineError::AlreadyExists(req.id));
        }
        if guard.appointments.active_count() >= MAX_APPOINTMENTS_PER_BUSINESS {
            return Err(EngineError::LimitExceeded("too many appointments for business"));
        }

        if let Err(rejection) = validate_slot(&guard.schedule, guard.slot_step, req.date, req.time, now) {
            tracing::debug!(
                business = %req.business_id,
                date = %req.date,
                time = %req.time,
                reason = rejection.reason(),
                "reservation rejected"
            );
            return Err(rejection.into());
        }

        // The unique index is the arbiter. The lookup and the commit happen under the
        // same write guard.
        if let Some(holder) = guard.appointments.holder(req.date, req.time) {
            tracing::debug!(
                business = %req.business_id,
                date = %req.date,
                time = %req.time,
                %holder,
                "slot already taken"
            );
            return Err(Rejection::SlotAlreadyTaken.into());
        }

        let event = Event::AppointmentReserved {
            id: req.id,
            business_id: req.business_id,
            service_id: req.service_id,
            date: req.date,
            time: req.time,
            customer_id: req.customer_id,
            created_at: *now,
        };
        let guard = self.persist_and_apply(guard, vec![event]).await?;

        let appointment = guard
            .appointments
            .get(&req.id)
            .cloned()
            .ok_or(EngineError::NotFound(req.id))?;
        tracing::info!(
            appointment = %appointment.id,
            business = %appointment.business_id,
            date = %appointment.date,
            time = %appointment.time,
            "appointment reserved"
        );
        Ok(appointment)
    }
}
