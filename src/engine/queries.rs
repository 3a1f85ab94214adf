use chrono::{Datelike, NaiveDate, NaiveDateTime};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::calendar::{build_day, build_month, grid_range};
use super::occupancy::OccupancyIndex;
use super::{Engine, EngineError};

fn check_window(start: NaiveDate, end: NaiveDate) -> Result<(), EngineError> {
    if end < start {
        return Err(EngineError::InvalidInput(format!("date range {start}..{end} is reversed")));
    }
    if (end - start).num_days() > MAX_QUERY_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

impl Engine {
    pub async fn list_businesses(&self) -> Vec<BusinessInfo> {
        let shared: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(shared.len());
        for rs in shared {
            out.push(rs.read().await.info());
        }
        out.sort_by_key(|b| b.id);
        out
    }

    pub async fn get_business(&self, id: Ulid) -> Result<BusinessInfo, EngineError> {
        Ok(self.business_state(&id)?.read().await.info())
    }

    pub async fn weekly_schedule(&self, business_id: Ulid) -> Result<WeeklySchedule, EngineError> {
        Ok(self.business_state(&business_id)?.read().await.schedule)
    }

    /// Services ordered by name.
    pub async fn list_services(&self, business_id: Ulid) -> Result<Vec<ServiceInfo>, EngineError> {
        let rs = self.business_state(&business_id)?;
        let guard = rs.read().await;
        let mut services: Vec<ServiceInfo> = guard.services.values().cloned().collect();
        services.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(services)
    }

    /// Appointments of every status dated in `[start, end]`.
    pub async fn list_appointments(
        &self,
        business_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Appointment>, EngineError> {
        check_window(start, end)?;
        let rs = self.business_state(&business_id)?;
        let guard = rs.read().await;
        Ok(guard.appointments.in_range(start, end).into_iter().cloned().collect())
    }

    pub async fn get_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let business_id = self.business_for_appointment(&id).ok_or(EngineError::NotFound(id))?;
        let rs = self.business_state(&business_id)?;
        let guard = rs.read().await;
        guard.appointments.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Slots held by pending or confirmed appointments in `[start, end]`.
    pub async fn occupancy(
        &self,
        business_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<OccupancyIndex, EngineError> {
        check_window(start, end)?;
        let rs = self.business_state(&business_id)?;
        let guard = rs.read().await;
        Ok(guard.appointments.occupancy(start, end))
    }

    /// The 42-day month grid with slot states as of `now`.
    pub async fn month_view(
        &self,
        business_id: Ulid,
        year: i32,
        month: u32,
        now: NaiveDateTime,
    ) -> Result<Vec<DayCell>, EngineError> {
        if !(MIN_VALID_YEAR..=MAX_VALID_YEAR).contains(&year) {
            return Err(EngineError::InvalidInput(format!("year {year} out of range")));
        }
        let (start, end) =
            grid_range(year, month).ok_or_else(|| EngineError::InvalidInput(format!("invalid month {year}-{month}")))?;

        let rs = self.business_state(&business_id)?;
        let guard = rs.read().await;
        let occupancy = guard.appointments.occupancy(start, end);
        build_month(year, month, &now, &guard.schedule, guard.slot_step, &occupancy)
            .ok_or_else(|| EngineError::InvalidInput(format!("invalid month {year}-{month}")))
    }

    /// A single day as the month grid would show it.
    pub async fn day_slots(
        &self,
        business_id: Ulid,
        date: NaiveDate,
        now: NaiveDateTime,
    ) -> Result<DayCell, EngineError> {
        if !(MIN_VALID_YEAR..=MAX_VALID_YEAR).contains(&date.year()) {
            return Err(EngineError::InvalidInput(format!("date {date} out of range")));
        }
        let rs = self.business_state(&business_id)?;
        let guard = rs.read().await;
        let occupancy = guard.appointments.occupancy(date, date);
        Ok(build_day(date, &now, &guard.schedule, guard.slot_step, &occupancy))
    }
}
