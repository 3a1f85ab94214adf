use chrono::{Datelike, Days, NaiveDate, NaiveDateTime};

use crate::model::*;

use super::occupancy::OccupancyIndex;
use super::slots::generate_slots;

/// Six Sunday-first weeks.
pub const GRID_DAYS: usize = 42;

/// First and last date of the month grid: from the Sunday on or before the
/// 1st, 42 days long. `None` for an invalid year/month.
pub fn grid_range(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let lead = u64::from(first.weekday().num_days_from_sunday());
    let start = first.checked_sub_days(Days::new(lead))?;
    let end = start.checked_add_days(Days::new(GRID_DAYS as u64 - 1))?;
    Some((start, end))
}

/// Build the navigable month view.
///
/// Pure: `now` is the caller's clock reading, never read here. Days before
/// `now.date()` are past and offer no slots; on `now.date()` itself any slot
/// starting at or before the current minute is marked past.
pub fn build_month(
    year: i32,
    month: u32,
    now: &NaiveDateTime,
    schedule: &WeeklySchedule,
    step_minutes: u16,
    occupancy: &OccupancyIndex,
) -> Option<Vec<DayCell>> {
    let (start, _) = grid_range(year, month)?;
    Some(
        start
            .iter_days()
            .take(GRID_DAYS)
            .map(|date| {
                let in_month = date.year() == year && date.month() == month;
                day_cell(date, in_month, now, schedule, step_minutes, occupancy)
            })
            .collect(),
    )
}

/// One day on its own, as the month view would render it.
pub fn build_day(
    date: NaiveDate,
    now: &NaiveDateTime,
    schedule: &WeeklySchedule,
    step_minutes: u16,
    occupancy: &OccupancyIndex,
) -> DayCell {
    day_cell(date, true, now, schedule, step_minutes, occupancy)
}

fn day_cell(
    date: NaiveDate,
    in_current_month: bool,
    now: &NaiveDateTime,
    schedule: &WeeklySchedule,
    step_minutes: u16,
    occupancy: &OccupancyIndex,
) -> DayCell {
    let today = now.date();
    let weekday = Weekday::of(date);
    let day = schedule.get(weekday);
    let is_past = date < today;
    let is_open_day = day.is_open && !is_past;

    let slots = if is_open_day {
        let current = TimeOfDay::of(now);
        let taken = occupancy.get(date);
        generate_slots(day, step_minutes)
            .into_iter()
            .map(|time| {
                let state = if date == today && time <= current {
                    SlotState::Past
                } else if taken.is_some_and(|t| t.contains(&time)) {
                    SlotState::Occupied
                } else {
                    SlotState::Free
                };
                TimeSlot { time, state }
            })
            .collect()
    } else {
        Vec::new()
    };

    DayCell {
        date,
        weekday,
        in_current_month,
        is_past,
        is_open_day,
        slots,
    }
}
