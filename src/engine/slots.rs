use crate::model::{TimeOfDay, WeekdaySchedule};

// ── Slot Generation ──────────────────────────────────────────────

/// Candidate slot starts for one weekday, ascending.
///
/// Walks from `open_time` in `step_minutes` increments. A start `t` is emitted
/// when the whole slot fits before closing (`t + step <= close_time`) and `t`
/// is not inside the lunch break `[start, end)`. A slot starting exactly at the
/// end of lunch is valid; one starting at the beginning of lunch is not.
pub fn generate_slots(schedule: &WeekdaySchedule, step_minutes: u16) -> Vec<TimeOfDay> {
    if !schedule.is_open || step_minutes == 0 {
        return Vec::new();
    }
    let step = u32::from(step_minutes);
    let close = u32::from(schedule.close_time.minutes());

    let mut slots = Vec::new();
    let mut t = u32::from(schedule.open_time.minutes());
    while t + step <= close {
        // t < close < 1440, so the conversion cannot fail
        if let Some(start) = u16::try_from(t).ok().and_then(TimeOfDay::from_minutes)
            && !schedule.in_lunch(start)
        {
            slots.push(start);
        }
        t += step;
    }
    slots
}

/// True if `time` is one of the starts [`generate_slots`] produces.
pub fn is_slot_start(schedule: &WeekdaySchedule, step_minutes: u16, time: TimeOfDay) -> bool {
    generate_slots(schedule, step_minutes)
        .binary_search(&time)
        .is_ok()
}
