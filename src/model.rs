use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::AppointmentStore;

pub const MINUTES_PER_DAY: u16 = 24 * 60;

/// Minutes since local midnight, in `0..1440`. Every time of day in the
/// crate uses this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub const MIDNIGHT: TimeOfDay = TimeOfDay(0);

    pub fn from_minutes(minutes: u16) -> Option<Self> {
        (minutes < MINUTES_PER_DAY).then_some(Self(minutes))
    }

    pub fn hm(hour: u16, minute: u16) -> Option<Self> {
        if minute >= 60 {
            return None;
        }
        Self::from_minutes(hour.checked_mul(60)?.checked_add(minute)?)
    }

    /// Time-of-day of `at`, truncated to the minute.
    pub fn of(at: &NaiveDateTime) -> Self {
        // hour < 24 and minute < 60, so this is always < 1440
        Self((at.hour() * 60 + at.minute()) as u16)
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    pub fn hour(self) -> u16 {
        self.0 / 60
    }

    pub fn minute(self) -> u16 {
        self.0 % 60
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("bad time of day {0:?} (expected HH:MM)")]
pub struct TimeParseError(pub String);

impl FromStr for TimeOfDay {
    type Err = TimeParseError;

    /// Accepts `HH:MM` and `HH:MM:00`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || TimeParseError(s.to_string());
        let mut parts = s.trim().split(':');
        let hour: u16 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
        let minute: u16 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
        match parts.next() {
            None => {}
            Some(sec) if sec.parse::<u16>().ok() == Some(0) => {}
            Some(_) => return Err(bad()),
        }
        if parts.next().is_some() {
            return Err(bad());
        }
        Self::hm(hour, minute).ok_or_else(bad)
    }
}

/// Day of week, Sunday-first to match the calendar grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Weekday {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl Weekday {
    pub const ALL: [Weekday; 7] = [
        Weekday::Sunday,
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
    ];

    /// 0 = Sunday … 6 = Saturday.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn of(date: NaiveDate) -> Self {
        Self::ALL[date.weekday().num_days_from_sunday() as usize]
    }
}

/// Half-open interval `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl TimeRange {
    pub fn contains(&self, t: TimeOfDay) -> bool {
        self.start <= t && t < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("opening time {open} must be before closing time {close}")]
    OpenNotBeforeClose { open: TimeOfDay, close: TimeOfDay },
    #[error("lunch break [{start}, {end}) is empty")]
    EmptyLunch { start: TimeOfDay, end: TimeOfDay },
    #[error("lunch break [{start}, {end}) falls outside opening hours")]
    LunchOutsideHours { start: TimeOfDay, end: TimeOfDay },
}

/// Working hours for a single weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekdaySchedule {
    pub is_open: bool,
    pub open_time: TimeOfDay,
    pub close_time: TimeOfDay,
    pub lunch: Option<TimeRange>,
}

impl WeekdaySchedule {
    pub fn closed() -> Self {
        Self {
            is_open: false,
            open_time: TimeOfDay::MIDNIGHT,
            close_time: TimeOfDay::MIDNIGHT,
            lunch: None,
        }
    }

    pub fn open(open_time: TimeOfDay, close_time: TimeOfDay) -> Self {
        Self {
            is_open: true,
            open_time,
            close_time,
            lunch: None,
        }
    }

    pub fn with_lunch(mut self, start: TimeOfDay, end: TimeOfDay) -> Self {
        self.lunch = Some(TimeRange { start, end });
        self
    }

    /// Closed days are always valid, whatever their times say.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        if !self.is_open {
            return Ok(());
        }
        if self.open_time >= self.close_time {
            return Err(ScheduleError::OpenNotBeforeClose {
                open: self.open_time,
                close: self.close_time,
            });
        }
        if let Some(TimeRange { start, end }) = self.lunch {
            if start >= end {
                return Err(ScheduleError::EmptyLunch { start, end });
            }
            if start < self.open_time || end > self.close_time {
                return Err(ScheduleError::LunchOutsideHours { start, end });
            }
        }
        Ok(())
    }

    pub fn in_lunch(&self, t: TimeOfDay) -> bool {
        self.lunch.is_some_and(|l| l.contains(t))
    }

    /// Open, inside `[open, close)` and outside the lunch break.
    pub fn within_hours(&self, t: TimeOfDay) -> bool {
        self.is_open && self.open_time <= t && t < self.close_time && !self.in_lunch(t)
    }
}

/// One schedule per weekday; an unconfigured weekday cannot exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklySchedule {
    days: [WeekdaySchedule; 7],
}

impl Default for WeeklySchedule {
    fn default() -> Self {
        Self {
            days: [WeekdaySchedule::closed(); 7],
        }
    }
}

impl WeeklySchedule {
    pub fn get(&self, weekday: Weekday) -> &WeekdaySchedule {
        &self.days[weekday.index()]
    }

    pub fn set(&mut self, weekday: Weekday, schedule: WeekdaySchedule) {
        self.days[weekday.index()] = schedule;
    }

    pub fn for_date(&self, date: NaiveDate) -> &WeekdaySchedule {
        self.get(Weekday::of(date))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Weekday, &WeekdaySchedule)> {
        Weekday::ALL.into_iter().zip(self.days.iter())
    }
}

/// Derived availability of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    Free,
    Occupied,
    Past,
}

impl SlotState {
    pub fn as_str(self) -> &'static str {
        match self {
            SlotState::Free => "free",
            SlotState::Occupied => "occupied",
            SlotState::Past => "past",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSlot {
    pub time: TimeOfDay,
    pub state: SlotState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayCell {
    pub date: NaiveDate,
    pub weekday: Weekday,
    pub in_current_month: bool,
    pub is_past: bool,
    pub is_open_day: bool,
    pub slots: Vec<TimeSlot>,
}

impl DayCell {
    pub fn free_slots(&self) -> usize {
        self.slots.iter().filter(|s| s.state == SlotState::Free).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl AppointmentStatus {
    /// `Pending → Confirmed` and `Pending → Cancelled` are the only moves.
    pub fn can_transition_to(self, next: AppointmentStatus) -> bool {
        matches!(
            (self, next),
            (AppointmentStatus::Pending, AppointmentStatus::Confirmed)
                | (AppointmentStatus::Pending, AppointmentStatus::Cancelled)
        )
    }

    /// Active appointments hold their slot.
    pub fn is_active(self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub business_id: Ulid,
    pub service_id: Ulid,
    pub date: NaiveDate,
    pub time: TimeOfDay,
    pub customer_id: String,
    pub status: AppointmentStatus,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub id: Ulid,
    pub business_id: Ulid,
    pub name: String,
    pub duration_minutes: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessInfo {
    pub id: Ulid,
    pub name: String,
    pub slot_step: u16,
}

/// Everything the engine knows about one business. Guarded by one lock.
#[derive(Debug)]
pub struct BusinessState {
    pub id: Ulid,
    pub name: String,
    /// Slot length and spacing in minutes.
    pub slot_step: u16,
    pub schedule: WeeklySchedule,
    pub services: HashMap<Ulid, ServiceInfo>,
    pub appointments: AppointmentStore,
}

impl BusinessState {
    pub fn new(id: Ulid, name: String, slot_step: u16) -> Self {
        Self {
            id,
            name,
            slot_step,
            schedule: WeeklySchedule::default(),
            services: HashMap::new(),
            appointments: AppointmentStore::new(),
        }
    }

    pub fn info(&self) -> BusinessInfo {
        BusinessInfo {
            id: self.id,
            name: self.name.clone(),
            slot_step: self.slot_step,
        }
    }
}

/// The event types. They are flat, with no nesting, and form the WAL record
/// format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BusinessCreated {
        id: Ulid,
        name: String,
        slot_step: u16,
    },
    BusinessDeleted {
        id: Ulid,
    },
    ScheduleSet {
        business_id: Ulid,
        weekday: Weekday,
        schedule: WeekdaySchedule,
    },
    ServiceAdded {
        id: Ulid,
        business_id: Ulid,
        name: String,
        duration_minutes: u16,
    },
    ServiceRemoved {
        id: Ulid,
        business_id: Ulid,
    },
    AppointmentReserved {
        id: Ulid,
        business_id: Ulid,
        service_id: Ulid,
        date: NaiveDate,
        time: TimeOfDay,
        customer_id: String,
        created_at: NaiveDateTime,
    },
    AppointmentConfirmed {
        id: Ulid,
        business_id: Ulid,
    },
    AppointmentCancelled {
        id: Ulid,
        business_id: Ulid,
    },
}

impl Event {
    /// The business an event belongs to.
    pub fn business_id(&self) -> Ulid {
        match self {
            Event::BusinessCreated { id, .. } | Event::BusinessDeleted { id } => *id,
            Event::ScheduleSet { business_id, .. }
            | Event::ServiceAdded { business_id, .. }
            | Event::ServiceRemoved { business_id, .. }
            | Event::AppointmentReserved { business_id, .. }
            | Event::AppointmentConfirmed { business_id, .. }
            | Event::AppointmentCancelled { business_id, .. } => *business_id,
        }
    }
}
