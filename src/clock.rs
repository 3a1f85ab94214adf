use chrono::{Local, NaiveDateTime};

/// Source of "now" in business-local wall-clock time.
///
/// The engine never reads the time itself; request handlers ask a clock
/// once and pass the reading down.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// The server's local time zone.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Always returns the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}
