use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;

use crate::model::TimeOfDay;

/// Taken slot starts per date, for active (pending or confirmed) appointments.
///
/// A snapshot for rendering only: it can be stale the moment it is returned.
/// Whether a reservation succeeds is decided by the appointment store alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OccupancyIndex {
    by_date: BTreeMap<NaiveDate, BTreeSet<TimeOfDay>>,
}

impl OccupancyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, date: NaiveDate, time: TimeOfDay) {
        self.by_date.entry(date).or_default().insert(time);
    }

    pub fn get(&self, date: NaiveDate) -> Option<&BTreeSet<TimeOfDay>> {
        self.by_date.get(&date)
    }

    pub fn is_occupied(&self, date: NaiveDate, time: TimeOfDay) -> bool {
        self.by_date.get(&date).is_some_and(|taken| taken.contains(&time))
    }

    /// Total taken slots across all dates.
    pub fn len(&self) -> usize {
        self.by_date.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_date.is_empty()
    }

    /// `(date, time)` pairs in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, TimeOfDay)> + '_ {
        self.by_date
            .iter()
            .flat_map(|(date, taken)| taken.iter().map(move |t| (*date, *t)))
    }
}

impl FromIterator<(NaiveDate, TimeOfDay)> for OccupancyIndex {
    fn from_iter<I: IntoIterator<Item = (NaiveDate, TimeOfDay)>>(iter: I) -> Self {
        let mut index = Self::new();
        for (date, time) in iter {
            index.insert(date, time);
        }
        index
    }
}
