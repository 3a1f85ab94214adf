use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};

use chrono::{NaiveDate, NaiveDateTime};
use ulid::Ulid;

use crate::model::*;

use super::occupancy::OccupancyIndex;

/// Appointment rows of one business plus the unique index that arbitrates
/// slot ownership.
///
/// The index holds exactly the active (pending or confirmed) rows keyed by
/// `(date, time)`, so a second active row for the same slot cannot be
/// inserted. Cancelled rows leave the index at once and stay in `rows` until
/// [`AppointmentStore::prune_cancelled`] drops them.
#[derive(Debug, Default)]
pub struct AppointmentStore {
    rows: HashMap<Ulid, Appointment>,
    active: BTreeMap<(NaiveDate, TimeOfDay), Ulid>,
}

impl AppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn has_active(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn contains(&self, id: &Ulid) -> bool {
        self.rows.contains_key(id)
    }

    pub fn get(&self, id: &Ulid) -> Option<&Appointment> {
        self.rows.get(id)
    }

    /// The active appointment holding `(date, time)`, if any.
    pub fn holder(&self, date: NaiveDate, time: TimeOfDay) -> Option<Ulid> {
        self.active.get(&(date, time)).copied()
    }

    /// Insert-if-absent. An active row whose slot is already held is refused
    /// with the holder's id and the store is left untouched.
    pub fn insert(&mut self, appointment: Appointment) -> Result<(), Ulid> {
        if appointment.status.is_active() {
            match self.active.entry((appointment.date, appointment.time)) {
                Entry::Occupied(held) => return Err(*held.get()),
                Entry::Vacant(slot) => {
                    slot.insert(appointment.id);
                }
            }
        }
        self.rows.insert(appointment.id, appointment);
        Ok(())
    }

    /// Overwrite a row's status, keeping the unique index in step. Returns
    /// the previous status. Transition rules are the caller's business.
    pub fn set_status(&mut self, id: &Ulid, status: AppointmentStatus) -> Option<AppointmentStatus> {
        let row = self.rows.get_mut(id)?;
        let previous = row.status;
        row.status = status;
        let key = (row.date, row.time);
        if previous.is_active() && !status.is_active() && self.active.get(&key) == Some(id) {
            self.active.remove(&key);
        }
        Some(previous)
    }

    /// Taken slots on dates in `[start, end]`.
    pub fn occupancy(&self, start: NaiveDate, end: NaiveDate) -> OccupancyIndex {
        self.active
            .range((start, TimeOfDay::MIDNIGHT)..)
            .take_while(|((date, _), _)| *date <= end)
            .map(|(key, _)| *key)
            .collect()
    }

    /// All rows (any status) dated in `[start, end]`, ordered by date then time.
    pub fn in_range(&self, start: NaiveDate, end: NaiveDate) -> Vec<&Appointment> {
        let mut rows: Vec<&Appointment> = self
            .rows
            .values()
            .filter(|a| a.date >= start && a.date <= end)
            .collect();
        rows.sort_by_key(|a| (a.date, a.time, a.id));
        rows
    }

    pub fn iter(&self) -> impl Iterator<Item = &Appointment> {
        self.rows.values()
    }

    /// Remove every cancelled row and return the removed ids.
    pub fn prune_cancelled(&mut self) -> Vec<Ulid> {
        let cancelled: Vec<Ulid> = self
            .rows
            .values()
            .filter(|a| a.status == AppointmentStatus::Cancelled)
            .map(|a| a.id)
            .collect();
        for id in &cancelled {
            self.rows.remove(id);
        }
        cancelled
    }

    /// Pending rows created strictly before `cutoff`.
    pub fn pending_created_before(&self, cutoff: NaiveDateTime) -> Vec<Ulid> {
        self.rows
            .values()
            .filter(|a| a.status == AppointmentStatus::Pending && a.created_at < cutoff)
            .map(|a| a.id)
            .collect()
    }
}
