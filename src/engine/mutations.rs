use std::sync::Arc;

use chrono::NaiveDateTime;
use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::{Engine, EngineError, WalCommand, append_event, forget_children, run_detached};

fn check_name(name: &str, what: &'static str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::InvalidInput(format!("{what} must not be empty")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

impl Engine {
    pub async fn create_business(&self, id: Ulid, name: String, slot_step: u16) -> Result<(), EngineError> {
        check_name(&name, "business name")?;
        if !(MIN_SLOT_STEP_MINUTES..=MAX_SLOT_STEP_MINUTES).contains(&slot_step) {
            return Err(EngineError::InvalidInput(format!(
                "slot_step must be between {MIN_SLOT_STEP_MINUTES} and {MAX_SLOT_STEP_MINUTES} minutes"
            )));
        }

        let catalog = self.catalog.clone().lock_owned().await;
        if self.state.len() >= MAX_BUSINESSES {
            return Err(EngineError::LimitExceeded("too many businesses"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::BusinessCreated {
            id,
            name: name.clone(),
            slot_step,
        };
        let wal_tx = self.wal_tx.clone();
        let state = self.state.clone();
        let notify = self.notify.clone();
        run_detached(async move {
            let _catalog = catalog;
            append_event(&wal_tx, &event).await?;
            state.insert(id, Arc::new(RwLock::new(BusinessState::new(id, name, slot_step))));
            notify.send(id, &event);
            metrics::gauge!(observability::BUSINESSES_ACTIVE).set(state.len() as f64);
            Ok(())
        })
        .await?;
        tracing::info!(business = %id, slot_step, "business created");
        Ok(())
    }

    /// Refused while any pending or confirmed appointment exists.
    pub async fn delete_business(&self, id: Ulid) -> Result<(), EngineError> {
        let catalog = self.catalog.clone().lock_owned().await;
        let rs = self.business_state(&id)?;
        let guard = rs.write_owned().await;
        if guard.appointments.has_active() {
            return Err(EngineError::HasActiveAppointments(id));
        }

        let event = Event::BusinessDeleted { id };
        let wal_tx = self.wal_tx.clone();
        let state = self.state.clone();
        let notify = self.notify.clone();
        let appointment_map = self.appointment_to_business.clone();
        let service_map = self.service_to_business.clone();
        run_detached(async move {
            let _catalog = catalog;
            append_event(&wal_tx, &event).await?;
            forget_children(&guard, &appointment_map, &service_map);
            state.remove(&id);
            drop(guard);

            notify.send(id, &event);
            notify.remove(&id);
            metrics::gauge!(observability::BUSINESSES_ACTIVE).set(state.len() as f64);
            Ok(())
        })
        .await?;
        tracing::info!(business = %id, "business deleted");
        Ok(())
    }

    pub async fn set_schedule(
        &self,
        business_id: Ulid,
        weekday: Weekday,
        schedule: WeekdaySchedule,
    ) -> Result<(), EngineError> {
        self.set_schedules(business_id, vec![(weekday, schedule)]).await
    }

    /// Replace several weekday schedules under one lock. Every row is
    /// validated before the first one is written.
    pub async fn set_schedules(
        &self,
        business_id: Ulid,
        days: Vec<(Weekday, WeekdaySchedule)>,
    ) -> Result<(), EngineError> {
        if days.is_empty() {
            return Ok(());
        }
        if days.len() > Weekday::ALL.len() {
            return Err(EngineError::LimitExceeded("more schedule rows than weekdays"));
        }
        for (i, (weekday, schedule)) in days.iter().enumerate() {
            schedule.validate()?;
            if days[..i].iter().any(|(w, _)| w == weekday) {
                return Err(EngineError::InvalidInput(format!("weekday {weekday:?} given twice")));
            }
        }

        let events = days
            .into_iter()
            .map(|(weekday, schedule)| Event::ScheduleSet {
                business_id,
                weekday,
                schedule,
            })
            .collect();
        let rs = self.business_state(&business_id)?;
        let guard = rs.write_owned().await;
        self.persist_and_apply(guard, events).await?;
        tracing::info!(business = %business_id, "schedule updated");
        Ok(())
    }

    pub async fn add_service(
        &self,
        id: Ulid,
        business_id: Ulid,
        name: String,
        duration_minutes: u16,
    ) -> Result<(), EngineError> {
        check_name(&name, "service name")?;
        if duration_minutes == 0 || duration_minutes > MAX_SERVICE_DURATION_MINUTES {
            return Err(EngineError::InvalidInput(format!(
                "duration must be between 1 and {MAX_SERVICE_DURATION_MINUTES} minutes"
            )));
        }
        if self.service_to_business.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let rs = self.business_state(&business_id)?;
        let guard = rs.write_owned().await;
        if guard.services.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if guard.services.len() >= MAX_SERVICES_PER_BUSINESS {
            return Err(EngineError::LimitExceeded("too many services for business"));
        }

        let event = Event::ServiceAdded {
            id,
            business_id,
            name,
            duration_minutes,
        };
        self.persist_and_apply(guard, vec![event]).await?;
        Ok(())
    }

    /// Returns the owning business. Existing appointments keep their service id.
    pub async fn remove_service(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let guard = self.resolve_service_write(&id).await?;
        let business_id = guard.id;
        let event = Event::ServiceRemoved { id, business_id };
        self.persist_and_apply(guard, vec![event]).await?;
        Ok(business_id)
    }

    /// `Pending → Confirmed`.
    pub async fn confirm_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        self.transition(id, AppointmentStatus::Confirmed).await
    }

    /// `Pending → Cancelled`. Frees the slot.
    pub async fn cancel_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        self.transition(id, AppointmentStatus::Cancelled).await
    }

    async fn transition(&self, id: Ulid, requested: AppointmentStatus) -> Result<Appointment, EngineError> {
        let guard = self.resolve_appointment_write(&id).await?;
        let business_id = guard.id;
        let current = guard
            .appointments
            .get(&id)
            .map(|a| a.status)
            .ok_or(EngineError::NotFound(id))?;
        if !current.can_transition_to(requested) {
            return Err(EngineError::InvalidTransition { id, current, requested });
        }

        let event = match requested {
            AppointmentStatus::Confirmed => Event::AppointmentConfirmed { id, business_id },
            AppointmentStatus::Cancelled => Event::AppointmentCancelled { id, business_id },
            AppointmentStatus::Pending => return Err(EngineError::InvalidTransition { id, current, requested }),
        };
        let guard = self.persist_and_apply(guard, vec![event]).await?;
        tracing::info!(appointment = %id, business = %business_id, status = requested.as_str(), "appointment updated");

        guard.appointments.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Pending appointments created before `cutoff`, across all businesses.
    /// Businesses whose lock is busy are skipped until the next sweep.
    pub fn collect_expired_pending(&self, cutoff: NaiveDateTime) -> Vec<Ulid> {
        let mut expired = Vec::new();
        for entry in self.state.iter() {
            if let Ok(guard) = entry.value().try_read() {
                expired.extend(guard.appointments.pending_created_before(cutoff));
            }
        }
        expired
    }

    /// Rewrite the WAL with only the events needed to recreate the current
    /// state, then drop cancelled appointments from memory as well.
    ///
    /// Every business is write-locked until the new file is in place and the
    /// pruning is done, so no append can slip between the snapshot and the
    /// swap, and no reader sees a row the file no longer has.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let catalog = self.catalog.clone().lock_owned().await;

        let mut ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        ids.sort();

        let mut guards = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(rs) = self.get_business_state(id) {
                guards.push(rs.write_owned().await);
            }
        }

        let mut events = Vec::new();
        for bs in &guards {
            snapshot_business(bs, &mut events);
        }
        let count = events.len();

        let wal_tx = self.wal_tx.clone();
        let appointment_map = self.appointment_to_business.clone();
        let (businesses, pruned) = run_detached(async move {
            let _catalog = catalog;
            let (tx, rx) = oneshot::channel();
            wal_tx
                .send(WalCommand::Compact { events, response: tx })
                .await
                .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
            rx.await
                .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
                .map_err(|e| EngineError::WalError(e.to_string()))?;

            let mut pruned = 0usize;
            for guard in &mut guards {
                for id in guard.appointments.prune_cancelled() {
                    appointment_map.remove(&id);
                    pruned += 1;
                }
            }
            Ok((guards.len(), pruned))
        })
        .await?;

        tracing::info!(businesses, events = count, pruned, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn snapshot_business(bs: &BusinessState, events: &mut Vec<Event>) {
    events.push(Event::BusinessCreated {
        id: bs.id,
        name: bs.name.clone(),
        slot_step: bs.slot_step,
    });
    for (weekday, schedule) in bs.schedule.iter() {
        if *schedule != WeekdaySchedule::closed() {
            events.push(Event::ScheduleSet {
                business_id: bs.id,
                weekday,
                schedule: *schedule,
            });
        }
    }

    let mut services: Vec<&ServiceInfo> = bs.services.values().collect();
    services.sort_by_key(|s| s.id);
    for service in services {
        events.push(Event::ServiceAdded {
            id: service.id,
            business_id: bs.id,
            name: service.name.clone(),
            duration_minutes: service.duration_minutes,
        });
    }

    let mut active: Vec<&Appointment> = bs.appointments.iter().filter(|a| a.status.is_active()).collect();
    active.sort_by_key(|a| (a.date, a.time));
    for a in active {
        events.push(Event::AppointmentReserved {
            id: a.id,
            business_id: bs.id,
            service_id: a.service_id,
            date: a.date,
            time: a.time,
            customer_id: a.customer_id.clone(),
            created_at: a.created_at,
        });
        if a.status == AppointmentStatus::Confirmed {
            events.push(Event::AppointmentConfirmed {
                id: a.id,
                business_id: bs.id,
            });
        }
    }
}
