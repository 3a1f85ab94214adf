mod allocator;
mod calendar;
mod error;
mod mutations;
mod occupancy;
mod queries;
mod slots;
mod store;
#[cfg(test)]
mod tests;

pub use allocator::{ReserveRequest, validate_slot};
pub use calendar::{GRID_DAYS, build_day, build_month, grid_range};
pub use error::{EngineError, Rejection};
pub use occupancy::OccupancyIndex;
pub use slots::{generate_slots, is_slot_start};
pub use store::AppointmentStore;

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedBusinessState = Arc<RwLock<BusinessState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first Append, drains whatever else is already queued,
/// then issues a single fsync and answers every sender with the same result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                while let Ok(next) = rx.try_recv() {
                    match next {
                        WalCommand::Append { event, response } => batch.push((event, response)),
                        other => {
                            deferred = Some(other);
                            break;
                        }
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
    tracing::debug!("WAL writer stopped");
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!(error = %e, batch = batch.len(), "WAL flush failed");
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after a failed append so half-buffered bytes never ride
    // along with the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// Owner of every business, keyed by id.
///
/// Each business sits behind its own write lock; that lock is the scope in
/// which slot ownership is decided. Different businesses never contend.
///
/// Shared maps sit behind `Arc` so a commit can finish on its own task after
/// the caller stops waiting for it.
pub struct Engine {
    pub state: Arc<DashMap<Ulid, SharedBusinessState>>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Appointment id → business id.
    pub(super) appointment_to_business: Arc<DashMap<Ulid, Ulid>>,
    /// Service id → business id.
    pub(super) service_to_business: Arc<DashMap<Ulid, Ulid>>,
    /// Serializes business creation/deletion against compaction snapshots.
    pub(super) catalog: Arc<Mutex<()>>,
}

/// Write an event through the group-commit writer and wait for its fsync.
pub(super) async fn append_event(wal_tx: &mpsc::Sender<WalCommand>, event: &Event) -> Result<(), EngineError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append {
            event: event.clone(),
            response: tx,
        })
        .await
        .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
        .map_err(|e| EngineError::WalError(e.to_string()))
}

/// Run a commit on its own task. Dropping the returned future does not stop
/// the commit: once an event is handed to the WAL it is also applied.
pub(super) async fn run_detached<T, F>(commit: F) -> Result<T, EngineError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, EngineError>> + Send + 'static,
{
    tokio::spawn(commit)
        .await
        .map_err(|e| EngineError::WalError(format!("commit task failed: {e}")))?
}

/// Apply an event to a business (caller holds the write lock).
fn apply_to_business(
    bs: &mut BusinessState,
    event: &Event,
    appointment_map: &DashMap<Ulid, Ulid>,
    service_map: &DashMap<Ulid, Ulid>,
) {
    match event {
        Event::ScheduleSet { weekday, schedule, .. } => {
            bs.schedule.set(*weekday, *schedule);
        }
        Event::ServiceAdded {
            id,
            business_id,
            name,
            duration_minutes,
        } => {
            bs.services.insert(
                *id,
                ServiceInfo {
                    id: *id,
                    business_id: *business_id,
                    name: name.clone(),
                    duration_minutes: *duration_minutes,
                },
            );
            service_map.insert(*id, *business_id);
        }
        Event::ServiceRemoved { id, .. } => {
            bs.services.remove(id);
            service_map.remove(id);
        }
        Event::AppointmentReserved {
            id,
            business_id,
            service_id,
            date,
            time,
            customer_id,
            created_at,
        } => {
            let appointment = Appointment {
                id: *id,
                business_id: *business_id,
                service_id: *service_id,
                date: *date,
                time: *time,
                customer_id: customer_id.clone(),
                status: AppointmentStatus::Pending,
                created_at: *created_at,
            };
            match bs.appointments.insert(appointment) {
                Ok(()) => {
                    appointment_map.insert(*id, *business_id);
                }
                Err(holder) => {
                    tracing::warn!(
                        appointment = %id,
                        %holder,
                        %date,
                        %time,
                        "skipping reservation of a slot that is already held"
                    );
                }
            }
        }
        Event::AppointmentConfirmed { id, .. } => {
            bs.appointments.set_status(id, AppointmentStatus::Confirmed);
        }
        Event::AppointmentCancelled { id, .. } => {
            bs.appointments.set_status(id, AppointmentStatus::Cancelled);
        }
        // Creation and deletion are handled at the map level.
        Event::BusinessCreated { .. } | Event::BusinessDeleted { .. } => {}
    }
}

impl Engine {
    /// Replay the WAL at `wal_path` and start the group-commit writer.
    /// Must be called inside a tokio runtime.
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let (events, wal) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let appointment_to_business = Arc::new(DashMap::new());
        let service_to_business = Arc::new(DashMap::new());

        // Rebuild plain state first; nothing else can see it yet.
        let mut businesses: HashMap<Ulid, BusinessState> = HashMap::new();
        for event in &events {
            match event {
                Event::BusinessCreated { id, name, slot_step } => {
                    businesses.insert(*id, BusinessState::new(*id, name.clone(), *slot_step));
                }
                Event::BusinessDeleted { id } => {
                    if let Some(bs) = businesses.remove(id) {
                        forget_children(&bs, &appointment_to_business, &service_to_business);
                    }
                }
                other => match businesses.get_mut(&other.business_id()) {
                    Some(bs) => apply_to_business(bs, other, &appointment_to_business, &service_to_business),
                    None => tracing::warn!(business = %other.business_id(), "replay: event for unknown business"),
                },
            }
        }

        tracing::info!(
            path = %wal_path.display(),
            events = events.len(),
            businesses = businesses.len(),
            "WAL replayed"
        );
        metrics::gauge!(crate::observability::BUSINESSES_ACTIVE).set(businesses.len() as f64);

        let state = Arc::new(DashMap::new());
        for (id, bs) in businesses {
            state.insert(id, Arc::new(RwLock::new(bs)));
        }

        Ok(Self {
            state,
            wal_tx,
            notify,
            appointment_to_business,
            service_to_business,
            catalog: Arc::new(Mutex::new(())),
        })
    }

    pub fn get_business_state(&self, id: &Ulid) -> Option<SharedBusinessState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub(super) fn business_state(&self, id: &Ulid) -> Result<SharedBusinessState, EngineError> {
        self.get_business_state(id).ok_or(EngineError::NotFound(*id))
    }

    pub fn business_for_appointment(&self, appointment_id: &Ulid) -> Option<Ulid> {
        self.appointment_to_business.get(appointment_id).map(|e| *e.value())
    }

    pub fn business_for_service(&self, service_id: &Ulid) -> Option<Ulid> {
        self.service_to_business.get(service_id).map(|e| *e.value())
    }

    /// WAL-append, apply, notify, for each event in order. The write guard
    /// moves into a detached commit and comes back once every event is
    /// durable and applied, so nothing is applied unless it is durable and
    /// nothing durable is left unapplied.
    pub(super) async fn persist_and_apply(
        &self,
        mut guard: OwnedRwLockWriteGuard<BusinessState>,
        events: Vec<Event>,
    ) -> Result<OwnedRwLockWriteGuard<BusinessState>, EngineError> {
        let wal_tx = self.wal_tx.clone();
        let notify = self.notify.clone();
        let appointment_map = self.appointment_to_business.clone();
        let service_map = self.service_to_business.clone();
        run_detached(async move {
            for event in &events {
                append_event(&wal_tx, event).await?;
                apply_to_business(&mut guard, event, &appointment_map, &service_map);
                notify.send(guard.id, event);
            }
            Ok(guard)
        })
        .await
    }

    /// Appointment → business, then take that business's write lock.
    pub(super) async fn resolve_appointment_write(
        &self,
        appointment_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<BusinessState>, EngineError> {
        let business_id = self
            .business_for_appointment(appointment_id)
            .ok_or(EngineError::NotFound(*appointment_id))?;
        let guard = self.business_state(&business_id)?.write_owned().await;
        if !guard.appointments.contains(appointment_id) {
            return Err(EngineError::NotFound(*appointment_id));
        }
        Ok(guard)
    }

    /// Service → business, then take that business's write lock.
    pub(super) async fn resolve_service_write(
        &self,
        service_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<BusinessState>, EngineError> {
        let business_id = self
            .business_for_service(service_id)
            .ok_or(EngineError::NotFound(*service_id))?;
        let guard = self.business_state(&business_id)?.write_owned().await;
        if !guard.services.contains_key(service_id) {
            return Err(EngineError::NotFound(*service_id));
        }
        Ok(guard)
    }
}

/// Drop reverse-index entries owned by a business that is going away.
fn forget_children(
    bs: &BusinessState,
    appointment_map: &DashMap<Ulid, Ulid>,
    service_map: &DashMap<Ulid, Ulid>,
) {
    for appointment in bs.appointments.iter() {
        appointment_map.remove(&appointment.id);
    }
    for id in bs.services.keys() {
        service_map.remove(id);
    }
}
