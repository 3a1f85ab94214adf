use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::clock::Clock;
use crate::engine::{Engine, EngineError};

const REAP_INTERVAL: Duration = Duration::from_secs(5);
const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Cancel every pending appointment older than `ttl`. Returns how many
/// were cancelled.
pub async fn reap_once(engine: &Engine, clock: &dyn Clock, ttl: chrono::Duration) -> usize {
    let cutoff = clock.now() - ttl;
    let mut reaped = 0;
    for id in engine.collect_expired_pending(cutoff) {
        match engine.cancel_appointment(id).await {
            Ok(_) => {
                reaped += 1;
                info!("cancelled stale pending appointment {id}");
            }
            // Confirmed or cancelled in the meantime
            Err(e @ (EngineError::InvalidTransition { .. } | EngineError::NotFound(_))) => {
                tracing::debug!("reaper skip {id}: {e}");
            }
            Err(e) => tracing::warn!("reaper failed to cancel {id}: {e}"),
        }
    }
    if reaped > 0 {
        metrics::counter!(crate::observability::APPOINTMENTS_EXPIRED_TOTAL).increment(reaped as u64);
    }
    reaped
}

/// Background task that frees slots held by abandoned pending appointments.
pub async fn run_reaper(engine: Arc<Engine>, clock: Arc<dyn Clock>, ttl: Duration) {
    let Ok(ttl) = chrono::Duration::from_std(ttl) else {
        tracing::error!("pending TTL out of range, reaper disabled");
        return;
    };
    let mut interval = tokio::time::interval(REAP_INTERVAL);
    loop {
        interval.tick().await;
        reap_once(&engine, clock.as_ref(), ttl).await;
    }
}

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::error!("WAL compaction failed: {e}"),
        }
    }
}
