//! Periodic sweeps reconciling in-memory session state with the persisted
//! records. Each sweep body is a plain async function so tests can run one
//! pass without timers; `spawn` wires them to independent intervals. Sweeps
//! work from a registry snapshot and never hold its lock across I/O.

use std::time::Duration;

use chrono::Utc;
use ride_tracking_lib::track_session::SessionState;

use crate::TrackingEngine;
use crate::TrackingError;

pub const RECONCILE_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const PRUNE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
pub const CONSISTENCY_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// An active session untouched for this long is considered abandoned.
pub const ABANDONED_AFTER_HOURS: i64 = 4;
/// Untagged points of finalized sessions are kept this long.
pub const RETENTION_DAYS: i64 = 30;

pub fn spawn(engine: TrackingEngine) {
    let reconcile_engine = engine.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RECONCILE_INTERVAL);
        loop {
            interval.tick().await;
            match run_reconcile_once(&reconcile_engine).await {
                Ok(0) => {}
                Ok(n) => tracing::info!("reconciled {n} abandoned sessions"),
                Err(err) => tracing::error!("abandoned-session sweep failed: {err}"),
            }
        }
    });

    let prune_engine = engine.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            interval.tick().await;
            match run_prune_once(&prune_engine).await {
                Ok(0) => {}
                Ok(n) => tracing::info!("pruned {n} expired track points"),
                Err(err) => tracing::error!("retention sweep failed: {err}"),
            }
        }
    });

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CONSISTENCY_INTERVAL);
        loop {
            interval.tick().await;
            match run_consistency_once(&engine).await {
                Ok(0) => {}
                Ok(n) => tracing::info!("evicted {n} stale session cache entries"),
                Err(err) => tracing::error!("consistency sweep failed: {err}"),
            }
        }
    });
}

/// Finalizes active sessions whose last update is older than the abandon
/// cutoff as `Interrupted`, keeping whatever statistics their valid points
/// support, and evicts them from the registry.
pub async fn run_reconcile_once(engine: &TrackingEngine) -> Result<u32, TrackingError> {
    let cutoff = Utc::now() - chrono::Duration::hours(ABANDONED_AFTER_HOURS);
    let stale = engine.database().stale_active_sessions(cutoff).await?;

    let mut reconciled = 0;
    for db_session in stale {
        // Prefer the registry's copy: its running statistics are fresher
        // than the persisted row if an update was ever lost.
        let session = match engine.registry().remove(db_session.trip_id).await {
            Some(entry) => entry.lock().await.session.clone(),
            None => db_session,
        };
        let trip_id = session.trip_id;
        engine
            .finalize_session(session, SessionState::Interrupted)
            .await?;
        tracing::warn!("trip {trip_id}: abandoned session interrupted by maintenance");
        reconciled += 1;
    }

    Ok(reconciled)
}

/// Deletes untagged points older than the retention window from finalized
/// sessions. Event-tagged points survive indefinitely.
pub async fn run_prune_once(engine: &TrackingEngine) -> Result<u64, TrackingError> {
    let cutoff = Utc::now() - chrono::Duration::days(RETENTION_DAYS);
    engine.database().prune_points_before(cutoff).await
}

/// Evicts registry entries whose backing session record is no longer
/// active (external correction).
pub async fn run_consistency_once(engine: &TrackingEngine) -> Result<u32, TrackingError> {
    let snapshot = engine.registry().snapshot().await;

    let mut evicted = 0;
    for (trip_id, entry) in snapshot {
        let session_id = entry.lock().await.session.session_id;
        let keep = match engine.database().get_session(session_id).await {
            Ok(session) => session.state == SessionState::Active,
            Err(_) => false,
        };
        if !keep {
            engine.registry().remove(trip_id).await;
            tracing::warn!("trip {trip_id}: evicted cache entry for non-active session");
            evicted += 1;
        }
    }

    Ok(evicted)
}
