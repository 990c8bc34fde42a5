//! Process-local index of live sessions. The registry is a cache over the
//! persisted sessions: the entry's mutex serializes ingestion for one trip
//! while different trips proceed concurrently; the outer lock is only held
//! long enough to look an entry up.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ride_tracking_lib::track_point::TrackPoint;
use ride_tracking_lib::track_session::TrackSession;
use tokio::sync::Mutex;

/// The cached state for one active session.
pub struct LiveSession {
    pub session: TrackSession,
    /// Last accepted point, the validator's reference.
    pub last_point: Option<TrackPoint>,
    /// Scheduled arrival from trip metadata, for lateness alerts.
    pub scheduled_arrival: Option<DateTime<Utc>>,
    /// When the current standstill began, if the vehicle is stopped.
    pub stop_started_at: Option<DateTime<Utc>>,
    /// Set once a prolonged-stop alert fired for the current standstill.
    pub stop_alerted: bool,
}

impl LiveSession {
    pub fn new(session: TrackSession, last_point: Option<TrackPoint>) -> Self {
        Self {
            session,
            last_point,
            scheduled_arrival: None,
            stop_started_at: None,
            stop_alerted: false,
        }
    }
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    entries: Arc<Mutex<HashMap<i64, Arc<Mutex<LiveSession>>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, trip_id: i64, live: LiveSession) -> Arc<Mutex<LiveSession>> {
        let entry = Arc::new(Mutex::new(live));
        self.entries.lock().await.insert(trip_id, entry.clone());
        entry
    }

    pub async fn get(&self, trip_id: i64) -> Option<Arc<Mutex<LiveSession>>> {
        self.entries.lock().await.get(&trip_id).cloned()
    }

    pub async fn contains(&self, trip_id: i64) -> bool {
        self.entries.lock().await.contains_key(&trip_id)
    }

    pub async fn remove(&self, trip_id: i64) -> Option<Arc<Mutex<LiveSession>>> {
        self.entries.lock().await.remove(&trip_id)
    }

    /// Entries at a moment in time. Maintenance sweeps iterate this snapshot
    /// instead of holding the registry lock for their whole duration.
    pub async fn snapshot(&self) -> Vec<(i64, Arc<Mutex<LiveSession>>)> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|(trip_id, entry)| (*trip_id, entry.clone()))
            .collect()
    }
}
