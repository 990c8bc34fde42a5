use std::sync::Arc;

use chrono::{DateTime, Utc};
use geo_types::Point;
use serde::Serialize;

use ride_tracking_lib::alert::{Alert, AlertKind, AlertThresholds};
use ride_tracking_lib::incident::{Incident, IncidentKind, Severity};
use ride_tracking_lib::track_point::{PositionSample, TrackEvent, TrackPoint, TripPhase};
use ride_tracking_lib::track_session::{
    LandmarkVisit, Landmarks, PickupPoint, SessionParams, SessionState, SessionStatistics,
    TrackSession,
};

use crate::TrackingError;
use crate::alerting::{self, AlertContext};
use crate::collaborators::{
    LivePublisher, Notifier, PassengerDirectory, TripDirectory, trip_topic,
};
use crate::database::TrackingDatabase;
use crate::phase;
use crate::registry::{LiveSession, SessionRegistry};
use crate::statistics;
use crate::trajectory::{self, HistoryQuery, SessionHistory};
use crate::validator::{self, Validation};

/// Per-sample result of `ingest_position`. Soft and hard rejections are not
/// errors: the caller reacts to the variant, the stream continues.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    Accepted {
        point: Box<TrackPoint>,
        alerts: Vec<Alert>,
    },
    DiscardedAsNoise,
    RejectedImplausible {
        reason: String,
    },
}

/// Snapshot of a live session for status queries.
#[derive(Debug, Clone, Serialize)]
pub struct LiveStatus {
    pub trip_id: i64,
    pub session_id: i64,
    pub state: SessionState,
    pub phase: TripPhase,
    pub last_point: Option<TrackPoint>,
    pub statistics: SessionStatistics,
    pub open_incidents: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SeverityCounts {
    pub low: u32,
    pub medium: u32,
    pub high: u32,
    pub critical: u32,
}

/// Aggregated distance/duration/incident counts across a driver's sessions.
#[derive(Debug, Clone, Serialize)]
pub struct DriverSummary {
    pub driver_id: i64,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub session_count: u32,
    pub total_distance_m: f64,
    pub total_duration_s: f64,
    pub incidents: SeverityCounts,
    pub mean_eco_score: Option<f64>,
}

/// The public interface of the tracking core: session lifecycle, sample
/// ingestion, alerting, history and summaries.
#[derive(Clone)]
pub struct TrackingEngine {
    db: TrackingDatabase,
    registry: SessionRegistry,
    trips: Arc<dyn TripDirectory>,
    passengers: Arc<dyn PassengerDirectory>,
    notifier: Arc<dyn Notifier>,
    publisher: Arc<dyn LivePublisher>,
}

impl TrackingEngine {
    pub async fn start(
        trips: Arc<dyn TripDirectory>,
        passengers: Arc<dyn PassengerDirectory>,
        notifier: Arc<dyn Notifier>,
        publisher: Arc<dyn LivePublisher>,
    ) -> Result<Self, TrackingError> {
        let db = TrackingDatabase::connect().await?;
        Ok(Self::with_database(db, trips, passengers, notifier, publisher))
    }

    pub fn with_database(
        db: TrackingDatabase,
        trips: Arc<dyn TripDirectory>,
        passengers: Arc<dyn PassengerDirectory>,
        notifier: Arc<dyn Notifier>,
        publisher: Arc<dyn LivePublisher>,
    ) -> Self {
        Self {
            db,
            registry: SessionRegistry::new(),
            trips,
            passengers,
            notifier,
            publisher,
        }
    }

    pub(crate) fn database(&self) -> &TrackingDatabase {
        &self.db
    }

    pub(crate) fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Starts tracking for a trip. At most one active session per trip.
    pub async fn start_session(
        &self,
        trip_id: i64,
        driver_id: i64,
        params: Option<SessionParams>,
    ) -> Result<TrackSession, TrackingError> {
        if self.registry.contains(trip_id).await {
            return Err(TrackingError::SessionAlreadyActive(trip_id));
        }
        if self
            .db
            .session_for_trip_in_state(trip_id, SessionState::Active)
            .await?
            .is_some()
        {
            return Err(TrackingError::SessionAlreadyActive(trip_id));
        }

        let (landmarks, scheduled_arrival) = self.fetch_landmarks(trip_id).await;

        let mut session = TrackSession::new(
            0,
            trip_id,
            driver_id,
            Utc::now(),
            landmarks,
            params.unwrap_or_default(),
        );
        session.session_id = self.db.insert_session(&session).await?;

        let mut live = LiveSession::new(session.clone(), None);
        live.scheduled_arrival = scheduled_arrival;
        self.registry.insert(trip_id, live).await;

        self.notify_best_effort(
            driver_id,
            "tracking_started",
            serde_json::json!({ "trip_id": trip_id, "session_id": session.session_id }),
            Severity::Low,
        );
        tracing::info!(
            "tracking session {} started for trip {trip_id}",
            session.session_id
        );

        Ok(session)
    }

    /// Validates and ingests one sample into the trip's active session.
    ///
    /// Same-trip calls serialize on the session entry; different trips run
    /// concurrently. The point and the updated statistics are persisted
    /// before the call reports success.
    pub async fn ingest_position(
        &self,
        trip_id: i64,
        sample: PositionSample,
    ) -> Result<IngestOutcome, TrackingError> {
        let Some(entry) = self.registry.get(trip_id).await else {
            return Err(TrackingError::SessionNotFound(trip_id));
        };
        let mut live = entry.lock().await;
        if live.session.state != SessionState::Active {
            return Err(TrackingError::SessionNotFound(trip_id));
        }

        match validator::validate(&sample, live.last_point.as_ref(), &live.session.params) {
            Validation::OutOfRange { reason } => Err(TrackingError::Validation(reason)),
            Validation::Noise => {
                tracing::trace!("trip {trip_id}: sample discarded as stationary jitter");
                Ok(IngestOutcome::DiscardedAsNoise)
            }
            Validation::Implausible { reason } => {
                let current_phase = self.current_phase(&live);
                let point =
                    TrackPoint::invalid_from_sample(&sample, current_phase, reason.clone());
                self.db.insert_point(live.session.session_id, &point).await?;
                live.session.last_update = Utc::now();
                self.db.update_session(&live.session).await?;

                tracing::debug!("trip {trip_id}: sample rejected: {reason}");
                Ok(IngestOutcome::RejectedImplausible { reason })
            }
            Validation::Accepted {
                distance_m,
                elapsed_s,
                computed_speed_kmh,
            } => {
                let point = self
                    .accept_sample(trip_id, &mut live, sample, distance_m, elapsed_s, computed_speed_kmh)
                    .await?;
                let alerts = self.raise_alerts(trip_id, &mut live, &point).await?;

                live.session.last_update = Utc::now();
                self.db.update_session(&live.session).await?;

                self.publish(trip_id, "point", &point);
                for alert in &alerts {
                    self.publish(trip_id, "alert", alert);
                }

                live.last_point = Some(point.clone());
                Ok(IngestOutcome::Accepted {
                    point: Box::new(point),
                    alerts,
                })
            }
        }
    }

    /// Ends a session normally: batch analytics, state `Completed`.
    pub async fn end_session(&self, trip_id: i64) -> Result<TrackSession, TrackingError> {
        // Removing the entry first means in-flight ingestion either finishes
        // before we take the lock below, or fails with SessionNotFound.
        let session = match self.registry.remove(trip_id).await {
            Some(entry) => entry.lock().await.session.clone(),
            None => self
                .db
                .session_for_trip_in_state(trip_id, SessionState::Active)
                .await?
                .ok_or(TrackingError::SessionNotFound(trip_id))?,
        };

        let session = self.finalize_session(session, SessionState::Completed).await?;

        self.notify_best_effort(
            session.driver_id,
            "tracking_ended",
            serde_json::json!({
                "trip_id": trip_id,
                "session_id": session.session_id,
                "statistics": session.statistics,
                "analytics": session.analytics,
            }),
            Severity::Low,
        );

        Ok(session)
    }

    /// Driver-initiated pause. The registry entry is dropped; `resume_session`
    /// rebuilds it from the persisted state.
    pub async fn pause_session(&self, trip_id: i64) -> Result<TrackSession, TrackingError> {
        let mut session = match self.registry.remove(trip_id).await {
            Some(entry) => entry.lock().await.session.clone(),
            None => self
                .db
                .session_for_trip_in_state(trip_id, SessionState::Active)
                .await?
                .ok_or(TrackingError::SessionNotFound(trip_id))?,
        };

        if session.state != SessionState::Active {
            return Err(TrackingError::SessionState(format!(
                "cannot pause a {} session",
                session.state.as_str()
            )));
        }

        session.state = SessionState::Paused;
        session.last_update = Utc::now();
        self.db.update_session(&session).await?;
        tracing::info!("tracking session {} paused for trip {trip_id}", session.session_id);
        Ok(session)
    }

    pub async fn resume_session(&self, trip_id: i64) -> Result<TrackSession, TrackingError> {
        if self.registry.contains(trip_id).await {
            return Err(TrackingError::SessionAlreadyActive(trip_id));
        }

        let mut session = self
            .db
            .session_for_trip_in_state(trip_id, SessionState::Paused)
            .await?
            .ok_or(TrackingError::SessionNotFound(trip_id))?;

        session.state = SessionState::Active;
        session.last_update = Utc::now();
        self.db.update_session(&session).await?;

        let last_point = self
            .db
            .get_points(session.session_id)
            .await?
            .into_iter()
            .filter(|p| p.valid)
            .next_back();

        let (_, scheduled_arrival) = self.fetch_landmarks(trip_id).await;
        let mut live = LiveSession::new(session.clone(), last_point);
        live.scheduled_arrival = scheduled_arrival;
        self.registry.insert(trip_id, live).await;

        tracing::info!("tracking session {} resumed for trip {trip_id}", session.session_id);
        Ok(session)
    }

    /// Manually reported incident; follows the same append/forward path as
    /// alert-raised incidents.
    pub async fn report_incident(
        &self,
        trip_id: i64,
        kind: IncidentKind,
        description: String,
        position: Option<Point<f64>>,
    ) -> Result<Incident, TrackingError> {
        let severity = kind.default_severity();
        let incident = Incident::new(kind, description, position, Utc::now(), severity);

        if let Some(entry) = self.registry.get(trip_id).await {
            let mut live = entry.lock().await;
            live.session.incidents.push(incident.clone());
            self.db.update_session(&live.session).await?;
        } else {
            let mut session = self
                .db
                .latest_session_for_trip(trip_id)
                .await?
                .ok_or(TrackingError::SessionNotFound(trip_id))?;
            session.incidents.push(incident.clone());
            self.db.update_session(&session).await?;
        }

        self.publish(trip_id, "incident", &incident);
        if severity.is_broadcast() {
            self.forward_to_passengers(
                trip_id,
                "trip_incident",
                serde_json::to_value(&incident).unwrap_or_default(),
                severity,
            );
        }

        Ok(incident)
    }

    pub async fn resolve_incident(
        &self,
        trip_id: i64,
        index: usize,
    ) -> Result<Incident, TrackingError> {
        let resolve = |session: &mut TrackSession| -> Result<Incident, TrackingError> {
            let incident = session.incidents.get_mut(index).ok_or_else(|| {
                TrackingError::Validation(format!("no incident at index {index}"))
            })?;
            incident.resolved = true;
            Ok(incident.clone())
        };

        if let Some(entry) = self.registry.get(trip_id).await {
            let mut live = entry.lock().await;
            let incident = resolve(&mut live.session)?;
            self.db.update_session(&live.session).await?;
            Ok(incident)
        } else {
            let mut session = self
                .db
                .latest_session_for_trip(trip_id)
                .await?
                .ok_or(TrackingError::SessionNotFound(trip_id))?;
            let incident = resolve(&mut session)?;
            self.db.update_session(&session).await?;
            Ok(incident)
        }
    }

    /// Replaces the alert configuration of the trip's live session.
    pub async fn configure_alert_thresholds(
        &self,
        trip_id: i64,
        thresholds: AlertThresholds,
    ) -> Result<(), TrackingError> {
        let Some(entry) = self.registry.get(trip_id).await else {
            return Err(TrackingError::SessionNotFound(trip_id));
        };
        let mut live = entry.lock().await;
        live.session.thresholds = thresholds;
        self.db.update_session(&live.session).await
    }

    pub async fn live_status(&self, trip_id: i64) -> Result<LiveStatus, TrackingError> {
        let Some(entry) = self.registry.get(trip_id).await else {
            return Err(TrackingError::SessionNotFound(trip_id));
        };
        let live = entry.lock().await;
        Ok(LiveStatus {
            trip_id,
            session_id: live.session.session_id,
            state: live.session.state,
            phase: self.current_phase(&live),
            last_point: live.last_point.clone(),
            statistics: live.session.statistics.clone(),
            open_incidents: live.session.open_incidents(),
        })
    }

    /// The session plus its ordered points, filtered and optionally
    /// downsampled.
    pub async fn get_history(
        &self,
        trip_id: i64,
        query: HistoryQuery,
    ) -> Result<SessionHistory, TrackingError> {
        let session = match self.registry.get(trip_id).await {
            Some(entry) => entry.lock().await.session.clone(),
            None => self
                .db
                .latest_session_for_trip(trip_id)
                .await?
                .ok_or(TrackingError::SessionNotFound(trip_id))?,
        };

        let mut points = self.db.get_points(session.session_id).await?;
        if let Some(from) = query.from {
            points.retain(|p| p.timestamp >= from);
        }
        if let Some(to) = query.to {
            points.retain(|p| p.timestamp <= to);
        }
        let points = trajectory::select_points(points, &query);

        Ok(SessionHistory { session, points })
    }

    pub async fn driver_summary(
        &self,
        driver_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<DriverSummary, TrackingError> {
        let sessions = self.db.sessions_for_driver(driver_id, from, to).await?;

        let mut summary = DriverSummary {
            driver_id,
            from,
            to,
            session_count: sessions.len() as u32,
            total_distance_m: 0.0,
            total_duration_s: 0.0,
            incidents: SeverityCounts::default(),
            mean_eco_score: None,
        };

        let mut eco_sum = 0.0;
        let mut eco_count = 0u32;
        for session in &sessions {
            summary.total_distance_m += session.statistics.distance_total_m;
            summary.total_duration_s += session.statistics.duration_s;
            for incident in &session.incidents {
                match incident.severity {
                    Severity::Low => summary.incidents.low += 1,
                    Severity::Medium => summary.incidents.medium += 1,
                    Severity::High => summary.incidents.high += 1,
                    Severity::Critical => summary.incidents.critical += 1,
                }
            }
            if let Some(analytics) = &session.analytics {
                eco_sum += analytics.eco_score;
                eco_count += 1;
            }
        }
        if eco_count > 0 {
            summary.mean_eco_score = Some(eco_sum / eco_count as f64);
        }

        Ok(summary)
    }

    /// Runs the batch pass and moves the session into a final state.
    pub(crate) async fn finalize_session(
        &self,
        mut session: TrackSession,
        final_state: SessionState,
    ) -> Result<TrackSession, TrackingError> {
        let points = self.db.get_points(session.session_id).await?;
        let analytics = statistics::finalize(&mut session.statistics, &points);
        session.analytics = Some(analytics);

        if session.landmarks.end.is_none() {
            session.landmarks.end = points.iter().rev().find(|p| p.valid).map(|p| LandmarkVisit {
                position: p.position,
                timestamp: p.timestamp,
            });
        }

        let now = Utc::now();
        session.state = final_state;
        session.end_time = Some(now);
        session.last_update = now;
        self.db.update_session(&session).await?;

        tracing::info!(
            "tracking session {} finalized as {} ({:.0}m over {:.0}s, {} stops)",
            session.session_id,
            final_state.as_str(),
            session.statistics.distance_total_m,
            session.statistics.duration_s,
            session.statistics.stop_count,
        );
        Ok(session)
    }

    fn current_phase(&self, live: &LiveSession) -> TripPhase {
        live.last_point
            .as_ref()
            .map(|p| p.phase)
            .unwrap_or(TripPhase::AwaitingPassengers)
    }

    async fn accept_sample(
        &self,
        trip_id: i64,
        live: &mut LiveSession,
        sample: PositionSample,
        distance_m: f64,
        elapsed_s: f64,
        computed_speed_kmh: f64,
    ) -> Result<TrackPoint, TrackingError> {
        let position = sample.position();
        let current_phase = self.current_phase(live);

        let mut new_phase = phase::infer_phase(position, &live.session.landmarks, current_phase);
        let mut pickup_reached = false;
        if new_phase == TripPhase::ArrivedAtPickup {
            if let Some((index, _)) = phase::nearest_pending_pickup(position, &live.session.landmarks)
            {
                let pickup: &mut PickupPoint = &mut live.session.landmarks.pickups[index];
                if pickup.reached_at.is_none() {
                    pickup.reached_at = Some(sample.timestamp);
                    pickup_reached = true;
                    tracing::info!(
                        "trip {trip_id}: reached pickup of passenger {}",
                        pickup.passenger_id
                    );
                }
            }
        }
        // The driver app signals boarding explicitly.
        if sample.event == Some(TrackEvent::PassengerBoarded) {
            new_phase = TripPhase::PassengersBoarded;
        }

        if live.session.landmarks.start.is_none() {
            live.session.landmarks.start = Some(LandmarkVisit {
                position,
                timestamp: sample.timestamp,
            });
        }

        let mut point =
            TrackPoint::from_sample(&sample, new_phase, distance_m, elapsed_s, computed_speed_kmh);
        if pickup_reached && point.event.is_none() {
            point.event = Some(TrackEvent::PickupReached);
        }

        statistics::apply_sample(
            &mut live.session.statistics,
            distance_m,
            elapsed_s,
            sample.speed_kmh,
        );

        self.db.insert_point(live.session.session_id, &point).await?;
        Ok(point)
    }

    async fn raise_alerts(
        &self,
        trip_id: i64,
        live: &mut LiveSession,
        point: &TrackPoint,
    ) -> Result<Vec<Alert>, TrackingError> {
        // Standstill bookkeeping for the prolonged-stop threshold.
        if point.speed_kmh < statistics::STOP_SPEED_KMH {
            if live.stop_started_at.is_none() {
                live.stop_started_at = Some(point.timestamp);
            }
        } else {
            live.stop_started_at = None;
            live.stop_alerted = false;
        }
        let current_stop_s = match (live.stop_started_at, live.stop_alerted) {
            // One prolonged-stop alert per standstill.
            (Some(started), false) => {
                Some((point.timestamp - started).num_milliseconds() as f64 / 1000.0)
            }
            _ => None,
        };

        let context = AlertContext {
            thresholds: &live.session.thresholds,
            landmarks: &live.session.landmarks,
            scheduled_arrival: live.scheduled_arrival,
            current_stop_s,
        };
        let alerts = alerting::evaluate(point, &context);

        for alert in &alerts {
            tracing::warn!(
                "trip {trip_id}: {} alert ({}): {}",
                alert.severity.as_str(),
                point.timestamp,
                alert.message
            );
            if alert.kind == AlertKind::ProlongedStop {
                live.stop_alerted = true;
            }
            if alert.severity.is_broadcast() {
                live.session.incidents.push(Incident::new(
                    alert.kind.incident_kind(),
                    alert.message.clone(),
                    Some(point.position),
                    alert.timestamp,
                    alert.severity,
                ));
                self.forward_to_passengers(
                    trip_id,
                    "trip_alert",
                    serde_json::to_value(alert).unwrap_or_default(),
                    alert.severity,
                );
            }
        }

        Ok(alerts)
    }

    fn publish<T: Serialize>(&self, trip_id: i64, message_type: &str, payload: &T) {
        let frame = serde_json::json!({ "type": message_type, "data": payload });
        self.publisher.publish(&trip_topic(trip_id), frame.to_string());
    }

    /// Fire-and-forget notification of one recipient. Failures are logged,
    /// never surfaced to the caller.
    fn notify_best_effort(
        &self,
        recipient_id: i64,
        event_type: &'static str,
        payload: serde_json::Value,
        priority: Severity,
    ) {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            if let Err(err) = notifier.notify(recipient_id, event_type, payload, priority).await {
                tracing::warn!("failed to notify {recipient_id} of {event_type}: {err}");
            }
        });
    }

    /// Fire-and-forget fan-out to every onboard passenger of a trip.
    fn forward_to_passengers(
        &self,
        trip_id: i64,
        event_type: &'static str,
        payload: serde_json::Value,
        priority: Severity,
    ) {
        let passengers = self.passengers.clone();
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            let ids = match passengers.onboard_passengers(trip_id).await {
                Ok(ids) => ids,
                Err(err) => {
                    tracing::warn!("passenger lookup failed for trip {trip_id}: {err}");
                    return;
                }
            };
            for id in ids {
                if let Err(err) = notifier
                    .notify(id, event_type, payload.clone(), priority)
                    .await
                {
                    tracing::warn!("failed to notify passenger {id} for trip {trip_id}: {err}");
                }
            }
        });
    }

    /// Landmarks and schedule from the trip directory; an unavailable
    /// collaborator degrades to empty landmarks, it never fails the call.
    async fn fetch_landmarks(&self, trip_id: i64) -> (Landmarks, Option<DateTime<Utc>>) {
        match self.trips.trip_info(trip_id).await {
            Ok(info) => {
                let landmarks = Landmarks {
                    start: None,
                    end: None,
                    destination: info.destination,
                    pickups: info
                        .pickups
                        .into_iter()
                        .map(|p| PickupPoint {
                            passenger_id: p.passenger_id,
                            position: p.position,
                            reached_at: None,
                        })
                        .collect(),
                };
                (landmarks, info.scheduled_arrival)
            }
            Err(err) => {
                tracing::warn!("trip metadata unavailable for trip {trip_id}: {err}");
                (Landmarks::default(), None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{CollaboratorError, PlannedPickup, TripInfo};
    use crate::maintenance;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use ride_tracking_lib::track_session::QualityBucket;
    use std::sync::Mutex as StdMutex;

    struct StaticTripDirectory(Option<TripInfo>);

    #[async_trait]
    impl TripDirectory for StaticTripDirectory {
        async fn trip_info(&self, trip_id: i64) -> Result<TripInfo, CollaboratorError> {
            match &self.0 {
                Some(info) => Ok(TripInfo {
                    trip_id,
                    ..info.clone()
                }),
                None => Err(CollaboratorError("no trip metadata".to_string())),
            }
        }
    }

    struct StaticPassengers(Vec<i64>);

    #[async_trait]
    impl PassengerDirectory for StaticPassengers {
        async fn onboard_passengers(&self, _trip_id: i64) -> Result<Vec<i64>, CollaboratorError> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        events: StdMutex<Vec<(i64, String)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(
            &self,
            recipient_id: i64,
            event_type: &str,
            _payload: serde_json::Value,
            _priority: Severity,
        ) -> Result<(), CollaboratorError> {
            self.events
                .lock()
                .unwrap()
                .push((recipient_id, event_type.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        frames: StdMutex<Vec<(String, String)>>,
    }

    impl LivePublisher for RecordingPublisher {
        fn publish(&self, topic: &str, payload: String) {
            self.frames
                .lock()
                .unwrap()
                .push((topic.to_string(), payload));
        }
    }

    struct Harness {
        engine: TrackingEngine,
        db: TrackingDatabase,
        notifier: Arc<RecordingNotifier>,
        publisher: Arc<RecordingPublisher>,
    }

    async fn harness(trip_info: Option<TripInfo>, passengers: Vec<i64>) -> Harness {
        let db = TrackingDatabase::connect_in_memory().await.unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let engine = TrackingEngine::with_database(
            db.clone(),
            Arc::new(StaticTripDirectory(trip_info)),
            Arc::new(StaticPassengers(passengers)),
            notifier.clone(),
            publisher.clone(),
        );
        Harness {
            engine,
            db,
            notifier,
            publisher,
        }
    }

    fn sample(lat: f64, lon: f64, secs: i64, speed_kmh: f64) -> PositionSample {
        PositionSample {
            latitude: lat,
            longitude: lon,
            timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            speed_kmh,
            heading: 0.0,
            altitude: 30.0,
            accuracy_m: 5.0,
            signal_quality: 95.0,
            battery_pct: 80.0,
            event: None,
        }
    }

    #[tokio::test]
    async fn short_trip_end_to_end() {
        let h = harness(None, Vec::new()).await;
        h.engine.start_session(1, 7, None).await.unwrap();

        // 3 points 30 s apart, ~450 m between each: ~900 m total.
        for (i, lat) in [48.85, 48.854047, 48.858094].iter().enumerate() {
            let outcome = h
                .engine
                .ingest_position(1, sample(*lat, 2.35, i as i64 * 30, 35.0))
                .await
                .unwrap();
            assert!(matches!(outcome, IngestOutcome::Accepted { .. }));
        }

        let session = h.engine.end_session(1).await.unwrap();
        assert_eq!(session.state, SessionState::Completed);
        assert!(session.end_time.is_some());
        assert!((session.statistics.distance_total_m - 900.0).abs() < 5.0);
        assert_eq!(session.statistics.duration_s, 60.0);
        assert_eq!(session.statistics.stop_count, 0);
        let analytics = session.analytics.unwrap();
        assert_eq!(analytics.quality.bucket, QualityBucket::Excellent);

        // Ingesting after the end is a missing session.
        let err = h
            .engine
            .ingest_position(1, sample(48.86, 2.35, 120, 35.0))
            .await
            .unwrap_err();
        assert!(matches!(err, TrackingError::SessionNotFound(1)));

        // Points and statistics agree.
        let history = h
            .engine
            .get_history(1, HistoryQuery::default())
            .await
            .unwrap();
        let delta_sum: f64 = history.points.iter().map(|p| p.distance_delta_m).sum();
        assert!((delta_sum - session.statistics.distance_total_m).abs() < 1e-9);
    }

    #[tokio::test]
    async fn second_start_for_same_trip_fails() {
        let h = harness(None, Vec::new()).await;
        h.engine.start_session(1, 7, None).await.unwrap();
        let err = h.engine.start_session(1, 7, None).await.unwrap_err();
        assert!(matches!(err, TrackingError::SessionAlreadyActive(1)));

        // A different trip is fine.
        h.engine.start_session(2, 7, None).await.unwrap();
    }

    #[tokio::test]
    async fn position_jump_is_persisted_invalid_and_ignored_by_statistics() {
        let h = harness(None, Vec::new()).await;
        h.engine.start_session(1, 7, None).await.unwrap();
        h.engine
            .ingest_position(1, sample(48.85, 2.35, 0, 30.0))
            .await
            .unwrap();

        // ~2 km away, 5 seconds later.
        let outcome = h
            .engine
            .ingest_position(1, sample(48.868, 2.35, 5, 30.0))
            .await
            .unwrap();
        match outcome {
            IngestOutcome::RejectedImplausible { reason } => {
                assert!(reason.contains("position jump"))
            }
            other => panic!("expected rejection, got {other:?}"),
        }

        let status = h.engine.live_status(1).await.unwrap();
        assert_eq!(status.statistics.distance_total_m, 0.0);

        let history = h
            .engine
            .get_history(
                1,
                HistoryQuery {
                    include_invalid: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(history.points.len(), 2);
        let invalid = &history.points[1];
        assert!(!invalid.valid);
        assert!(invalid.invalid_reason.as_deref().unwrap().contains("position jump"));
    }

    #[tokio::test]
    async fn stationary_jitter_persists_nothing() {
        let h = harness(None, Vec::new()).await;
        h.engine.start_session(1, 7, None).await.unwrap();
        h.engine
            .ingest_position(1, sample(48.85, 2.35, 0, 0.0))
            .await
            .unwrap();

        // Meter-scale wobble at walking-pace reported speeds.
        for i in 1..=5 {
            let outcome = h
                .engine
                .ingest_position(1, sample(48.850009, 2.35, i * 10, 0.5))
                .await
                .unwrap();
            assert!(matches!(outcome, IngestOutcome::DiscardedAsNoise));
        }

        let history = h
            .engine
            .get_history(
                1,
                HistoryQuery {
                    include_invalid: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(history.points.len(), 1);
    }

    #[tokio::test]
    async fn speeding_raises_alert_incident_and_passenger_notifications() {
        let h = harness(None, vec![11, 12]).await;
        h.engine.start_session(1, 7, None).await.unwrap();
        h.engine
            .configure_alert_thresholds(
                1,
                AlertThresholds {
                    max_speed_kmh: Some(100.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        h.engine
            .ingest_position(1, sample(48.85, 2.35, 0, 80.0))
            .await
            .unwrap();
        // ~1 km in 30 s (120 km/h ground speed), reported 130 km/h.
        let outcome = h
            .engine
            .ingest_position(1, sample(48.859, 2.35, 30, 130.0))
            .await
            .unwrap();
        let IngestOutcome::Accepted { alerts, .. } = outcome else {
            panic!("expected acceptance");
        };
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::High);

        let status = h.engine.live_status(1).await.unwrap();
        assert_eq!(status.open_incidents, 1);

        // The forward to passengers is fire-and-forget; let it run.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let events = h.notifier.events.lock().unwrap().clone();
        let alerted: Vec<_> = events.iter().filter(|(_, e)| e == "trip_alert").collect();
        assert_eq!(alerted.len(), 2);

        // Back under the limit: nothing raised.
        let outcome = h
            .engine
            .ingest_position(1, sample(48.868, 2.35, 60, 80.0))
            .await
            .unwrap();
        let IngestOutcome::Accepted { alerts, .. } = outcome else {
            panic!("expected acceptance");
        };
        assert!(alerts.is_empty());
        assert_eq!(h.engine.live_status(1).await.unwrap().open_incidents, 1);
    }

    #[tokio::test]
    async fn pickup_geofence_sets_phase_and_event() {
        let info = TripInfo {
            trip_id: 0,
            driver_id: 7,
            destination: Some(Point::new(2.40, 48.90)),
            pickups: vec![PlannedPickup {
                passenger_id: 21,
                position: Point::new(2.36, 48.86),
            }],
            scheduled_arrival: None,
        };
        let h = harness(Some(info), Vec::new()).await;
        h.engine.start_session(1, 7, None).await.unwrap();

        // Far from the pickup: en route to it.
        let IngestOutcome::Accepted { point, .. } = h
            .engine
            .ingest_position(1, sample(48.85, 2.35, 0, 30.0))
            .await
            .unwrap()
        else {
            panic!("expected acceptance");
        };
        assert_eq!(point.phase, TripPhase::EnRouteToPickup);

        // Inside the 100 m fence: arrival, tagged once.
        let IngestOutcome::Accepted { point, .. } = h
            .engine
            .ingest_position(1, sample(48.8595, 2.36, 120, 20.0))
            .await
            .unwrap()
        else {
            panic!("expected acceptance");
        };
        assert_eq!(point.phase, TripPhase::ArrivedAtPickup);
        assert_eq!(point.event, Some(TrackEvent::PickupReached));

        let status = h.engine.live_status(1).await.unwrap();
        assert_eq!(status.phase, TripPhase::ArrivedAtPickup);
    }

    #[tokio::test]
    async fn pause_blocks_ingestion_until_resume() {
        let h = harness(None, Vec::new()).await;
        h.engine.start_session(1, 7, None).await.unwrap();
        h.engine
            .ingest_position(1, sample(48.85, 2.35, 0, 30.0))
            .await
            .unwrap();

        let session = h.engine.pause_session(1).await.unwrap();
        assert_eq!(session.state, SessionState::Paused);

        let err = h
            .engine
            .ingest_position(1, sample(48.852, 2.35, 30, 30.0))
            .await
            .unwrap_err();
        assert!(matches!(err, TrackingError::SessionNotFound(1)));

        let session = h.engine.resume_session(1).await.unwrap();
        assert_eq!(session.state, SessionState::Active);
        let outcome = h
            .engine
            .ingest_position(1, sample(48.852, 2.35, 60, 30.0))
            .await
            .unwrap();
        assert!(matches!(outcome, IngestOutcome::Accepted { .. }));
    }

    #[tokio::test]
    async fn abandoned_session_reconciled_as_interrupted() {
        let h = harness(None, Vec::new()).await;
        h.engine.start_session(1, 7, None).await.unwrap();
        for (i, lat) in [48.85, 48.854047].iter().enumerate() {
            h.engine
                .ingest_position(1, sample(*lat, 2.35, i as i64 * 30, 35.0))
                .await
                .unwrap();
        }

        // Backdate the persisted row: untouched for five hours.
        let mut session = h.db.latest_session_for_trip(1).await.unwrap().unwrap();
        session.last_update = Utc::now() - Duration::hours(5);
        h.db.update_session(&session).await.unwrap();

        let reconciled = maintenance::run_reconcile_once(&h.engine).await.unwrap();
        assert_eq!(reconciled, 1);

        let session = h.db.latest_session_for_trip(1).await.unwrap().unwrap();
        assert_eq!(session.state, SessionState::Interrupted);
        assert!((session.statistics.distance_total_m - 450.0).abs() < 5.0);
        assert!(session.analytics.is_some());

        let err = h
            .engine
            .ingest_position(1, sample(48.86, 2.35, 90, 35.0))
            .await
            .unwrap_err();
        assert!(matches!(err, TrackingError::SessionNotFound(1)));
    }

    #[tokio::test]
    async fn consistency_sweep_evicts_externally_corrected_sessions() {
        let h = harness(None, Vec::new()).await;
        h.engine.start_session(1, 7, None).await.unwrap();

        // External correction: the session record is completed behind our
        // back.
        let mut session = h.db.latest_session_for_trip(1).await.unwrap().unwrap();
        session.state = SessionState::Completed;
        h.db.update_session(&session).await.unwrap();

        let evicted = maintenance::run_consistency_once(&h.engine).await.unwrap();
        assert_eq!(evicted, 1);

        let err = h
            .engine
            .ingest_position(1, sample(48.85, 2.35, 0, 30.0))
            .await
            .unwrap_err();
        assert!(matches!(err, TrackingError::SessionNotFound(1)));
    }

    #[tokio::test]
    async fn retention_prune_keeps_event_tagged_points() {
        let h = harness(None, Vec::new()).await;
        h.engine.start_session(1, 7, None).await.unwrap();

        // Samples from 40 days ago, one tagged with a boarding event.
        let base = Utc::now() - Duration::days(40);
        for (i, lat) in [48.85, 48.854047, 48.858094].iter().enumerate() {
            let mut s = sample(*lat, 2.35, 0, 35.0);
            s.timestamp = base + Duration::seconds(i as i64 * 30);
            if i == 1 {
                s.event = Some(TrackEvent::PassengerBoarded);
            }
            h.engine.ingest_position(1, s).await.unwrap();
        }
        h.engine.end_session(1).await.unwrap();

        let pruned = maintenance::run_prune_once(&h.engine).await.unwrap();
        assert_eq!(pruned, 2);

        let history = h
            .engine
            .get_history(
                1,
                HistoryQuery {
                    include_invalid: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(history.points.len(), 1);
        assert_eq!(history.points[0].event, Some(TrackEvent::PassengerBoarded));
    }

    #[tokio::test]
    async fn manual_incident_mapped_and_broadcast() {
        let h = harness(None, vec![11]).await;
        h.engine.start_session(1, 7, None).await.unwrap();

        let incident = h
            .engine
            .report_incident(1, IncidentKind::Breakdown, "engine stalled".to_string(), None)
            .await
            .unwrap();
        assert_eq!(incident.severity, Severity::High);

        let minor = h
            .engine
            .report_incident(1, IncidentKind::Detour, "roadworks".to_string(), None)
            .await
            .unwrap();
        assert_eq!(minor.severity, Severity::Low);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let events = h.notifier.events.lock().unwrap().clone();
        // Only the breakdown reaches passengers.
        let forwarded: Vec<_> = events.iter().filter(|(_, e)| e == "trip_incident").collect();
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].0, 11);

        let status = h.engine.live_status(1).await.unwrap();
        assert_eq!(status.open_incidents, 2);

        let resolved = h.engine.resolve_incident(1, 0).await.unwrap();
        assert!(resolved.resolved);
        assert_eq!(h.engine.live_status(1).await.unwrap().open_incidents, 1);
    }

    #[tokio::test]
    async fn accepted_points_are_published() {
        let h = harness(None, Vec::new()).await;
        h.engine.start_session(1, 7, None).await.unwrap();
        h.engine
            .ingest_position(1, sample(48.85, 2.35, 0, 30.0))
            .await
            .unwrap();

        let frames = h.publisher.frames.lock().unwrap().clone();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, "trip/1");
        assert!(frames[0].1.contains("\"type\":\"point\""));
    }

    #[tokio::test]
    async fn driver_summary_aggregates_sessions() {
        let h = harness(None, Vec::new()).await;
        let from = Utc::now() - Duration::hours(1);

        h.engine.start_session(1, 7, None).await.unwrap();
        for (i, lat) in [48.85, 48.854047, 48.858094].iter().enumerate() {
            h.engine
                .ingest_position(1, sample(*lat, 2.35, i as i64 * 30, 35.0))
                .await
                .unwrap();
        }
        h.engine
            .report_incident(1, IncidentKind::Delay, "traffic".to_string(), None)
            .await
            .unwrap();
        h.engine.end_session(1).await.unwrap();

        let to = Utc::now() + Duration::hours(1);
        let summary = h.engine.driver_summary(7, from, to).await.unwrap();
        assert_eq!(summary.session_count, 1);
        assert!((summary.total_distance_m - 900.0).abs() < 5.0);
        assert_eq!(summary.incidents.medium, 1);
        assert!(summary.mean_eco_score.is_some());

        let empty = h
            .engine
            .driver_summary(99, from, to)
            .await
            .unwrap();
        assert_eq!(empty.session_count, 0);
    }
}
