use chrono::{DateTime, Utc};
use geo_types::Point;
use serde::{Deserialize, Serialize};

use crate::alert::AlertThresholds;
use crate::incident::Incident;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Paused,
    Completed,
    Interrupted,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::Paused => "paused",
            SessionState::Completed => "completed",
            SessionState::Interrupted => "interrupted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SessionState::Active),
            "paused" => Some(SessionState::Paused),
            "completed" => Some(SessionState::Completed),
            "interrupted" => Some(SessionState::Interrupted),
            _ => None,
        }
    }

    /// Completed and interrupted sessions accept no further transitions.
    pub fn is_final(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Interrupted)
    }
}

/// Running totals maintained incrementally during the stream, finalized by
/// the batch pass on session end.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStatistics {
    pub distance_total_m: f64,
    pub duration_s: f64,
    pub average_speed_kmh: f64,
    pub max_speed_kmh: f64,
    pub speed_sum_kmh: f64,
    pub speed_samples: u64,
    pub stop_count: u32,
    pub stopped_duration_s: f64,
    pub fuel_consumption_l: f64,
    pub co2_emissions_kg: f64,
}

/// Per-session tunables. Plausibility bounds are session configuration, not
/// global constants, so a highway trip and an urban trip can differ.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionParams {
    pub sampling_interval_s: u32,
    /// Below this reported speed a short move is treated as GPS jitter.
    pub min_speed_kmh: f64,
    /// Below this distance a slow move is treated as GPS jitter.
    pub min_distance_m: f64,
    pub max_plausible_speed_kmh: f64,
    pub max_jump_distance_m: f64,
    pub jump_window_s: f64,
    pub max_accuracy_m: f64,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            sampling_interval_s: 10,
            min_speed_kmh: 5.0,
            min_distance_m: 10.0,
            max_plausible_speed_kmh: 200.0,
            max_jump_distance_m: 1000.0,
            jump_window_s: 10.0,
            max_accuracy_m: 50.0,
        }
    }
}

/// A planned pickup (or drop-off) point. `reached_at` is set once the vehicle
/// enters the pickup geofence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PickupPoint {
    pub passenger_id: i64,
    pub position: Point<f64>,
    pub reached_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LandmarkVisit {
    pub position: Point<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Geographic anchors of the trip: where the session started and ended, the
/// planned pickups, and the destination from trip metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Landmarks {
    pub start: Option<LandmarkVisit>,
    pub end: Option<LandmarkVisit>,
    pub destination: Option<Point<f64>>,
    pub pickups: Vec<PickupPoint>,
}

impl Landmarks {
    pub fn pending_pickups(&self) -> impl Iterator<Item = &PickupPoint> {
        self.pickups.iter().filter(|p| p.reached_at.is_none())
    }
}

/// Post-trip analytics computed by the batch pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripAnalytics {
    pub eco_score: f64,
    pub quality: TrackingQuality,
    pub speed_percentiles: SpeedPercentiles,
    pub zone_counts: ZoneCounts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingQuality {
    pub valid_pct: f64,
    pub mean_accuracy_m: f64,
    pub mean_signal_quality: f64,
    pub bucket: QualityBucket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityBucket {
    Excellent,
    Good,
    Moderate,
    Poor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeedPercentiles {
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
}

/// Point counts by speed band: urban <=50 km/h, arterial 50-90, highway >90.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZoneCounts {
    pub urban: u32,
    pub arterial: u32,
    pub highway: u32,
}

/// The mutable aggregate root: one per active trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackSession {
    pub session_id: i64,
    pub trip_id: i64,
    pub driver_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub state: SessionState,
    pub last_update: DateTime<Utc>,
    pub statistics: SessionStatistics,
    pub analytics: Option<TripAnalytics>,
    pub landmarks: Landmarks,
    pub incidents: Vec<Incident>,
    pub params: SessionParams,
    pub thresholds: AlertThresholds,
}

impl TrackSession {
    pub fn new(
        session_id: i64,
        trip_id: i64,
        driver_id: i64,
        start_time: DateTime<Utc>,
        landmarks: Landmarks,
        params: SessionParams,
    ) -> Self {
        Self {
            session_id,
            trip_id,
            driver_id,
            start_time,
            end_time: None,
            state: SessionState::Active,
            last_update: start_time,
            statistics: SessionStatistics::default(),
            analytics: None,
            landmarks,
            incidents: Vec::new(),
            params,
            thresholds: AlertThresholds::default(),
        }
    }

    pub fn open_incidents(&self) -> usize {
        self.incidents.iter().filter(|i| !i.resolved).count()
    }
}
