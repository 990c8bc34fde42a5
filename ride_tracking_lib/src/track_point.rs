use chrono::{DateTime, Utc};
use geo_types::Point;
use serde::{Deserialize, Serialize};

/// Trip sub-phase inferred from geography at capture time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripPhase {
    AwaitingPassengers,
    EnRouteToPickup,
    ArrivedAtPickup,
    PassengersBoarded,
    EnRouteToDestination,
    Arrived,
}

impl TripPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripPhase::AwaitingPassengers => "awaiting_passengers",
            TripPhase::EnRouteToPickup => "en_route_to_pickup",
            TripPhase::ArrivedAtPickup => "arrived_at_pickup",
            TripPhase::PassengersBoarded => "passengers_boarded",
            TripPhase::EnRouteToDestination => "en_route_to_destination",
            TripPhase::Arrived => "arrived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "awaiting_passengers" => Some(TripPhase::AwaitingPassengers),
            "en_route_to_pickup" => Some(TripPhase::EnRouteToPickup),
            "arrived_at_pickup" => Some(TripPhase::ArrivedAtPickup),
            "passengers_boarded" => Some(TripPhase::PassengersBoarded),
            "en_route_to_destination" => Some(TripPhase::EnRouteToDestination),
            "arrived" => Some(TripPhase::Arrived),
            _ => None,
        }
    }
}

/// Discrete event a point can carry. Event-tagged points survive both
/// trajectory simplification and retention pruning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackEvent {
    PickupReached,
    PassengerBoarded,
    PassengerDropped,
    DestinationReached,
}

impl TrackEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackEvent::PickupReached => "pickup_reached",
            TrackEvent::PassengerBoarded => "passenger_boarded",
            TrackEvent::PassengerDropped => "passenger_dropped",
            TrackEvent::DestinationReached => "destination_reached",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pickup_reached" => Some(TrackEvent::PickupReached),
            "passenger_boarded" => Some(TrackEvent::PassengerBoarded),
            "passenger_dropped" => Some(TrackEvent::PassengerDropped),
            "destination_reached" => Some(TrackEvent::DestinationReached),
            _ => None,
        }
    }
}

/// A raw sample as submitted by the driver app, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSample {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub speed_kmh: f64,
    #[serde(default)]
    pub heading: f64,
    #[serde(default)]
    pub altitude: f64,
    #[serde(default)]
    pub accuracy_m: f64,
    #[serde(default = "full_scale")]
    pub signal_quality: f64,
    #[serde(default = "full_scale")]
    pub battery_pct: f64,
    #[serde(default)]
    pub event: Option<TrackEvent>,
}

fn full_scale() -> f64 {
    100.0
}

impl PositionSample {
    pub fn position(&self) -> Point<f64> {
        Point::new(self.longitude, self.latitude)
    }
}

/// One validated (or invalid-flagged) observation in a session. Append-only,
/// never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackPoint {
    pub position: Point<f64>,
    pub timestamp: DateTime<Utc>,
    pub speed_kmh: f64,
    pub heading: f64,
    pub altitude: f64,
    pub accuracy_m: f64,
    pub signal_quality: f64,
    pub battery_pct: f64,
    pub phase: TripPhase,
    pub event: Option<TrackEvent>,
    /// Meters since the previous valid point in the same session.
    pub distance_delta_m: f64,
    /// Seconds since the previous valid point in the same session.
    pub time_delta_s: f64,
    /// Average speed over the delta, in km/h.
    pub computed_speed_kmh: f64,
    pub valid: bool,
    pub invalid_reason: Option<String>,
}

impl TrackPoint {
    /// Builds a point from a sample, carrying the computed deltas.
    pub fn from_sample(
        sample: &PositionSample,
        phase: TripPhase,
        distance_delta_m: f64,
        time_delta_s: f64,
        computed_speed_kmh: f64,
    ) -> Self {
        Self {
            position: sample.position(),
            timestamp: sample.timestamp,
            speed_kmh: sample.speed_kmh,
            heading: sample.heading,
            altitude: sample.altitude,
            accuracy_m: sample.accuracy_m,
            signal_quality: sample.signal_quality,
            battery_pct: sample.battery_pct,
            phase,
            event: sample.event,
            distance_delta_m,
            time_delta_s,
            computed_speed_kmh,
            valid: true,
            invalid_reason: None,
        }
    }

    /// Builds an invalid point persisted for diagnostics. Deltas stay zero so
    /// statistics are unaffected.
    pub fn invalid_from_sample(sample: &PositionSample, phase: TripPhase, reason: String) -> Self {
        let mut point = Self::from_sample(sample, phase, 0.0, 0.0, 0.0);
        point.valid = false;
        point.invalid_reason = Some(reason);
        point
    }
}
