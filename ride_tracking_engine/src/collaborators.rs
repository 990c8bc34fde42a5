//! Interfaces to the external collaborators this core consumes. All of them
//! are best-effort from the engine's point of view: a failing lookup or
//! dispatch degrades the enrichment, never the ingestion path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use geo_types::Point;
use ride_tracking_lib::incident::Severity;
use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub struct CollaboratorError(pub String);

impl std::fmt::Display for CollaboratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "collaborator unavailable: {}", self.0)
    }
}

impl std::error::Error for CollaboratorError {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedPickup {
    pub passenger_id: i64,
    pub position: Point<f64>,
}

/// Trip metadata owned by the reservation subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripInfo {
    pub trip_id: i64,
    pub driver_id: i64,
    pub destination: Option<Point<f64>>,
    pub pickups: Vec<PlannedPickup>,
    pub scheduled_arrival: Option<DateTime<Utc>>,
}

/// Landmark and schedule lookup for a trip.
#[async_trait]
pub trait TripDirectory: Send + Sync {
    async fn trip_info(&self, trip_id: i64) -> Result<TripInfo, CollaboratorError>;
}

/// Currently-onboard passenger identifiers for a trip.
#[async_trait]
pub trait PassengerDirectory: Send + Sync {
    async fn onboard_passengers(&self, trip_id: i64) -> Result<Vec<i64>, CollaboratorError>;
}

/// Push/SMS/email dispatch. Per-channel delivery is the dispatcher's
/// problem; the engine only hands over the event.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        recipient_id: i64,
        event_type: &str,
        payload: serde_json::Value,
        priority: Severity,
    ) -> Result<(), CollaboratorError>;
}

/// Real-time fan-out to subscribers of a trip's topic. Implementations must
/// not block; a dropped message is acceptable, a stalled ingestion is not.
pub trait LivePublisher: Send + Sync {
    fn publish(&self, topic: &str, payload: String);
}

pub fn trip_topic(trip_id: i64) -> String {
    format!("trip/{trip_id}")
}
