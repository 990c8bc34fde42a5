use chrono::{DateTime, Utc};
use geo_types::Point;
use serde::{Deserialize, Serialize};

use crate::incident::{IncidentKind, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Speeding,
    LowBattery,
    WeakSignal,
    ProlongedStop,
    RouteDeviation,
    Lateness,
}

impl AlertKind {
    pub fn incident_kind(&self) -> IncidentKind {
        match self {
            AlertKind::Speeding => IncidentKind::Speeding,
            AlertKind::LowBattery => IncidentKind::LowBattery,
            AlertKind::WeakSignal => IncidentKind::WeakSignal,
            AlertKind::ProlongedStop => IncidentKind::ProlongedStop,
            AlertKind::RouteDeviation => IncidentKind::RouteDeviation,
            AlertKind::Lateness => IncidentKind::Lateness,
        }
    }
}

/// A discrete alert raised while evaluating a validated point against the
/// session's configured thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub position: Point<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Per-session alert configuration. A `None` threshold is not evaluated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    pub max_speed_kmh: Option<f64>,
    pub min_battery_pct: Option<f64>,
    pub min_signal_quality: Option<f64>,
    pub max_stop_seconds: Option<f64>,
    pub max_route_deviation_m: Option<f64>,
    pub max_delay_seconds: Option<i64>,
}
