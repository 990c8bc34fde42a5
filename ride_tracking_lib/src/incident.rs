use chrono::{DateTime, Utc};
use geo_types::Point;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// High and critical incidents are broadcast to onboard passengers.
    pub fn is_broadcast(&self) -> bool {
        *self >= Severity::High
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    // Manually reported.
    Accident,
    Emergency,
    Breakdown,
    Delay,
    Detour,
    Other,
    // Raised by the alerting engine.
    Speeding,
    LowBattery,
    WeakSignal,
    ProlongedStop,
    RouteDeviation,
    Lateness,
}

impl IncidentKind {
    pub fn default_severity(&self) -> Severity {
        match self {
            IncidentKind::Accident | IncidentKind::Emergency => Severity::Critical,
            IncidentKind::Breakdown => Severity::High,
            IncidentKind::Delay => Severity::Medium,
            IncidentKind::Detour | IncidentKind::Other => Severity::Low,
            IncidentKind::Speeding | IncidentKind::RouteDeviation => Severity::High,
            IncidentKind::LowBattery | IncidentKind::ProlongedStop | IncidentKind::Lateness => {
                Severity::Medium
            }
            IncidentKind::WeakSignal => Severity::Low,
        }
    }
}

/// One entry in a session's ordered incident list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub kind: IncidentKind,
    pub description: String,
    pub position: Option<Point<f64>>,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub resolved: bool,
}

impl Incident {
    pub fn new(
        kind: IncidentKind,
        description: String,
        position: Option<Point<f64>>,
        timestamp: DateTime<Utc>,
        severity: Severity,
    ) -> Self {
        Self {
            kind,
            description,
            position,
            timestamp,
            severity,
            resolved: false,
        }
    }
}
