//! Evaluates a session's configured thresholds against each validated point
//! and raises discrete alerts.

use chrono::{DateTime, Utc};
use ride_tracking_lib::alert::{Alert, AlertKind, AlertThresholds};
use ride_tracking_lib::geo_math;
use ride_tracking_lib::incident::Severity;
use ride_tracking_lib::track_point::TrackPoint;
use ride_tracking_lib::track_session::Landmarks;

/// Session-level context the point itself does not carry.
pub struct AlertContext<'a> {
    pub thresholds: &'a AlertThresholds,
    pub landmarks: &'a Landmarks,
    pub scheduled_arrival: Option<DateTime<Utc>>,
    /// Seconds the vehicle has currently been standing still, if it is.
    pub current_stop_s: Option<f64>,
}

pub fn evaluate(point: &TrackPoint, ctx: &AlertContext<'_>) -> Vec<Alert> {
    let mut alerts = Vec::new();
    let t = ctx.thresholds;

    let mut raise = |kind: AlertKind, severity: Severity, message: String| {
        alerts.push(Alert {
            kind,
            severity,
            message,
            position: point.position,
            timestamp: point.timestamp,
        });
    };

    if let Some(max_speed) = t.max_speed_kmh {
        if point.speed_kmh > max_speed {
            raise(
                AlertKind::Speeding,
                Severity::High,
                format!(
                    "speed {:.0} km/h exceeds configured maximum {:.0} km/h",
                    point.speed_kmh, max_speed
                ),
            );
        }
    }

    if let Some(min_battery) = t.min_battery_pct {
        if point.battery_pct < min_battery {
            raise(
                AlertKind::LowBattery,
                Severity::Medium,
                format!(
                    "device battery at {:.0}%, below {:.0}%",
                    point.battery_pct, min_battery
                ),
            );
        }
    }

    if let Some(min_signal) = t.min_signal_quality {
        if point.signal_quality < min_signal {
            raise(
                AlertKind::WeakSignal,
                Severity::Low,
                format!(
                    "signal quality {:.0}, below {:.0}",
                    point.signal_quality, min_signal
                ),
            );
        }
    }

    if let (Some(max_stop), Some(stopped)) = (t.max_stop_seconds, ctx.current_stop_s) {
        if stopped > max_stop {
            raise(
                AlertKind::ProlongedStop,
                Severity::Medium,
                format!("stopped for {stopped:.0}s, over the {max_stop:.0}s limit"),
            );
        }
    }

    if let Some(max_deviation) = t.max_route_deviation_m {
        if let (Some(start), Some(destination)) =
            (ctx.landmarks.start.as_ref(), ctx.landmarks.destination)
        {
            let deviation =
                geo_math::cross_track_distance_meters(point.position, start.position, destination);
            if deviation > max_deviation {
                raise(
                    AlertKind::RouteDeviation,
                    Severity::High,
                    format!("{deviation:.0}m off the direct route, over {max_deviation:.0}m"),
                );
            }
        }
    }

    if let (Some(max_delay), Some(arrival)) = (t.max_delay_seconds, ctx.scheduled_arrival) {
        let late_by = (point.timestamp - arrival).num_seconds();
        if late_by > max_delay {
            raise(
                AlertKind::Lateness,
                Severity::Medium,
                format!("running {late_by}s past the scheduled arrival"),
            );
        }
    }

    alerts
}
