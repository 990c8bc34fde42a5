//! Plausibility checks on a single incoming sample against the session's
//! last accepted point.

use ride_tracking_lib::geo_math;
use ride_tracking_lib::track_point::{PositionSample, TrackPoint};
use ride_tracking_lib::track_session::SessionParams;

/// Outcome of validating one sample.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    /// Sample is plausible; deltas are relative to the previous valid point.
    Accepted {
        distance_m: f64,
        elapsed_s: f64,
        computed_speed_kmh: f64,
    },
    /// Below both movement thresholds: GPS jitter while stationary. The
    /// sample is discarded, not persisted.
    Noise,
    /// Physically implausible. The sample is persisted flagged invalid with
    /// the reason, and statistics are left untouched.
    Implausible { reason: String },
    /// Malformed coordinates. Nothing is persisted.
    OutOfRange { reason: String },
}

pub fn validate(
    sample: &PositionSample,
    last_point: Option<&TrackPoint>,
    params: &SessionParams,
) -> Validation {
    if !geo_math::coordinates_in_range(sample.latitude, sample.longitude) {
        return Validation::OutOfRange {
            reason: format!(
                "coordinates out of range: lat {} lon {}",
                sample.latitude, sample.longitude
            ),
        };
    }

    // The first point of a session is always valid.
    let Some(last) = last_point else {
        return Validation::Accepted {
            distance_m: 0.0,
            elapsed_s: 0.0,
            computed_speed_kmh: 0.0,
        };
    };

    let distance_m = geo_math::distance_meters(last.position, sample.position());
    let elapsed_s = (sample.timestamp - last.timestamp).num_milliseconds() as f64 / 1000.0;

    if elapsed_s < 0.0 {
        return Validation::Implausible {
            reason: format!("timestamp earlier than previous point by {:.1}s", -elapsed_s),
        };
    }

    // Soft rejection: jitter while stationary.
    if distance_m < params.min_distance_m && sample.speed_kmh < params.min_speed_kmh {
        return Validation::Noise;
    }

    if distance_m > params.max_jump_distance_m && elapsed_s < params.jump_window_s {
        return Validation::Implausible {
            reason: format!("position jump: {distance_m:.0}m in {elapsed_s:.1}s"),
        };
    }

    let computed_speed_kmh = if elapsed_s > 0.0 {
        distance_m / elapsed_s * 3.6
    } else {
        0.0
    };

    if elapsed_s > 0.0 && computed_speed_kmh > params.max_plausible_speed_kmh {
        return Validation::Implausible {
            reason: format!("implausible speed: {computed_speed_kmh:.0} km/h"),
        };
    }

    if sample.accuracy_m > params.max_accuracy_m {
        return Validation::Implausible {
            reason: format!("horizontal accuracy {:.0}m too poor", sample.accuracy_m),
        };
    }

    Validation::Accepted {
        distance_m,
        elapsed_s,
        computed_speed_kmh,
    }
}
