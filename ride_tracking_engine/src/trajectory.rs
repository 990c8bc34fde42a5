//! Point-history retrieval options and temporal downsampling for compact
//! playback.

use chrono::{DateTime, Utc};
use ride_tracking_lib::track_point::TrackPoint;
use ride_tracking_lib::track_session::TrackSession;
use serde::{Deserialize, Serialize};

/// Simplification only kicks in above this many points.
pub const SIMPLIFY_MIN_POINTS: usize = 100;
pub const DEFAULT_BUCKET_SECONDS: i64 = 30;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub include_invalid: bool,
    pub simplify: bool,
    pub bucket_seconds: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHistory {
    pub session: TrackSession,
    pub points: Vec<TrackPoint>,
}

/// Applies the query's validity/simplification options to an ordered point
/// list (time-range filtering happens in the database query).
pub fn select_points(mut points: Vec<TrackPoint>, query: &HistoryQuery) -> Vec<TrackPoint> {
    if !query.include_invalid {
        points.retain(|p| p.valid);
    }

    if query.simplify && points.len() > SIMPLIFY_MIN_POINTS {
        let bucket = query.bucket_seconds.unwrap_or(DEFAULT_BUCKET_SECONDS).max(1);
        points = simplify_points(points, bucket);
    }

    points
}

/// Temporal downsampling: the first and last points always survive, as does
/// any point carrying a discrete event tag; filler points are kept only when
/// at least `bucket_seconds` have passed since the last kept point.
pub fn simplify_points(points: Vec<TrackPoint>, bucket_seconds: i64) -> Vec<TrackPoint> {
    let len = points.len();
    if len <= 2 {
        return points;
    }

    let mut kept = Vec::new();
    let mut last_kept_at: Option<DateTime<Utc>> = None;

    for (i, point) in points.into_iter().enumerate() {
        let first = i == 0;
        let last = i == len - 1;
        let due = last_kept_at
            .is_none_or(|at| (point.timestamp - at).num_seconds() >= bucket_seconds);

        if first || last || point.event.is_some() || due {
            last_kept_at = Some(point.timestamp);
            kept.push(point);
        }
    }

    kept
}
