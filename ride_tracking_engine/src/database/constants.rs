#![allow(dead_code)]

pub const TRACK_SESSIONS_TABLE_NAME: &str = "TrackSessions";
pub const SESSION_ID: &str = "session_id";
pub const TRIP_ID: &str = "trip_id";
pub const DRIVER_ID: &str = "driver_id";
pub const START_TIME: &str = "start_time";
pub const END_TIME: &str = "end_time";
pub const STATE: &str = "state";
pub const LAST_UPDATE: &str = "last_update";
pub const STATISTICS: &str = "statistics";
pub const ANALYTICS: &str = "analytics";
pub const LANDMARKS: &str = "landmarks";
pub const INCIDENTS: &str = "incidents";
pub const PARAMS: &str = "params";
pub const THRESHOLDS: &str = "thresholds";

pub const TRACK_POINTS_TABLE_NAME: &str = "TrackPoints";
pub const POINT_ID: &str = "point_id";
pub const LATITUDE: &str = "latitude";
pub const LONGITUDE: &str = "longitude";
pub const TIMESTAMP: &str = "timestamp";
pub const SPEED: &str = "speed";
pub const HEADING: &str = "heading";
pub const ALTITUDE: &str = "altitude";
pub const ACCURACY: &str = "accuracy";
pub const SIGNAL_QUALITY: &str = "signal_quality";
pub const BATTERY: &str = "battery";
pub const PHASE: &str = "phase";
pub const EVENT: &str = "event";
pub const DISTANCE_DELTA: &str = "distance_delta";
pub const TIME_DELTA: &str = "time_delta";
pub const COMPUTED_SPEED: &str = "computed_speed";
pub const VALID: &str = "valid";
pub const INVALID_REASON: &str = "invalid_reason";
