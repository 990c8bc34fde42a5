pub mod alerting;
pub mod collaborators;
pub mod database;
mod engine;
pub mod maintenance;
pub mod phase;
mod registry;
pub mod statistics;
pub mod trajectory;
pub mod validator;

pub use engine::*;

pub const DATA_DIR: &str = "data/";

#[derive(Debug)]
pub enum TrackingError {
    Database(String),
    SessionNotFound(i64),
    SessionAlreadyActive(i64),
    SessionState(String),
    Validation(String),
}

impl std::fmt::Display for TrackingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackingError::Database(msg) => write!(f, "database error: {msg}"),
            TrackingError::SessionNotFound(trip_id) => {
                write!(f, "no active tracking session for trip {trip_id}")
            }
            TrackingError::SessionAlreadyActive(trip_id) => {
                write!(f, "trip {trip_id} already has an active tracking session")
            }
            TrackingError::SessionState(msg) => write!(f, "invalid session state: {msg}"),
            TrackingError::Validation(msg) => write!(f, "invalid input: {msg}"),
        }
    }
}

impl std::error::Error for TrackingError {}
