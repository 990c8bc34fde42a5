pub mod alert;
pub mod geo_math;
pub mod incident;
pub mod track_point;
pub mod track_session;
