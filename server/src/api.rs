use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Duration, Utc};
use geo_types::Point;
use serde::Deserialize;

use ride_tracking_engine::TrackingError;
use ride_tracking_engine::trajectory::HistoryQuery;
use ride_tracking_lib::alert::AlertThresholds;
use ride_tracking_lib::incident::IncidentKind;
use ride_tracking_lib::track_point::PositionSample;
use ride_tracking_lib::track_session::SessionParams;

use crate::server_state::ServerState;

fn error_response(err: TrackingError) -> Response {
    let status = match &err {
        TrackingError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        TrackingError::SessionAlreadyActive(_) | TrackingError::SessionState(_) => {
            StatusCode::CONFLICT
        }
        TrackingError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        TrackingError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!("request failed: {err}");
    }
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}

#[derive(Deserialize)]
pub struct StartSessionRequest {
    pub driver_id: i64,
    #[serde(default)]
    pub params: Option<SessionParams>,
}

pub async fn start_session(
    State(state): State<Arc<ServerState>>,
    Path(trip_id): Path<i64>,
    Json(request): Json<StartSessionRequest>,
) -> Response {
    match state
        .engine
        .start_session(trip_id, request.driver_id, request.params)
        .await
    {
        Ok(session) => Json(session).into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn ingest_position(
    State(state): State<Arc<ServerState>>,
    Path(trip_id): Path<i64>,
    Json(sample): Json<PositionSample>,
) -> Response {
    match state.engine.ingest_position(trip_id, sample).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn end_session(
    State(state): State<Arc<ServerState>>,
    Path(trip_id): Path<i64>,
) -> Response {
    match state.engine.end_session(trip_id).await {
        Ok(session) => Json(session).into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn pause_session(
    State(state): State<Arc<ServerState>>,
    Path(trip_id): Path<i64>,
) -> Response {
    match state.engine.pause_session(trip_id).await {
        Ok(session) => Json(session).into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn resume_session(
    State(state): State<Arc<ServerState>>,
    Path(trip_id): Path<i64>,
) -> Response {
    match state.engine.resume_session(trip_id).await {
        Ok(session) => Json(session).into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn get_history(
    State(state): State<Arc<ServerState>>,
    Path(trip_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    match state.engine.get_history(trip_id, query).await {
        Ok(history) => Json(history).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Deserialize)]
pub struct ReportIncidentRequest {
    pub kind: IncidentKind,
    pub description: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

pub async fn report_incident(
    State(state): State<Arc<ServerState>>,
    Path(trip_id): Path<i64>,
    Json(request): Json<ReportIncidentRequest>,
) -> Response {
    let position = match (request.longitude, request.latitude) {
        (Some(lon), Some(lat)) => Some(Point::new(lon, lat)),
        _ => None,
    };
    match state
        .engine
        .report_incident(trip_id, request.kind, request.description, position)
        .await
    {
        Ok(incident) => Json(incident).into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn resolve_incident(
    State(state): State<Arc<ServerState>>,
    Path((trip_id, index)): Path<(i64, usize)>,
) -> Response {
    match state.engine.resolve_incident(trip_id, index).await {
        Ok(incident) => Json(incident).into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn configure_thresholds(
    State(state): State<Arc<ServerState>>,
    Path(trip_id): Path<i64>,
    Json(thresholds): Json<AlertThresholds>,
) -> Response {
    match state
        .engine
        .configure_alert_thresholds(trip_id, thresholds)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn live_status(
    State(state): State<Arc<ServerState>>,
    Path(trip_id): Path<i64>,
) -> Response {
    match state.engine.live_status(trip_id).await {
        Ok(status) => Json(status).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Deserialize)]
pub struct SummaryQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

pub async fn driver_summary(
    State(state): State<Arc<ServerState>>,
    Path(driver_id): Path<i64>,
    Query(query): Query<SummaryQuery>,
) -> Response {
    // Default period: the last 30 days.
    let to = query.to.unwrap_or_else(Utc::now);
    let from = query.from.unwrap_or(to - Duration::days(30));
    match state.engine.driver_summary(driver_id, from, to).await {
        Ok(summary) => Json(summary).into_response(),
        Err(err) => error_response(err),
    }
}
