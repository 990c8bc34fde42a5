use std::path::PathBuf;

use chrono::{DateTime, Utc};
use const_format::concatcp;
use geo_types::Point;
use ride_tracking_lib::track_point::{TrackEvent, TrackPoint, TripPhase};
use ride_tracking_lib::track_session::{SessionState, TrackSession};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Executor, Pool, Row, Sqlite, SqlitePool, query, query_as};

use crate::{DATA_DIR, TrackingError};

use super::constants::*;

const DATABASE_FILE: &str = "tracking.db";

#[derive(Clone)]
pub struct TrackingDatabase {
    pool: Pool<Sqlite>,
}

impl TrackingDatabase {
    /// Opens (and creates if missing) the on-disk database under the project
    /// data directory.
    pub async fn connect() -> Result<Self, TrackingError> {
        let root: PathBuf = project_root::get_project_root()
            .map_err(|_| TrackingError::Database("failed to locate project root".to_string()))?;
        let data_dir = root.join(DATA_DIR);
        if !data_dir.exists() {
            std::fs::create_dir_all(&data_dir).map_err(|_| {
                TrackingError::Database(format!("failed to create data directory {data_dir:?}"))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(data_dir.join(DATABASE_FILE))
            .foreign_keys(true)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|_| TrackingError::Database("failed to connect to database".to_string()))?;

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    /// In-memory database on a single connection, for tests.
    pub async fn connect_in_memory() -> Result<Self, TrackingError> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);

        // One connection, or each checkout would see its own empty database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|_| TrackingError::Database("failed to open in-memory database".to_string()))?;

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    async fn init(&self) -> Result<(), TrackingError> {
        self.pool
            .execute(concatcp!(
                "
            CREATE TABLE IF NOT EXISTS ", TRACK_SESSIONS_TABLE_NAME, "(",
                SESSION_ID,  " INTEGER PRIMARY KEY AUTOINCREMENT,",
                TRIP_ID,     " INTEGER NOT NULL,",
                DRIVER_ID,   " INTEGER NOT NULL,",
                START_TIME,  " TIMESTAMP NOT NULL,",
                END_TIME,    " TIMESTAMP,",
                STATE,       " TEXT NOT NULL,",
                LAST_UPDATE, " TIMESTAMP NOT NULL,",
                STATISTICS,  " TEXT NOT NULL,",
                ANALYTICS,   " TEXT,",
                LANDMARKS,   " TEXT NOT NULL,",
                INCIDENTS,   " TEXT NOT NULL,",
                PARAMS,      " TEXT NOT NULL,",
                THRESHOLDS,  " TEXT NOT NULL);

            CREATE TABLE IF NOT EXISTS ", TRACK_POINTS_TABLE_NAME, "(",
                POINT_ID,       " INTEGER PRIMARY KEY AUTOINCREMENT,",
                SESSION_ID,     " INTEGER NOT NULL,",
                LATITUDE,       " REAL NOT NULL,",
                LONGITUDE,      " REAL NOT NULL,",
                TIMESTAMP,      " TIMESTAMP NOT NULL,",
                SPEED,          " REAL NOT NULL,",
                HEADING,        " REAL NOT NULL,",
                ALTITUDE,       " REAL NOT NULL,",
                ACCURACY,       " REAL NOT NULL,",
                SIGNAL_QUALITY, " REAL NOT NULL,",
                BATTERY,        " REAL NOT NULL,",
                PHASE,          " TEXT NOT NULL,",
                EVENT,          " TEXT,",
                DISTANCE_DELTA, " REAL NOT NULL,",
                TIME_DELTA,     " REAL NOT NULL,",
                COMPUTED_SPEED, " REAL NOT NULL,",
                VALID,          " BOOLEAN NOT NULL,",
                INVALID_REASON, " TEXT,
                FOREIGN KEY(", SESSION_ID, ") REFERENCES ", TRACK_SESSIONS_TABLE_NAME, "(", SESSION_ID, ") ON DELETE CASCADE
            )"
            ))
            .await
            .map_err(|_| TrackingError::Database("failed to initialize schema".to_string()))?;
        Ok(())
    }

    pub async fn insert_session(&self, session: &TrackSession) -> Result<i64, TrackingError> {
        query_as::<_, (i64,)>(concatcp!(
            "INSERT INTO ", TRACK_SESSIONS_TABLE_NAME,
            "(", SESSION_ID, ", ", TRIP_ID, ", ", DRIVER_ID, ", ", START_TIME, ", ", END_TIME, ", ",
            STATE, ", ", LAST_UPDATE, ", ", STATISTICS, ", ", ANALYTICS, ", ", LANDMARKS, ", ",
            INCIDENTS, ", ", PARAMS, ", ", THRESHOLDS, ")
            VALUES (NULL, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) RETURNING ", SESSION_ID
        ))
        .bind(session.trip_id)
        .bind(session.driver_id)
        .bind(session.start_time)
        .bind(session.end_time)
        .bind(session.state.as_str())
        .bind(session.last_update)
        .bind(to_json(&session.statistics)?)
        .bind(session.analytics.as_ref().map(to_json).transpose()?)
        .bind(to_json(&session.landmarks)?)
        .bind(to_json(&session.incidents)?)
        .bind(to_json(&session.params)?)
        .bind(to_json(&session.thresholds)?)
        .fetch_one(&self.pool)
        .await
        .map_err(|_| TrackingError::Database("failed to insert session".to_string()))
        .map(|row| row.0)
    }

    pub async fn update_session(&self, session: &TrackSession) -> Result<(), TrackingError> {
        query(concatcp!(
            "UPDATE ", TRACK_SESSIONS_TABLE_NAME, " SET ",
            END_TIME, " = ?1, ", STATE, " = ?2, ", LAST_UPDATE, " = ?3, ",
            STATISTICS, " = ?4, ", ANALYTICS, " = ?5, ", LANDMARKS, " = ?6, ",
            INCIDENTS, " = ?7, ", PARAMS, " = ?8, ", THRESHOLDS, " = ?9
            WHERE ", SESSION_ID, " = ?10"
        ))
        .bind(session.end_time)
        .bind(session.state.as_str())
        .bind(session.last_update)
        .bind(to_json(&session.statistics)?)
        .bind(session.analytics.as_ref().map(to_json).transpose()?)
        .bind(to_json(&session.landmarks)?)
        .bind(to_json(&session.incidents)?)
        .bind(to_json(&session.params)?)
        .bind(to_json(&session.thresholds)?)
        .bind(session.session_id)
        .execute(&self.pool)
        .await
        .map_err(|_| TrackingError::Database("failed to update session".to_string()))
        .map(|_| ())
    }

    pub async fn get_session(&self, session_id: i64) -> Result<TrackSession, TrackingError> {
        let row = query(concatcp!(
            "SELECT * FROM ", TRACK_SESSIONS_TABLE_NAME, " WHERE ", SESSION_ID, " = ?1"
        ))
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|_| TrackingError::Database(format!("failed to get session {session_id}")))?;

        session_from_row(&row)
    }

    /// The most recent session for a trip, in any state.
    pub async fn latest_session_for_trip(
        &self,
        trip_id: i64,
    ) -> Result<Option<TrackSession>, TrackingError> {
        let row = query(concatcp!(
            "SELECT * FROM ", TRACK_SESSIONS_TABLE_NAME, " WHERE ", TRIP_ID, " = ?1
             ORDER BY ", START_TIME, " DESC, ", SESSION_ID, " DESC LIMIT 1"
        ))
        .bind(trip_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|_| TrackingError::Database("failed to query sessions".to_string()))?;

        row.as_ref().map(session_from_row).transpose()
    }

    pub async fn session_for_trip_in_state(
        &self,
        trip_id: i64,
        state: SessionState,
    ) -> Result<Option<TrackSession>, TrackingError> {
        let row = query(concatcp!(
            "SELECT * FROM ", TRACK_SESSIONS_TABLE_NAME,
            " WHERE ", TRIP_ID, " = ?1 AND ", STATE, " = ?2
             ORDER BY ", START_TIME, " DESC, ", SESSION_ID, " DESC LIMIT 1"
        ))
        .bind(trip_id)
        .bind(state.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|_| TrackingError::Database("failed to query sessions".to_string()))?;

        row.as_ref().map(session_from_row).transpose()
    }

    pub async fn insert_point(
        &self,
        session_id: i64,
        point: &TrackPoint,
    ) -> Result<(), TrackingError> {
        query(concatcp!(
            "INSERT INTO ", TRACK_POINTS_TABLE_NAME,
            "(", POINT_ID, ", ", SESSION_ID, ", ", LATITUDE, ", ", LONGITUDE, ", ", TIMESTAMP, ", ",
            SPEED, ", ", HEADING, ", ", ALTITUDE, ", ", ACCURACY, ", ", SIGNAL_QUALITY, ", ",
            BATTERY, ", ", PHASE, ", ", EVENT, ", ", DISTANCE_DELTA, ", ", TIME_DELTA, ", ",
            COMPUTED_SPEED, ", ", VALID, ", ", INVALID_REASON, ")
            VALUES (NULL, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
        ))
        .bind(session_id)
        .bind(point.position.y())
        .bind(point.position.x())
        .bind(point.timestamp)
        .bind(point.speed_kmh)
        .bind(point.heading)
        .bind(point.altitude)
        .bind(point.accuracy_m)
        .bind(point.signal_quality)
        .bind(point.battery_pct)
        .bind(point.phase.as_str())
        .bind(point.event.map(|e| e.as_str()))
        .bind(point.distance_delta_m)
        .bind(point.time_delta_s)
        .bind(point.computed_speed_kmh)
        .bind(point.valid)
        .bind(point.invalid_reason.as_deref())
        .execute(&self.pool)
        .await
        .map_err(|_| TrackingError::Database("failed to insert track point".to_string()))
        .map(|_| ())
    }

    /// All persisted points of a session in capture order.
    pub async fn get_points(&self, session_id: i64) -> Result<Vec<TrackPoint>, TrackingError> {
        let rows = query(concatcp!(
            "SELECT * FROM ", TRACK_POINTS_TABLE_NAME, " WHERE ", SESSION_ID, " = ?1
             ORDER BY ", TIMESTAMP, ", ", POINT_ID
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|_| TrackingError::Database("failed to get track points".to_string()))?;

        rows.iter().map(point_from_row).collect()
    }

    pub async fn stale_active_sessions(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<TrackSession>, TrackingError> {
        let rows = query(concatcp!(
            "SELECT * FROM ", TRACK_SESSIONS_TABLE_NAME,
            " WHERE ", STATE, " = 'active' AND ", LAST_UPDATE, " < ?1"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|_| TrackingError::Database("failed to query stale sessions".to_string()))?;

        rows.iter().map(session_from_row).collect()
    }

    /// Deletes old untagged points of finalized sessions. Event-tagged points
    /// are retained indefinitely.
    pub async fn prune_points_before(&self, cutoff: DateTime<Utc>) -> Result<u64, TrackingError> {
        query(concatcp!(
            "DELETE FROM ", TRACK_POINTS_TABLE_NAME,
            " WHERE ", TIMESTAMP, " < ?1 AND ", EVENT, " IS NULL AND ", SESSION_ID, " IN
                (SELECT ", SESSION_ID, " FROM ", TRACK_SESSIONS_TABLE_NAME,
                " WHERE ", STATE, " IN ('completed', 'interrupted'))"
        ))
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|_| TrackingError::Database("failed to prune track points".to_string()))
        .map(|result| result.rows_affected())
    }

    pub async fn sessions_for_driver(
        &self,
        driver_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TrackSession>, TrackingError> {
        let rows = query(concatcp!(
            "SELECT * FROM ", TRACK_SESSIONS_TABLE_NAME,
            " WHERE ", DRIVER_ID, " = ?1 AND ", START_TIME, " >= ?2 AND ", START_TIME, " <= ?3
             ORDER BY ", START_TIME
        ))
        .bind(driver_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(|_| TrackingError::Database("failed to query driver sessions".to_string()))?;

        rows.iter().map(session_from_row).collect()
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, TrackingError> {
    serde_json::to_string(value)
        .map_err(|e| TrackingError::Database(format!("failed to encode session field: {e}")))
}

fn from_json<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, TrackingError> {
    serde_json::from_str(text)
        .map_err(|e| TrackingError::Database(format!("failed to decode session field: {e}")))
}

fn session_from_row(row: &SqliteRow) -> Result<TrackSession, TrackingError> {
    let state_text: String = row.get(STATE);
    let state = SessionState::parse(&state_text)
        .ok_or_else(|| TrackingError::Database(format!("unknown session state {state_text:?}")))?;

    let analytics: Option<String> = row.get(ANALYTICS);

    Ok(TrackSession {
        session_id: row.get(SESSION_ID),
        trip_id: row.get(TRIP_ID),
        driver_id: row.get(DRIVER_ID),
        start_time: row.get(START_TIME),
        end_time: row.get(END_TIME),
        state,
        last_update: row.get(LAST_UPDATE),
        statistics: from_json(row.get::<String, _>(STATISTICS).as_str())?,
        analytics: analytics.as_deref().map(from_json).transpose()?,
        landmarks: from_json(row.get::<String, _>(LANDMARKS).as_str())?,
        incidents: from_json(row.get::<String, _>(INCIDENTS).as_str())?,
        params: from_json(row.get::<String, _>(PARAMS).as_str())?,
        thresholds: from_json(row.get::<String, _>(THRESHOLDS).as_str())?,
    })
}

fn point_from_row(row: &SqliteRow) -> Result<TrackPoint, TrackingError> {
    let phase_text: String = row.get(PHASE);
    let phase = TripPhase::parse(&phase_text)
        .ok_or_else(|| TrackingError::Database(format!("unknown trip phase {phase_text:?}")))?;

    let event: Option<String> = row.get(EVENT);

    Ok(TrackPoint {
        position: Point::new(row.get::<f64, _>(LONGITUDE), row.get::<f64, _>(LATITUDE)),
        timestamp: row.get(TIMESTAMP),
        speed_kmh: row.get(SPEED),
        heading: row.get(HEADING),
        altitude: row.get(ALTITUDE),
        accuracy_m: row.get(ACCURACY),
        signal_quality: row.get(SIGNAL_QUALITY),
        battery_pct: row.get(BATTERY),
        phase,
        event: event.as_deref().and_then(TrackEvent::parse),
        distance_delta_m: row.get(DISTANCE_DELTA),
        time_delta_s: row.get(TIME_DELTA),
        computed_speed_kmh: row.get(COMPUTED_SPEED),
        valid: row.get(VALID),
        invalid_reason: row.get(INVALID_REASON),
    })
}
