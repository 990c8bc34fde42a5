use ride_tracking_engine::TrackingEngine;
use tokio::sync::broadcast;

/// One frame on the live channel: a trip topic plus a JSON payload.
#[derive(Clone)]
pub struct LiveMessage {
    pub topic: String,
    pub payload: String,
}

pub struct ServerState {
    // Channel used to fan live updates out to websocket subscribers.
    pub tx: broadcast::Sender<LiveMessage>,
    pub engine: TrackingEngine,
}
