//! Concrete collaborator implementations wired in at composition time: HTTP
//! lookups against the marketplace backend, webhook notification dispatch,
//! and the broadcast-channel publisher behind the websocket feed.

use async_trait::async_trait;
use ride_tracking_engine::collaborators::{
    CollaboratorError, LivePublisher, Notifier, PassengerDirectory, TripDirectory, TripInfo,
};
use ride_tracking_lib::incident::Severity;
use tokio::sync::broadcast;

use crate::server_state::LiveMessage;

pub struct HttpTripDirectory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTripDirectory {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl TripDirectory for HttpTripDirectory {
    async fn trip_info(&self, trip_id: i64) -> Result<TripInfo, CollaboratorError> {
        let url = format!("{}/trips/{trip_id}/tracking-info", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CollaboratorError(format!("trip lookup failed: {e}")))?
            .error_for_status()
            .map_err(|e| CollaboratorError(format!("trip lookup failed: {e}")))?;

        response
            .json()
            .await
            .map_err(|e| CollaboratorError(format!("trip lookup returned bad payload: {e}")))
    }
}

pub struct HttpPassengerDirectory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPassengerDirectory {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl PassengerDirectory for HttpPassengerDirectory {
    async fn onboard_passengers(&self, trip_id: i64) -> Result<Vec<i64>, CollaboratorError> {
        let url = format!("{}/trips/{trip_id}/passengers/onboard", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CollaboratorError(format!("passenger lookup failed: {e}")))?
            .error_for_status()
            .map_err(|e| CollaboratorError(format!("passenger lookup failed: {e}")))?;

        response
            .json()
            .await
            .map_err(|e| CollaboratorError(format!("passenger lookup returned bad payload: {e}")))
    }
}

/// Posts notification events to the configured webhook. Without a webhook
/// the dispatch degrades to a log line, which keeps local development quiet.
pub struct WebhookNotifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl WebhookNotifier {
    pub fn new(client: reqwest::Client, webhook_url: Option<String>) -> Self {
        Self {
            client,
            webhook_url,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(
        &self,
        recipient_id: i64,
        event_type: &str,
        payload: serde_json::Value,
        priority: Severity,
    ) -> Result<(), CollaboratorError> {
        let Some(url) = &self.webhook_url else {
            tracing::debug!(
                "notification ({}) for {recipient_id}: {event_type}",
                priority.as_str()
            );
            return Ok(());
        };

        let body = serde_json::json!({
            "recipient_id": recipient_id,
            "event_type": event_type,
            "payload": payload,
            "priority": priority,
        });

        self.client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CollaboratorError(format!("notification dispatch failed: {e}")))?
            .error_for_status()
            .map_err(|e| CollaboratorError(format!("notification dispatch rejected: {e}")))?;

        Ok(())
    }
}

pub struct BroadcastPublisher {
    tx: broadcast::Sender<LiveMessage>,
}

impl BroadcastPublisher {
    pub fn new(tx: broadcast::Sender<LiveMessage>) -> Self {
        Self { tx }
    }
}

impl LivePublisher for BroadcastPublisher {
    fn publish(&self, topic: &str, payload: String) {
        // A send error just means nobody is subscribed right now.
        let _ = self.tx.send(LiveMessage {
            topic: topic.to_string(),
            payload,
        });
    }
}
