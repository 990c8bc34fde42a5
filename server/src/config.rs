use std::fs;

use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Base URL of the marketplace backend for trip and passenger lookups.
    pub marketplace_base_url: String,
    /// Webhook for notification dispatch. Unset means log-only dispatch.
    pub notification_webhook_url: Option<String>,
    pub log_file: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            marketplace_base_url: "http://localhost:8080".to_string(),
            notification_webhook_url: None,
            log_file: "server/log/server.log".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config = serde_json::from_str(&contents)?;
        Ok(config)
    }
}
