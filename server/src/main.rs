use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use ride_tracking_engine::{TrackingEngine, maintenance};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use server::collaborators::{
    BroadcastPublisher, HttpPassengerDirectory, HttpTripDirectory, WebhookNotifier,
};
use server::config::ServerConfig;
use server::server_state::ServerState;
use server::{api, live};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::load(&path)?,
        None => ServerConfig::default(),
    };

    if let Some(log_dir) = Path::new(&config.log_file).parent() {
        std::fs::create_dir_all(log_dir)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_file)?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| format!("{}=info,ride_tracking_engine=info", env!("CARGO_CRATE_NAME")).into())
        )
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file))
        .init();

    tracing::info!("starting tracking server...");

    // Channel behind the live websocket feed; the engine publishes into it.
    let (tx, _rx) = broadcast::channel(100);

    let client = reqwest::Client::new();
    let engine = TrackingEngine::start(
        Arc::new(HttpTripDirectory::new(
            client.clone(),
            config.marketplace_base_url.clone(),
        )),
        Arc::new(HttpPassengerDirectory::new(
            client.clone(),
            config.marketplace_base_url.clone(),
        )),
        Arc::new(WebhookNotifier::new(
            client,
            config.notification_webhook_url.clone(),
        )),
        Arc::new(BroadcastPublisher::new(tx.clone())),
    )
    .await?;

    maintenance::spawn(engine.clone());

    let server_state = Arc::new(ServerState { tx, engine });

    let app = Router::new()
        .route("/session/{trip_id}/start", post(api::start_session))
        .route("/session/{trip_id}/position", post(api::ingest_position))
        .route("/session/{trip_id}/end", post(api::end_session))
        .route("/session/{trip_id}/pause", post(api::pause_session))
        .route("/session/{trip_id}/resume", post(api::resume_session))
        .route("/session/{trip_id}/history", get(api::get_history))
        .route("/session/{trip_id}/incident", post(api::report_incident))
        .route(
            "/session/{trip_id}/incident/{index}/resolve",
            post(api::resolve_incident),
        )
        .route("/session/{trip_id}/thresholds", put(api::configure_thresholds))
        .route("/session/{trip_id}/live", get(api::live_status))
        .route("/driver/{driver_id}/summary", get(api::driver_summary))
        .route("/live/{trip_id}/ws", get(live::live_feed))
        .with_state(server_state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
