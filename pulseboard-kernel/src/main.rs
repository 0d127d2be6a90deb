//! Pulseboard kernel entrypoint.
//!
//! Boot order: config, persisted operator state, pollers and sweepers, MQTT
//! power switch (optional), then the HTTP surface everything is read from.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use pulseboard_kernel::alerts::{AlertEvaluator, AlertPipeline};
use pulseboard_kernel::audio::AudioDirector;
use pulseboard_kernel::carousel::{self, Carousel};
use pulseboard_kernel::config::load_config;
use pulseboard_kernel::events;
use pulseboard_kernel::health::HealthTracker;
use pulseboard_kernel::http::{self, AppState};
use pulseboard_kernel::models::DevicesMap;
use pulseboard_kernel::mqtt::connect_power_switch;
use pulseboard_kernel::new_state;
use pulseboard_kernel::poller::{self, DevicePoller};
use pulseboard_kernel::store::{self, UiStore};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "pulseboard_kernel=info".to_string()),
        )
        .init();

    let cfg = Arc::new(load_config().await);
    if cfg.projects.is_empty() {
        warn!("no projects configured, the board will stay empty");
    }
    info!(
        projects = cfg.projects.len(),
        devices = cfg.device_count(),
        poll_seconds = cfg.poller.interval_seconds,
        "configuration loaded"
    );

    std::fs::create_dir_all(&cfg.data_dir)
        .with_context(|| format!("failed to create data dir {}", cfg.data_dir))?;

    let events = events::channel();
    let tracker = HealthTracker::new();
    let devices = new_state::<DevicesMap>(HashMap::new());
    let store = Arc::new(UiStore::open(
        Path::new(&cfg.data_dir).join("ui-state.json"),
        cfg.alerts.ack_duration(),
    ));
    let poller =
        Arc::new(DevicePoller::new(&cfg).context("failed to build the polling http client")?);
    let carousel = Arc::new(Carousel::new(cfg.projects.clone(), events.clone()));
    let director =
        Arc::new(AudioDirector::new(events.clone(), cfg.alerts.throttle(), store.clone()));
    let evaluator = new_state(AlertEvaluator::new());
    let pipeline = AlertPipeline::new(carousel.clone(), evaluator, store.clone(), director.clone());

    let power = match &cfg.mqtt {
        Some(mqtt_cfg) => {
            info!(host = %mqtt_cfg.host, topic = %mqtt_cfg.topic, "mqtt power switch enabled");
            Some(Arc::new(connect_power_switch(mqtt_cfg, tracker.clone())))
        }
        None => {
            info!("no mqtt section, power control disabled");
            None
        }
    };

    store::spawn_ack_sweeper(store.clone(), cfg.alerts.sweep());
    poller::spawn_poll_loop(
        poller.clone(),
        cfg.clone(),
        devices.clone(),
        pipeline.clone(),
        tracker.clone(),
        events.clone(),
    );
    carousel::spawn_rotation(
        carousel.clone(),
        pipeline.clone(),
        devices.clone(),
        cfg.carousel.rotate(),
    );

    let app_state = AppState {
        devices,
        cfg: cfg.clone(),
        store,
        poller,
        carousel,
        director,
        pipeline,
        tracker,
        power,
        events,
    };
    let app = http::build_router(app_state);

    let listener = TcpListener::bind(cfg.bind.as_str())
        .await
        .with_context(|| format!("failed to bind {}", cfg.bind))?;
    info!("listening on http://{}", cfg.bind);
    axum::serve(listener, app).await.context("http server exited")?;
    Ok(())
}
