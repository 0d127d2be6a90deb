use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use time::OffsetDateTime;
use uuid::Uuid;

use pulseboard_kernel::alerts::{AlertEvaluator, AlertPipeline};
use pulseboard_kernel::audio::AudioDirector;
use pulseboard_kernel::carousel::Carousel;
use pulseboard_kernel::config::{BoardConfig, ProjectConf};
use pulseboard_kernel::events;
use pulseboard_kernel::health::HealthTracker;
use pulseboard_kernel::http::{build_router, AppState};
use pulseboard_kernel::models::{DeviceObservation, DeviceStatus, DevicesMap};
use pulseboard_kernel::new_state;
use pulseboard_kernel::poller::DevicePoller;
use pulseboard_kernel::store::UiStore;
use pulseboard_kernel::Shared;

/// Fully wired board (minus MQTT) with a throwaway data dir, for driving
/// the HTTP surface through `tower::ServiceExt::oneshot`.
pub struct MockBoard {
    pub router: Router,
    pub devices: Shared<DevicesMap>,
    pub store: Arc<UiStore>,
    pub events: events::EventSender,
    pub state_file: PathBuf,
}

impl MockBoard {
    pub fn new() -> Self {
        Self::with_config(Self::test_config())
    }

    pub fn test_config() -> BoardConfig {
        let mut cfg = BoardConfig::default();
        cfg.projects = vec![
            ProjectConf {
                id: "cyclops-alpha".into(),
                name: Some("Cyclops Alpha".into()),
                hosts: vec!["10.0.0.5".into(), "10.0.0.6".into()],
            },
            ProjectConf {
                id: "skyarmy-east".into(),
                name: None,
                hosts: vec!["10.0.1.9".into()],
            },
        ];
        cfg.data_dir = std::env::temp_dir()
            .join(format!("pulseboard-test-{}", Uuid::new_v4()))
            .to_string_lossy()
            .into_owned();
        cfg
    }

    pub fn with_config(cfg: BoardConfig) -> Self {
        std::fs::create_dir_all(&cfg.data_dir).unwrap();
        let cfg = Arc::new(cfg);
        let events = events::channel();
        let tracker = HealthTracker::new();
        let devices = new_state::<DevicesMap>(HashMap::new());
        let state_file = PathBuf::from(&cfg.data_dir).join("ui-state.json");
        let store = Arc::new(UiStore::open(&state_file, cfg.alerts.ack_duration()));
        let poller = Arc::new(DevicePoller::new(&cfg).unwrap());
        let carousel = Arc::new(Carousel::new(cfg.projects.clone(), events.clone()));
        let director =
            Arc::new(AudioDirector::new(events.clone(), cfg.alerts.throttle(), store.clone()));
        let evaluator = new_state(AlertEvaluator::new());
        let pipeline =
            AlertPipeline::new(carousel.clone(), evaluator, store.clone(), director.clone());

        let app = AppState {
            devices: devices.clone(),
            cfg,
            store: store.clone(),
            poller,
            carousel,
            director,
            pipeline,
            tracker,
            power: None,
            events: events.clone(),
        };
        Self { router: build_router(app), devices, store, events, state_file }
    }

    pub fn seed_device(&self, ip: &str, project_id: &str, status: DeviceStatus, online: u32) {
        let obs = DeviceObservation {
            ip: ip.into(),
            project_id: project_id.into(),
            status,
            total_online: online,
            last_checked: OffsetDateTime::now_utc(),
            error: None,
        };
        self.devices.lock().insert(obs.ip.clone(), obs);
    }
}
