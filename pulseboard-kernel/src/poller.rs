use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::debug;

use crate::alerts::AlertPipeline;
use crate::config::{BoardConfig, HealthConf, HealthPolicy};
use crate::events::{BoardEvent, EventSender};
use crate::health::HealthTracker;
use crate::models::{DeviceObservation, DeviceStatus, DevicesMap, StatusSeries};
use crate::Shared;

/// HTTP prober for the status endpoint every device exposes.
pub struct DevicePoller {
    client: reqwest::Client,
    port: u16,
    status_path: String,
    health: HealthConf,
}

impl DevicePoller {
    pub fn new(cfg: &BoardConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(cfg.poller.timeout()).build()?;
        Ok(Self {
            client,
            port: cfg.poller.port,
            status_path: cfg.poller.status_path.clone(),
            health: cfg.health.clone(),
        })
    }

    fn status_url(&self, ip: &str) -> String {
        format!("http://{}:{}{}", ip, self.port, self.status_path)
    }

    /// One probe, one observation. Timeouts, refused connections, HTTP
    /// errors and bad payloads all become ERROR observations; nothing
    /// bubbles up to the caller.
    pub async fn probe(&self, ip: &str, project_id: &str) -> DeviceObservation {
        let now = OffsetDateTime::now_utc();
        let (status, total_online, error) = match self.fetch_online_count(ip).await {
            Ok(Some(online)) => (classify(&self.health, ip, online), online, None),
            Ok(None) => (DeviceStatus::Error, 0, Some("empty status series".to_string())),
            Err(e) => (DeviceStatus::Error, 0, Some(e)),
        };
        DeviceObservation {
            ip: ip.to_string(),
            project_id: project_id.to_string(),
            status,
            total_online,
            last_checked: now,
            error,
        }
    }

    async fn fetch_online_count(&self, ip: &str) -> Result<Option<u32>, String> {
        let url = self.status_url(ip);
        let resp = self.client.get(&url).send().await.map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status().as_u16()));
        }
        let series: StatusSeries = resp.json().await.map_err(|e| e.to_string())?;
        Ok(series.latest_online())
    }
}

/// Tri-state verdict from an online-unit count. Zero online is always an
/// outage; the warn line depends on the configured policy.
pub fn classify(health: &HealthConf, ip: &str, online: u32) -> DeviceStatus {
    if online == 0 {
        return DeviceStatus::Error;
    }
    match health.policy {
        HealthPolicy::Fixed => {
            if online < health.warn_below {
                DeviceStatus::Warn
            } else {
                DeviceStatus::Ok
            }
        }
        HealthPolicy::Expected => match health.expected_units.get(ip) {
            Some(expected) if *expected > online => {
                if expected - online >= health.offline_tolerance {
                    DeviceStatus::Warn
                } else {
                    DeviceStatus::Ok
                }
            }
            // no expectation recorded (or running above it): nothing to warn about
            _ => DeviceStatus::Ok,
        },
    }
}

/// Fleet sweep on a fixed beat. Devices are probed concurrently, each
/// observation lands in the shared map as it completes, then the active
/// project is evaluated once against the finished cycle.
pub fn spawn_poll_loop(
    poller: Arc<DevicePoller>,
    cfg: Arc<BoardConfig>,
    devices: Shared<DevicesMap>,
    pipeline: AlertPipeline,
    tracker: HealthTracker,
    events: EventSender,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cfg.poller.interval());
        loop {
            interval.tick().await;
            let started = std::time::Instant::now();

            // every probe writes its own observation so a slow device never
            // holds up recording the rest of the cycle
            let mut probes = Vec::new();
            for project in &cfg.projects {
                for ip in &project.hosts {
                    let poller = poller.clone();
                    let devices = devices.clone();
                    let ip = ip.clone();
                    let project_id = project.id.clone();
                    probes.push(tokio::spawn(async move {
                        let obs = poller.probe(&ip, &project_id).await;
                        devices.lock().insert(obs.ip.clone(), obs);
                    }));
                }
            }

            let mut observed = 0usize;
            for probe in probes {
                if probe.await.is_ok() {
                    observed += 1;
                }
            }

            tracker.record_poll_cycle();
            let now = OffsetDateTime::now_utc();
            debug!(
                devices = observed,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "poll cycle done"
            );
            let _ = events.send(BoardEvent::CycleCompleted {
                devices: observed,
                completed_at: now.format(&Rfc3339).unwrap_or_default(),
            });

            let snapshot = devices.lock().clone();
            pipeline.evaluate_active(&snapshot, now);
        }
    });
}
