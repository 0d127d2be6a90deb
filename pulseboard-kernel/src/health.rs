use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Liveness snapshot exposed on /system/health.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardHealth {
    pub uptime_seconds: u64,
    pub projects_configured: u32,
    pub devices_tracked: u32,
    pub poll_cycles: u64,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
    pub memory_usage_mb: f32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    poll_cycles: Arc<AtomicU64>,
    mqtt_reconnects: Arc<AtomicU32>,
    mqtt_status: Arc<parking_lot::Mutex<String>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            poll_cycles: Arc::new(AtomicU64::new(0)),
            mqtt_reconnects: Arc::new(AtomicU32::new(0)),
            // stays "disabled" unless a broker is configured
            mqtt_status: Arc::new(parking_lot::Mutex::new("disabled".to_string())),
        }
    }

    pub fn mark_mqtt_connecting(&self) {
        *self.mqtt_status.lock() = "connecting".to_string();
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn mark_mqtt_disconnected(&self) {
        *self.mqtt_status.lock() = "disconnected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn mqtt_connected(&self) -> bool {
        self.mqtt_status.lock().as_str() == "connected"
    }

    pub fn record_poll_cycle(&self) {
        self.poll_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, projects: usize, devices: usize) -> BoardHealth {
        BoardHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            projects_configured: projects as u32,
            devices_tracked: devices as u32,
            poll_cycles: self.poll_cycles.load(Ordering::Relaxed),
            mqtt_status: self.mqtt_status.lock().clone(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
            memory_usage_mb: memory_usage_mb(),
        }
    }
}

fn memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("VmRSS:") {
                    if let Some(kb) = rest.split_whitespace().next().and_then(|v| v.parse::<u64>().ok())
                    {
                        return kb as f32 / 1024.0;
                    }
                }
            }
        }
    }
    0.0
}
