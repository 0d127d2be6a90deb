use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::fs;
use tracing::warn;

/// Whole-board configuration, loaded once at startup from a YAML file.
/// Every section is optional; a missing or broken file yields a board with
/// no projects rather than a dead process.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct BoardConfig {
    /// Carousel order is the file order.
    #[serde(default)]
    pub projects: Vec<ProjectConf>,
    #[serde(default)]
    pub poller: PollerConf,
    #[serde(default)]
    pub health: HealthConf,
    #[serde(default)]
    pub alerts: AlertConf,
    #[serde(default)]
    pub carousel: CarouselConf,
    #[serde(default)]
    pub mqtt: Option<MqttConf>,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProjectConf {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub hosts: Vec<String>,
}

impl ProjectConf {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PollerConf {
    pub port: u16,
    pub status_path: String,
    pub interval_seconds: u64,
    pub timeout_seconds: u64,
    pub stale_after_seconds: u64,
}

impl Default for PollerConf {
    fn default() -> Self {
        Self {
            port: 8084,
            status_path: "/api/v1/adb-controller/status-all-devices".into(),
            interval_seconds: 15,
            timeout_seconds: 30,
            stale_after_seconds: 45,
        }
    }
}

impl PollerConf {
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_seconds)
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_seconds)
    }

    pub fn stale_after(&self) -> time::Duration {
        time::Duration::seconds(self.stale_after_seconds as i64)
    }
}

/// How an online-unit count turns into a verdict. `fixed` warns below an
/// absolute floor; `expected` warns once enough of a device's expected units
/// have dropped off. Zero online is always ERROR.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HealthConf {
    pub policy: HealthPolicy,
    pub warn_below: u32,
    pub offline_tolerance: u32,
    pub expected_units: HashMap<String, u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthPolicy {
    Fixed,
    Expected,
}

impl Default for HealthConf {
    fn default() -> Self {
        Self {
            policy: HealthPolicy::Fixed,
            warn_below: 5,
            offline_tolerance: 5,
            expected_units: HashMap::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AlertConf {
    pub throttle_seconds: u64,
    pub ack_minutes: i64,
    pub sweep_seconds: u64,
}

impl Default for AlertConf {
    fn default() -> Self {
        Self { throttle_seconds: 30, ack_minutes: 5, sweep_seconds: 60 }
    }
}

impl AlertConf {
    pub fn throttle(&self) -> time::Duration {
        time::Duration::seconds(self.throttle_seconds as i64)
    }

    pub fn ack_duration(&self) -> time::Duration {
        time::Duration::minutes(self.ack_minutes)
    }

    pub fn sweep(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_seconds)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CarouselConf {
    pub rotate_seconds: u64,
}

impl Default for CarouselConf {
    fn default() -> Self {
        Self { rotate_seconds: 60 }
    }
}

impl CarouselConf {
    pub fn rotate(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.rotate_seconds)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MqttConf {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_power_topic")]
    pub topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_power_topic() -> String {
    "wallboard/power".into()
}

fn default_data_dir() -> String {
    "./data".into()
}

fn default_bind() -> String {
    "0.0.0.0:8080".into()
}

impl BoardConfig {
    pub fn project(&self, id: &str) -> Option<&ProjectConf> {
        self.projects.iter().find(|p| p.id == id)
    }

    pub fn project_of(&self, ip: &str) -> Option<&ProjectConf> {
        self.projects.iter().find(|p| p.hosts.iter().any(|h| h == ip))
    }

    pub fn device_count(&self) -> usize {
        self.projects.iter().map(|p| p.hosts.len()).sum()
    }
}

/// Accent color the board paints a project's panel with. Matching is
/// substring-based so `cyclops-alpha` and `cyclops-bravo` share a color.
pub fn project_accent(project_id: &str) -> &'static str {
    let id = project_id.to_lowercase();
    if id.contains("cyclops") {
        "#1877F2"
    } else if id.contains("defiant") || id.contains("volvo") {
        "#00FEA8"
    } else if id.contains("skyarmy") {
        "#F42D2D"
    } else if id.contains("enigma") {
        "#FE9F00"
    } else if id.contains("deimos") {
        "#D92F20"
    } else {
        "#1877F2"
    }
}

pub async fn load_config() -> BoardConfig {
    let path = std::env::var("PULSEBOARD_CONFIG").unwrap_or_else(|_| "pulseboard.yaml".into());
    if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        if txt.trim().is_empty() {
            return BoardConfig::default();
        }
        serde_yaml::from_str(&txt).unwrap_or_else(|e| {
            warn!("invalid config {path}: {e}");
            BoardConfig::default()
        })
    } else {
        warn!("no {path}, using default config");
        BoardConfig::default()
    }
}
