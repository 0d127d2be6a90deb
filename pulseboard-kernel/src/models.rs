use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

/// Tri-state verdict for a polled device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceStatus {
    Ok,
    Warn,
    Error,
}

impl DeviceStatus {
    /// WARN and ERROR both take part in audio alerting.
    pub fn is_alerting(self) -> bool {
        !matches!(self, DeviceStatus::Ok)
    }
}

/// Latest poll result for one device. The shared map keeps exactly one of
/// these per IP; entries are overwritten every cycle and never expire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceObservation {
    pub ip: String,
    pub project_id: String,
    pub status: DeviceStatus,
    pub total_online: u32,
    pub last_checked: OffsetDateTime,
    pub error: Option<String>,
}

pub type DevicesMap = HashMap<String, DeviceObservation>;

/// Wire shape served by the device status endpoint: a series of
/// online-unit samples, most recent sample last.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusSeries {
    pub data: Vec<SeriesPoint>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub total_online: u32,
}

impl StatusSeries {
    pub fn latest_online(&self) -> Option<u32> {
        self.data.last().map(|p| p.total_online)
    }
}

/// API projection of an observation. Staleness is derived at read time so a
/// wedged poll loop shows up on the board without any extra bookkeeping.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceView {
    pub ip: String,
    pub project_id: String,
    pub status: DeviceStatus,
    pub total_online: u32,
    pub last_checked: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub stale: bool,
    pub stale_for_seconds: i64,
}

pub fn is_stale(last_checked: OffsetDateTime, now: OffsetDateTime, stale_after: Duration) -> bool {
    now - last_checked > stale_after
}

pub fn to_view(obs: &DeviceObservation, now: OffsetDateTime, stale_after: Duration) -> DeviceView {
    let age = now - obs.last_checked;
    DeviceView {
        ip: obs.ip.clone(),
        project_id: obs.project_id.clone(),
        status: obs.status,
        total_online: obs.total_online,
        last_checked: obs.last_checked.format(&Rfc3339).unwrap_or_default(),
        error: obs.error.clone(),
        stale: is_stale(obs.last_checked, now, stale_after),
        stale_for_seconds: age.whole_seconds().max(0),
    }
}
