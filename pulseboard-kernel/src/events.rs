use serde::Serialize;
use tokio::sync::broadcast;

use crate::audio::SoundFlavor;

pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Everything the wall display reacts to, fanned out over SSE. Slow or
/// absent subscribers just miss events; the board state itself stays in the
/// REST resources.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum BoardEvent {
    /// The display should start the alarm for this project.
    AlertStarted {
        project_id: String,
        flavor: SoundFlavor,
        sound: String,
        device_ips: Vec<String>,
        looped: bool,
    },
    /// The display should stop all alarm playback.
    AlertStopped,
    /// The poller finished a sweep over the whole fleet.
    CycleCompleted { devices: usize, completed_at: String },
    /// Carousel moved to another project.
    ProjectChanged { project_id: Option<String>, index: usize },
}

pub type EventSender = broadcast::Sender<BoardEvent>;

pub fn channel() -> EventSender {
    broadcast::channel(EVENT_CHANNEL_CAPACITY).0
}
