//! Pulseboard kernel - wallboard server for fleets of networked playback devices.
//!
//! Polls every configured device over HTTP, classifies tri-state health,
//! tracks observation staleness, and drives de-duplicated, throttled audio
//! alerting for whatever project the carousel is currently showing. State
//! changes reach the wall display through an SSE event stream.

pub mod alerts;
pub mod audio;
pub mod carousel;
pub mod config;
pub mod events;
pub mod health;
pub mod http;
pub mod models;
pub mod mqtt;
pub mod poller;
pub mod store;

use parking_lot::Mutex;
use std::sync::Arc;

/// Mutex-backed handle shared between background tasks and HTTP handlers.
pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}
