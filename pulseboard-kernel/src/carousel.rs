use parking_lot::Mutex;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::info;

use crate::alerts::AlertPipeline;
use crate::config::ProjectConf;
use crate::events::{BoardEvent, EventSender};
use crate::models::DevicesMap;
use crate::Shared;

/// Which project the wall is currently showing. Project order comes from
/// the configuration file and never changes at runtime.
pub struct Carousel {
    projects: Vec<ProjectConf>,
    index: Mutex<usize>,
    events: EventSender,
}

impl Carousel {
    pub fn new(projects: Vec<ProjectConf>, events: EventSender) -> Self {
        Self { projects, index: Mutex::new(0), events }
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    pub fn index(&self) -> usize {
        *self.index.lock()
    }

    pub fn active_project(&self) -> Option<String> {
        self.projects.get(*self.index.lock()).map(|p| p.id.clone())
    }

    pub fn advance(&self) -> Option<String> {
        self.shift(1)
    }

    pub fn step_back(&self) -> Option<String> {
        self.shift(-1)
    }

    fn shift(&self, delta: i64) -> Option<String> {
        if self.projects.is_empty() {
            return None;
        }
        let (active, index) = {
            let mut idx = self.index.lock();
            let len = self.projects.len() as i64;
            *idx = (*idx as i64 + delta).rem_euclid(len) as usize;
            (self.projects[*idx].id.clone(), *idx)
        };
        let _ = self
            .events
            .send(BoardEvent::ProjectChanged { project_id: Some(active.clone()), index });
        Some(active)
    }

    /// Direct jump, used by the dot row under the board. Out-of-range
    /// indices are rejected, not clamped.
    pub fn goto(&self, target: usize) -> bool {
        if target >= self.projects.len() {
            return false;
        }
        *self.index.lock() = target;
        let _ = self.events.send(BoardEvent::ProjectChanged {
            project_id: self.projects.get(target).map(|p| p.id.clone()),
            index: target,
        });
        true
    }
}

/// Auto-rotation: advance on a fixed beat and re-run the alert evaluation
/// for the incoming project. With a single project this still re-arms the
/// evaluator every beat, which is what makes an unresolved outage nag.
pub fn spawn_rotation(
    carousel: Arc<Carousel>,
    pipeline: AlertPipeline,
    devices: Shared<DevicesMap>,
    every: std::time::Duration,
) {
    if carousel.is_empty() {
        return;
    }
    info!(projects = carousel.len(), every_seconds = every.as_secs(), "carousel rotation started");
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await; // the first tick fires immediately, skip it
        loop {
            interval.tick().await;
            carousel.advance();
            let snapshot = devices.lock().clone();
            pipeline.after_navigation(&snapshot, OffsetDateTime::now_utc());
        }
    });
}
