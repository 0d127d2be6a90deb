use std::collections::BTreeSet;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::debug;

use crate::audio::AudioDirector;
use crate::carousel::Carousel;
use crate::models::{DeviceObservation, DevicesMap};
use crate::store::UiStore;
use crate::Shared;

/// A non-acked unhealthy set worth sounding the alarm for. IPs are sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertSignal {
    pub project_id: String,
    pub device_ips: Vec<String>,
}

/// Remembers the last alerting set it saw and only lets a changed,
/// non-empty set through. One instance serves the whole board; its memory
/// is wiped on every carousel move.
#[derive(Debug, Default)]
pub struct AlertEvaluator {
    last_signature: Option<String>,
}

impl AlertEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.last_signature = None;
    }

    /// One evaluation pass over the devices of the active project.
    ///
    /// An acked project contributes an empty set, and the empty set is
    /// recorded like any other: that is what re-arms the evaluator the
    /// moment an ack is lifted. Mute suppresses the signal but never the
    /// bookkeeping.
    pub fn evaluate(
        &mut self,
        project_id: &str,
        devices: &[&DeviceObservation],
        store: &UiStore,
        now: OffsetDateTime,
    ) -> Option<AlertSignal> {
        let mut ips: BTreeSet<&str> = BTreeSet::new();
        if !store.is_acked(project_id, now) {
            for device in devices {
                if device.status.is_alerting() && !store.is_acked(&device.ip, now) {
                    ips.insert(device.ip.as_str());
                }
            }
        }

        let signature =
            format!("{}:{}", project_id, ips.iter().copied().collect::<Vec<_>>().join("|"));
        if self.last_signature.as_deref() == Some(signature.as_str()) {
            return None;
        }
        debug!(project = %project_id, %signature, "alerting set changed");
        self.last_signature = Some(signature);

        if ips.is_empty() {
            return None;
        }
        if store.muted() {
            return None;
        }
        Some(AlertSignal {
            project_id: project_id.to_string(),
            device_ips: ips.into_iter().map(str::to_string).collect(),
        })
    }
}

/// Wiring between the carousel position, the evaluator memory, the ack
/// store and the audio director. Cloned into the poll loop, the rotation
/// task and the HTTP handlers.
#[derive(Clone)]
pub struct AlertPipeline {
    pub carousel: Arc<Carousel>,
    pub evaluator: Shared<AlertEvaluator>,
    pub store: Arc<UiStore>,
    pub director: Arc<AudioDirector>,
}

impl AlertPipeline {
    pub fn new(
        carousel: Arc<Carousel>,
        evaluator: Shared<AlertEvaluator>,
        store: Arc<UiStore>,
        director: Arc<AudioDirector>,
    ) -> Self {
        Self { carousel, evaluator, store, director }
    }

    /// Run one evaluation for whatever project the carousel is showing.
    pub fn evaluate_active(&self, devices: &DevicesMap, now: OffsetDateTime) {
        let Some(project_id) = self.carousel.active_project() else { return };
        let project_devices: Vec<&DeviceObservation> =
            devices.values().filter(|d| d.project_id == project_id).collect();
        let signal =
            self.evaluator.lock().evaluate(&project_id, &project_devices, &self.store, now);
        if let Some(signal) = signal {
            self.director.handle_alert(&signal, now);
        }
    }

    /// Carousel moved: request a (grace-protected) stop, clear evaluator and
    /// throttle memory, then evaluate the incoming project right away.
    pub fn after_navigation(&self, devices: &DevicesMap, now: OffsetDateTime) {
        AudioDirector::spawn_deferred_stop(self.director.clone());
        self.evaluator.lock().reset();
        self.director.on_project_changed();
        self.evaluate_active(devices, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeviceStatus;
    use time::macros::datetime;
    use time::Duration;
    use uuid::Uuid;

    fn store() -> UiStore {
        let path = std::env::temp_dir().join(format!("pulseboard-alerts-{}.json", Uuid::new_v4()));
        UiStore::open(path, Duration::minutes(5))
    }

    fn obs(ip: &str, status: DeviceStatus) -> DeviceObservation {
        DeviceObservation {
            ip: ip.into(),
            project_id: "cyclops-alpha".into(),
            status,
            total_online: 0,
            last_checked: datetime!(2026-08-24 12:00:00 UTC),
            error: None,
        }
    }

    #[test]
    fn same_set_fires_once() {
        let store = store();
        let mut eval = AlertEvaluator::new();
        let now = datetime!(2026-08-24 12:00:00 UTC);
        let a = obs("10.0.0.5", DeviceStatus::Error);
        let b = obs("10.0.0.6", DeviceStatus::Warn);

        let first = eval.evaluate("cyclops-alpha", &[&a, &b], &store, now);
        assert_eq!(
            first.unwrap().device_ips,
            vec!["10.0.0.5".to_string(), "10.0.0.6".to_string()]
        );
        assert!(eval.evaluate("cyclops-alpha", &[&a, &b], &store, now).is_none());
        // same set in a different order is still the same signature
        assert!(eval.evaluate("cyclops-alpha", &[&b, &a], &store, now).is_none());
    }

    #[test]
    fn growing_set_fires_again() {
        let store = store();
        let mut eval = AlertEvaluator::new();
        let now = datetime!(2026-08-24 12:00:00 UTC);
        let a = obs("10.0.0.5", DeviceStatus::Error);
        let b = obs("10.0.0.6", DeviceStatus::Error);

        assert!(eval.evaluate("cyclops-alpha", &[&a], &store, now).is_some());
        let second = eval.evaluate("cyclops-alpha", &[&a, &b], &store, now).unwrap();
        assert_eq!(second.device_ips.len(), 2);
    }

    #[test]
    fn healthy_devices_never_signal() {
        let store = store();
        let mut eval = AlertEvaluator::new();
        let now = datetime!(2026-08-24 12:00:00 UTC);
        let a = obs("10.0.0.5", DeviceStatus::Ok);
        assert!(eval.evaluate("cyclops-alpha", &[&a], &store, now).is_none());
    }

    #[test]
    fn reset_rearms_an_unchanged_set() {
        let store = store();
        let mut eval = AlertEvaluator::new();
        let now = datetime!(2026-08-24 12:00:00 UTC);
        let a = obs("10.0.0.5", DeviceStatus::Error);

        assert!(eval.evaluate("cyclops-alpha", &[&a], &store, now).is_some());
        assert!(eval.evaluate("cyclops-alpha", &[&a], &store, now).is_none());
        eval.reset();
        assert!(eval.evaluate("cyclops-alpha", &[&a], &store, now).is_some());
    }

    #[test]
    fn acked_device_is_excluded_until_unack() {
        let store = store();
        let mut eval = AlertEvaluator::new();
        let now = datetime!(2026-08-24 12:00:00 UTC);
        let a = obs("10.0.0.5", DeviceStatus::Error);

        store.ack("10.0.0.5", now);
        assert!(eval.evaluate("cyclops-alpha", &[&a], &store, now).is_none());

        // unack re-arms: the set changes from empty back to {10.0.0.5}
        store.unack("10.0.0.5");
        let fired = eval.evaluate("cyclops-alpha", &[&a], &store, now).unwrap();
        assert_eq!(fired.device_ips, vec!["10.0.0.5".to_string()]);
    }

    #[test]
    fn ack_expiry_rearms_without_any_call() {
        let store = store();
        let mut eval = AlertEvaluator::new();
        let now = datetime!(2026-08-24 12:00:00 UTC);
        let a = obs("10.0.0.5", DeviceStatus::Error);

        store.ack("10.0.0.5", now);
        assert!(eval.evaluate("cyclops-alpha", &[&a], &store, now).is_none());
        let later = now + Duration::minutes(6);
        assert!(eval.evaluate("cyclops-alpha", &[&a], &store, later).is_some());
    }

    #[test]
    fn project_ack_silences_every_device() {
        let store = store();
        let mut eval = AlertEvaluator::new();
        let now = datetime!(2026-08-24 12:00:00 UTC);
        let a = obs("10.0.0.5", DeviceStatus::Error);
        let b = obs("10.0.0.6", DeviceStatus::Error);

        store.ack("cyclops-alpha", now);
        assert!(eval.evaluate("cyclops-alpha", &[&a, &b], &store, now).is_none());
        store.unack("cyclops-alpha");
        assert_eq!(
            eval.evaluate("cyclops-alpha", &[&a, &b], &store, now).unwrap().device_ips.len(),
            2
        );
    }

    #[test]
    fn mute_swallows_the_signal_but_keeps_the_memory() {
        let store = store();
        let mut eval = AlertEvaluator::new();
        let now = datetime!(2026-08-24 12:00:00 UTC);
        let a = obs("10.0.0.5", DeviceStatus::Error);

        store.set_muted(true);
        assert!(eval.evaluate("cyclops-alpha", &[&a], &store, now).is_none());
        // unmuting alone does not replay an already-recorded set
        store.set_muted(false);
        assert!(eval.evaluate("cyclops-alpha", &[&a], &store, now).is_none());
    }
}
