use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};

use crate::alerts::AlertSignal;
use crate::events::{BoardEvent, EventSender};
use crate::store::UiStore;

/// Stop requests are deferred this long so the evaluation that follows a
/// carousel move can start its own playback first.
pub const STOP_DEFER_MS: u64 = 100;

/// A playback started less than this long ago survives a deferred stop.
pub const PLAY_GUARD_MS: i64 = 150;

/// Which alarm asset a project gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoundFlavor {
    Cyclops,
    #[serde(rename = "default")]
    Standard,
}

impl SoundFlavor {
    pub const ALL: [SoundFlavor; 2] = [SoundFlavor::Cyclops, SoundFlavor::Standard];

    pub fn for_project(project_id: &str) -> Self {
        if project_id.to_lowercase().contains("cyclops") {
            SoundFlavor::Cyclops
        } else {
            SoundFlavor::Standard
        }
    }

    /// Asset path the display loads for this flavor.
    pub fn sound(self) -> &'static str {
        match self {
            SoundFlavor::Cyclops => "/sounds/mixkit-city-alert-siren-loop-1008.wav",
            SoundFlavor::Standard => "/sounds/mixkit-security-facility-breach-alarm-994.wav",
        }
    }
}

/// What became of an alert handed to the director.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayOutcome {
    Started(SoundFlavor),
    Throttled,
    Muted,
    Locked,
    NotReady,
}

#[derive(Debug, Default)]
struct DirectorState {
    unlocked: bool,
    ready: HashMap<SoundFlavor, bool>,
    playing: Option<SoundFlavor>,
    playing_project: Option<String>,
    play_started: Option<OffsetDateTime>,
    last_played: Option<OffsetDateTime>,
    pending: BTreeSet<String>,
    last_error: Option<String>,
}

/// Decides whether an alert actually makes noise. Playback itself happens on
/// the display; the director owns the unlock gate, the global throttle
/// window, the pending ledger and the stop grace, and tells the display what
/// to do through [`BoardEvent`]s.
pub struct AudioDirector {
    state: Mutex<DirectorState>,
    events: EventSender,
    throttle: Duration,
    store: Arc<UiStore>,
}

impl AudioDirector {
    pub fn new(events: EventSender, throttle: Duration, store: Arc<UiStore>) -> Self {
        Self { state: Mutex::new(DirectorState::default()), events, throttle, store }
    }

    /// Full state machine for an evaluator-issued alert.
    pub fn handle_alert(&self, signal: &AlertSignal, now: OffsetDateTime) -> PlayOutcome {
        if self.store.muted() {
            debug!(project = %signal.project_id, "alert dropped, board is muted");
            return PlayOutcome::Muted;
        }

        let flavor = SoundFlavor::for_project(&signal.project_id);
        let mut st = self.state.lock();

        if let Some(last) = st.last_played {
            if now - last < self.throttle {
                let key = match signal.device_ips.first() {
                    Some(ip) => format!("{}:{}", signal.project_id, ip),
                    None => signal.project_id.clone(),
                };
                st.pending.insert(key);
                debug!(project = %signal.project_id, "alert throttled");
                return PlayOutcome::Throttled;
            }
        }

        if !st.unlocked {
            warn!(project = %signal.project_id, "audio still locked, alert stays silent");
            return PlayOutcome::Locked;
        }
        if !st.ready.get(&flavor).copied().unwrap_or(false) {
            warn!(project = %signal.project_id, ?flavor, "sound not loaded on the display yet");
            return PlayOutcome::NotReady;
        }

        st.playing = Some(flavor);
        st.playing_project = Some(signal.project_id.clone());
        st.play_started = Some(now);
        st.last_played = Some(now);
        st.pending.clear();
        drop(st);

        let _ = self.events.send(BoardEvent::AlertStarted {
            project_id: signal.project_id.clone(),
            flavor,
            sound: flavor.sound().to_string(),
            device_ips: signal.device_ips.clone(),
            looped: true,
        });
        info!(project = %signal.project_id, ?flavor, "alert playback started");
        PlayOutcome::Started(flavor)
    }

    /// One-shot chirp for the operator's audio test button. Skips throttle
    /// bookkeeping entirely so a test never silences a real alert.
    pub fn test_sound(&self, project_id: &str) -> PlayOutcome {
        if self.store.muted() {
            return PlayOutcome::Muted;
        }
        let flavor = SoundFlavor::for_project(project_id);
        {
            let st = self.state.lock();
            if !st.unlocked {
                return PlayOutcome::Locked;
            }
            if !st.ready.get(&flavor).copied().unwrap_or(false) {
                return PlayOutcome::NotReady;
            }
        }
        let _ = self.events.send(BoardEvent::AlertStarted {
            project_id: project_id.to_string(),
            flavor,
            sound: flavor.sound().to_string(),
            device_ips: Vec::new(),
            looped: false,
        });
        PlayOutcome::Started(flavor)
    }

    /// Deferred stop used on carousel navigation. The grace window lets an
    /// alert that fired for the incoming project survive the teardown of the
    /// outgoing one.
    pub fn spawn_deferred_stop(director: Arc<AudioDirector>) {
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(STOP_DEFER_MS)).await;
            director.resolve_stop(OffsetDateTime::now_utc());
        });
    }

    fn resolve_stop(&self, now: OffsetDateTime) {
        let mut st = self.state.lock();
        st.pending.clear();
        let fresh_start = st
            .play_started
            .map(|t| now - t < Duration::milliseconds(PLAY_GUARD_MS))
            .unwrap_or(false);
        if fresh_start {
            debug!("stop landed mid-start, keeping current playback");
            return;
        }
        st.playing = None;
        st.playing_project = None;
        st.play_started = None;
        drop(st);
        let _ = self.events.send(BoardEvent::AlertStopped);
    }

    /// Immediate stop, no grace. Used when the operator mutes the board.
    pub fn stop_now(&self) {
        let mut st = self.state.lock();
        st.playing = None;
        st.playing_project = None;
        st.play_started = None;
        st.pending.clear();
        drop(st);
        let _ = self.events.send(BoardEvent::AlertStopped);
    }

    /// Carousel navigation resets throttle memory so the incoming project
    /// can alert right away.
    pub fn on_project_changed(&self) {
        let mut st = self.state.lock();
        st.last_played = None;
        st.pending.clear();
        st.last_error = None;
    }

    /// The display reported a user gesture; alarms may start from now on.
    pub fn set_unlocked(&self) {
        let mut st = self.state.lock();
        if !st.unlocked {
            st.unlocked = true;
            info!("audio unlocked by operator gesture");
        }
    }

    /// The display reported the load state of one alarm asset.
    pub fn set_ready(&self, flavor: SoundFlavor, ready: bool, error: Option<String>) {
        let mut st = self.state.lock();
        st.ready.insert(flavor, ready);
        if let Some(e) = error {
            warn!(?flavor, "display reported audio problem: {e}");
            st.last_error = Some(e);
        }
    }

    pub fn status(&self, now: OffsetDateTime) -> AudioStatus {
        let st = self.state.lock();
        let throttle_remaining_seconds = st
            .last_played
            .map(|t| (self.throttle - (now - t)).whole_seconds().max(0))
            .unwrap_or(0);
        AudioStatus {
            unlocked: st.unlocked,
            muted: self.store.muted(),
            playing: st.playing,
            playing_project: st.playing_project.clone(),
            flavors: SoundFlavor::ALL
                .iter()
                .map(|f| FlavorStatus {
                    flavor: *f,
                    ready: st.ready.get(f).copied().unwrap_or(false),
                    sound: f.sound().to_string(),
                })
                .collect(),
            pending: st.pending.iter().cloned().collect(),
            last_error: st.last_error.clone(),
            throttle_remaining_seconds,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStatus {
    pub unlocked: bool,
    pub muted: bool,
    pub playing: Option<SoundFlavor>,
    pub playing_project: Option<String>,
    pub flavors: Vec<FlavorStatus>,
    /// Alerts swallowed by the throttle window, kept for diagnostics only.
    pub pending: Vec<String>,
    pub last_error: Option<String>,
    pub throttle_remaining_seconds: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlavorStatus {
    pub flavor: SoundFlavor,
    pub ready: bool,
    pub sound: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use time::macros::datetime;
    use uuid::Uuid;

    fn director() -> (Arc<AudioDirector>, EventSender) {
        let path = std::env::temp_dir().join(format!("pulseboard-audio-{}.json", Uuid::new_v4()));
        let store = Arc::new(UiStore::open(path, Duration::minutes(5)));
        let sender = events::channel();
        (Arc::new(AudioDirector::new(sender.clone(), Duration::seconds(30), store)), sender)
    }

    fn armed() -> (Arc<AudioDirector>, EventSender) {
        let (d, sender) = director();
        d.set_unlocked();
        d.set_ready(SoundFlavor::Cyclops, true, None);
        d.set_ready(SoundFlavor::Standard, true, None);
        (d, sender)
    }

    fn signal(project: &str, ip: &str) -> AlertSignal {
        AlertSignal { project_id: project.into(), device_ips: vec![ip.into()] }
    }

    #[test]
    fn locked_director_never_plays() {
        let (d, _sender) = director();
        let now = datetime!(2026-08-24 12:00:00 UTC);
        assert_eq!(d.handle_alert(&signal("cyclops-alpha", "10.0.0.5"), now), PlayOutcome::Locked);
        d.set_unlocked();
        assert_eq!(d.handle_alert(&signal("cyclops-alpha", "10.0.0.5"), now), PlayOutcome::NotReady);
    }

    #[test]
    fn cyclops_projects_get_the_siren() {
        assert_eq!(SoundFlavor::for_project("cyclops-alpha"), SoundFlavor::Cyclops);
        assert_eq!(SoundFlavor::for_project("CYCLOPS"), SoundFlavor::Cyclops);
        assert_eq!(SoundFlavor::for_project("skyarmy-east"), SoundFlavor::Standard);
    }

    #[test]
    fn second_alert_inside_the_window_is_throttled() {
        let (d, sender) = armed();
        let mut rx = sender.subscribe();
        let now = datetime!(2026-08-24 12:00:00 UTC);

        assert_eq!(
            d.handle_alert(&signal("cyclops-alpha", "10.0.0.5"), now),
            PlayOutcome::Started(SoundFlavor::Cyclops)
        );
        assert!(matches!(rx.try_recv().unwrap(), BoardEvent::AlertStarted { looped: true, .. }));

        assert_eq!(
            d.handle_alert(&signal("skyarmy-east", "10.0.1.9"), now + Duration::seconds(10)),
            PlayOutcome::Throttled
        );
        assert!(rx.try_recv().is_err());
        let status = d.status(now + Duration::seconds(10));
        assert_eq!(status.pending, vec!["skyarmy-east:10.0.1.9".to_string()]);
        assert_eq!(status.throttle_remaining_seconds, 20);

        // outside the window the next alert goes through again
        assert_eq!(
            d.handle_alert(&signal("skyarmy-east", "10.0.1.9"), now + Duration::seconds(31)),
            PlayOutcome::Started(SoundFlavor::Standard)
        );
        assert!(d.status(now + Duration::seconds(31)).pending.is_empty());
    }

    #[test]
    fn project_change_resets_the_throttle() {
        let (d, _sender) = armed();
        let now = datetime!(2026-08-24 12:00:00 UTC);
        d.handle_alert(&signal("cyclops-alpha", "10.0.0.5"), now);
        d.on_project_changed();
        assert_eq!(
            d.handle_alert(&signal("skyarmy-east", "10.0.1.9"), now + Duration::seconds(1)),
            PlayOutcome::Started(SoundFlavor::Standard)
        );
    }

    #[test]
    fn deferred_stop_spares_a_fresh_start() {
        let (d, sender) = armed();
        let mut rx = sender.subscribe();
        let now = datetime!(2026-08-24 12:00:00 UTC);
        d.handle_alert(&signal("cyclops-alpha", "10.0.0.5"), now);
        let _ = rx.try_recv();

        // stop resolves 100ms after a play that started 50ms earlier
        d.resolve_stop(now + Duration::milliseconds(50));
        assert!(rx.try_recv().is_err(), "fresh playback must survive the stop");
        assert_eq!(d.status(now).playing, Some(SoundFlavor::Cyclops));

        // a later stop tears it down
        d.resolve_stop(now + Duration::milliseconds(400));
        assert!(matches!(rx.try_recv().unwrap(), BoardEvent::AlertStopped));
        assert_eq!(d.status(now).playing, None);
    }

    #[test]
    fn mute_stops_immediately_and_blocks_new_alerts() {
        let (d, sender) = armed();
        let mut rx = sender.subscribe();
        let now = datetime!(2026-08-24 12:00:00 UTC);
        d.handle_alert(&signal("cyclops-alpha", "10.0.0.5"), now);
        let _ = rx.try_recv();

        d.store.set_muted(true);
        d.stop_now();
        assert!(matches!(rx.try_recv().unwrap(), BoardEvent::AlertStopped));
        assert_eq!(
            d.handle_alert(&signal("cyclops-alpha", "10.0.0.5"), now + Duration::seconds(60)),
            PlayOutcome::Muted
        );
    }

    #[test]
    fn test_sound_skips_the_throttle_and_leaves_it_alone() {
        let (d, sender) = armed();
        let mut rx = sender.subscribe();
        let now = datetime!(2026-08-24 12:00:00 UTC);
        d.handle_alert(&signal("cyclops-alpha", "10.0.0.5"), now);
        let _ = rx.try_recv();

        assert_eq!(d.test_sound("skyarmy-east"), PlayOutcome::Started(SoundFlavor::Standard));
        assert!(matches!(rx.try_recv().unwrap(), BoardEvent::AlertStarted { looped: false, .. }));

        // the real throttle window is still in force afterwards
        assert_eq!(
            d.handle_alert(&signal("skyarmy-east", "10.0.1.9"), now + Duration::seconds(5)),
            PlayOutcome::Throttled
        );
    }
}
