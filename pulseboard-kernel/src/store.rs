use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};

/// One acknowledgement. Keys are opaque to the store: the board uses device
/// IPs and project ids, but anything the UI sends is accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Operator state that survives restarts: global mute plus the ack table.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedUi {
    #[serde(default)]
    muted: bool,
    #[serde(default)]
    acks: HashMap<String, AckEntry>,
}

/// JSON-file-backed store for operator toggles. Mutations are written
/// through immediately; a failed write is logged and the in-memory state
/// stays authoritative until the next mutation retries it.
pub struct UiStore {
    inner: Mutex<PersistedUi>,
    path: PathBuf,
    ack_duration: Duration,
}

impl UiStore {
    pub fn open(path: impl Into<PathBuf>, ack_duration: Duration) -> Self {
        let path = path.into();
        let inner = match std::fs::read_to_string(&path) {
            Ok(txt) => serde_json::from_str(&txt).unwrap_or_else(|e| {
                warn!(path = %path.display(), "unreadable ui state, starting fresh: {e}");
                PersistedUi::default()
            }),
            Err(_) => PersistedUi::default(),
        };
        Self { inner: Mutex::new(inner), path, ack_duration }
    }

    fn save(&self, inner: &PersistedUi) {
        match serde_json::to_string_pretty(inner) {
            Ok(txt) => {
                if let Err(e) = std::fs::write(&self.path, txt) {
                    warn!(path = %self.path.display(), "failed to save ui state: {e}");
                }
            }
            Err(e) => warn!("failed to serialize ui state: {e}"),
        }
    }

    /// Acknowledge a key for the configured duration, returning the expiry.
    /// Re-acking an already acked key restarts the window.
    pub fn ack(&self, key: &str, now: OffsetDateTime) -> OffsetDateTime {
        let expires_at = now + self.ack_duration;
        let mut inner = self.inner.lock();
        inner.acks.insert(key.to_string(), AckEntry { expires_at });
        self.save(&inner);
        info!(key, "acknowledged until {expires_at}");
        expires_at
    }

    pub fn unack(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.acks.remove(key).is_some();
        if removed {
            self.save(&inner);
            info!(key, "acknowledgement cleared");
        }
        removed
    }

    /// Expiry is enforced at read time; entries are only physically removed
    /// by the sweeper (or a restart), so a slow sweep can never extend an ack.
    pub fn is_acked(&self, key: &str, now: OffsetDateTime) -> bool {
        self.inner
            .lock()
            .acks
            .get(key)
            .map(|entry| entry.expires_at > now)
            .unwrap_or(false)
    }

    pub fn active_acks(&self, now: OffsetDateTime) -> Vec<(String, OffsetDateTime)> {
        let inner = self.inner.lock();
        let mut list: Vec<(String, OffsetDateTime)> = inner
            .acks
            .iter()
            .filter(|(_, entry)| entry.expires_at > now)
            .map(|(key, entry)| (key.clone(), entry.expires_at))
            .collect();
        list.sort();
        list
    }

    pub fn clear_expired(&self, now: OffsetDateTime) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.acks.len();
        inner.acks.retain(|_, entry| entry.expires_at > now);
        let removed = before - inner.acks.len();
        if removed > 0 {
            self.save(&inner);
            debug!(removed, "expired acknowledgements swept");
        }
        removed
    }

    pub fn muted(&self) -> bool {
        self.inner.lock().muted
    }

    pub fn set_muted(&self, muted: bool) -> bool {
        let mut inner = self.inner.lock();
        if inner.muted != muted {
            inner.muted = muted;
            self.save(&inner);
            info!(muted, "global mute changed");
        }
        inner.muted
    }
}

/// Periodic sweep keeping the persisted file from accumulating dead entries.
pub fn spawn_ack_sweeper(store: Arc<UiStore>, every: std::time::Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            store.clear_expired(OffsetDateTime::now_utc());
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use uuid::Uuid;

    fn temp_store(ack_duration: Duration) -> (UiStore, PathBuf) {
        let path = std::env::temp_dir().join(format!("pulseboard-ui-{}.json", Uuid::new_v4()));
        (UiStore::open(&path, ack_duration), path)
    }

    #[test]
    fn ack_expires_without_the_sweeper() {
        let (store, path) = temp_store(Duration::minutes(5));
        let now = datetime!(2026-08-24 12:00:00 UTC);
        let expires = store.ack("10.0.0.5", now);
        assert_eq!(expires, now + Duration::minutes(5));

        assert!(store.is_acked("10.0.0.5", now));
        assert!(store.is_acked("10.0.0.5", now + Duration::minutes(4)));
        // past expiry the entry still exists, but it no longer counts
        assert!(!store.is_acked("10.0.0.5", now + Duration::minutes(6)));
        assert_eq!(store.active_acks(now + Duration::minutes(6)).len(), 0);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn sweep_removes_only_expired_entries() {
        let (store, path) = temp_store(Duration::minutes(5));
        let now = datetime!(2026-08-24 12:00:00 UTC);
        store.ack("10.0.0.5", now);
        store.ack("cyclops-alpha", now + Duration::minutes(3));

        assert_eq!(store.clear_expired(now + Duration::minutes(6)), 1);
        assert!(store.is_acked("cyclops-alpha", now + Duration::minutes(6)));
        assert_eq!(store.clear_expired(now + Duration::minutes(6)), 0);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn unack_is_idempotent() {
        let (store, path) = temp_store(Duration::minutes(5));
        let now = datetime!(2026-08-24 12:00:00 UTC);
        store.ack("10.0.0.5", now);
        assert!(store.unack("10.0.0.5"));
        assert!(!store.unack("10.0.0.5"));
        assert!(!store.is_acked("10.0.0.5", now));

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn state_survives_a_reopen() {
        let (store, path) = temp_store(Duration::minutes(5));
        let now = datetime!(2026-08-24 12:00:00 UTC);
        store.ack("10.0.0.5", now);
        store.set_muted(true);
        drop(store);

        let reopened = UiStore::open(&path, Duration::minutes(5));
        assert!(reopened.muted());
        assert!(reopened.is_acked("10.0.0.5", now + Duration::minutes(1)));
        assert!(!reopened.is_acked("10.0.0.5", now + Duration::minutes(10)));

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn garbage_on_disk_starts_fresh() {
        let path = std::env::temp_dir().join(format!("pulseboard-ui-{}.json", Uuid::new_v4()));
        std::fs::write(&path, "{not json").unwrap();
        let store = UiStore::open(&path, Duration::minutes(5));
        assert!(!store.muted());
        assert_eq!(store.active_acks(OffsetDateTime::now_utc()).len(), 0);

        let _ = std::fs::remove_file(path);
    }
}
