use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

/// Time-bounded set of recently processed message ids. Shared across every
/// session's event handling plus the background sweep.
pub struct DedupCache {
    seen: Mutex<HashMap<String, DateTime<Utc>>>,
    ttl: Duration,
}

impl DedupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn with_ttl_seconds(seconds: u64) -> Self {
        Self::new(Duration::seconds(seconds as i64))
    }

    /// Atomic test-and-set. Returns true when the id is new and was recorded,
    /// false when it was already marked within the TTL window.
    pub fn check_and_mark(&self, message_id: &str, now: DateTime<Utc>) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        if seen.contains_key(message_id) {
            return false;
        }
        seen.insert(message_id.to_string(), now);
        true
    }

    /// Removes every entry older than the TTL.
    pub fn prune(&self, now: DateTime<Utc>) {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        let before = seen.len();
        seen.retain(|_, seen_at| now - *seen_at <= self.ttl);
        let removed = before - seen.len();
        if removed > 0 {
            debug!(removed, "pruned dedup cache");
        }
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn spawn_pruner(cache: Arc<DedupCache>, sweep_interval: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            cache.prune(Utc::now());
        }
    })
}
