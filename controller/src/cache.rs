//! Completed-Pod Cache: suppresses stragglers the watch filter should
//! have excluded but the event stream occasionally delivers anyway after a
//! pod has already been labelled `completed=true`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const ENTRY_TTL: Duration = Duration::from_secs(60 * 60);
pub(crate) const EXPIRY_INTERVAL: Duration = Duration::from_secs(10 * 60);

#[derive(Default)]
pub struct CompletedPodCache {
    entries: Mutex<HashMap<String, Instant>>,
}

impl CompletedPodCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Records `name` as having had its terminal status already recorded.
    pub fn mark(&self, name: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(name.to_string(), Instant::now());
    }

    /// Non-blocking membership check: has `name` been marked within its TTL?
    /// An entry past TTL is treated as absent even before the background
    /// sweep removes it.
    pub fn seen(&self, name: &str) -> bool {
        match self.entries.lock().unwrap().get(name) {
            Some(marked_at) => marked_at.elapsed() < ENTRY_TTL,
            None => false,
        }
    }

    /// Drops every entry past its TTL. Called on a background tick; never
    /// called from the hot `seen`/`mark` path.
    pub fn expire(&self) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, marked_at| marked_at.elapsed() < ENTRY_TTL);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

/// Runs `cache.expire()` on a fixed interval until the process exits. Meant
/// to be spawned once at startup alongside the event sources.
pub async fn run_expiry_loop(cache: std::sync::Arc<CompletedPodCache>) {
    let mut ticker = tokio::time::interval(EXPIRY_INTERVAL);
    loop {
        ticker.tick().await;
        cache.expire();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unseen_pod_reports_false() {
        let cache = CompletedPodCache::new();
        assert!(!cache.seen("pod-a"));
    }

    #[test]
    fn marked_pod_is_seen() {
        let cache = CompletedPodCache::new();
        cache.mark("pod-a");
        assert!(cache.seen("pod-a"));
        assert!(!cache.seen("pod-b"));
    }

    #[test]
    fn expire_is_a_no_op_within_ttl() {
        let cache = CompletedPodCache::new();
        cache.mark("pod-a");
        cache.expire();
        assert_eq!(cache.len(), 1);
        assert!(cache.seen("pod-a"));
    }
}
