//! Per-task observation cache.
//!
//! Keyed by `(context_id, url, dom_fingerprint)`. A significant DOM
//! mutation invalidates an entry even when its TTL has not expired; a
//! no-progress streak suppresses decision reuse without touching the
//! perception entries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use ghostpilot_core_types::{ContextId, RawDecision};
use serde::{Deserialize, Serialize};

use crate::model::{AxExtraction, InteractiveElement, ScreenshotData};

pub const DEFAULT_TTL_MS: u64 = 60_000;
pub const DEFAULT_MAX_ENTRIES: usize = 64;

/// Perception payload stored per page state.
#[derive(Clone, Debug)]
pub struct CachedPerception {
    pub index: Vec<InteractiveElement>,
    pub tree: AxExtraction,
}

/// Last accepted decision for a page state.
#[derive(Clone, Debug)]
pub struct CachedDecision {
    pub decision: RawDecision,
    pub fingerprint: u64,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
struct CacheKey {
    context: String,
    url: String,
    dom_fingerprint: u64,
}

struct Entry {
    perception: Option<CachedPerception>,
    screenshot: Option<ScreenshotData>,
    decision: Option<CachedDecision>,
    captured_at: Instant,
}

/// Hit counters reported in step records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub perception_hits: u64,
    pub decision_hits: u64,
    pub screenshot_hits: u64,
    pub max_entries: usize,
    pub ttl_ms: u64,
}

pub struct ObservationCache {
    context: ContextId,
    entries: DashMap<CacheKey, Entry>,
    ttl_ms: AtomicU64,
    max_entries: usize,
    perception_hits: AtomicU64,
    decision_hits: AtomicU64,
    screenshot_hits: AtomicU64,
}

impl ObservationCache {
    pub fn new(context: ContextId, ttl: Duration, max_entries: usize) -> Self {
        Self {
            context,
            entries: DashMap::new(),
            ttl_ms: AtomicU64::new(ttl.as_millis().min(u128::from(u64::MAX)) as u64),
            max_entries: max_entries.max(1),
            perception_hits: AtomicU64::new(0),
            decision_hits: AtomicU64::new(0),
            screenshot_hits: AtomicU64::new(0),
        }
    }

    pub fn set_ttl(&self, ttl: Duration) {
        self.ttl_ms
            .store(ttl.as_millis().min(u128::from(u64::MAX)) as u64, Ordering::Relaxed);
    }

    fn key(&self, url: &str, dom_fingerprint: u64) -> CacheKey {
        CacheKey {
            context: self.context.as_str().to_string(),
            url: url.to_string(),
            dom_fingerprint,
        }
    }

    fn fresh(&self, entry: &Entry) -> bool {
        let ttl = Duration::from_millis(self.ttl_ms.load(Ordering::Relaxed));
        entry.captured_at.elapsed() <= ttl
    }

    pub fn put_perception(&self, url: &str, dom_fingerprint: u64, perception: CachedPerception) {
        self.evict_if_full();
        let key = self.key(url, dom_fingerprint);
        let mut entry = self.entries.entry(key).or_insert_with(|| Entry {
            perception: None,
            screenshot: None,
            decision: None,
            captured_at: Instant::now(),
        });
        entry.perception = Some(perception);
        entry.captured_at = Instant::now();
    }

    pub fn put_screenshot(&self, url: &str, dom_fingerprint: u64, screenshot: ScreenshotData) {
        if let Some(mut entry) = self.entries.get_mut(&self.key(url, dom_fingerprint)) {
            entry.screenshot = Some(screenshot);
        }
    }

    pub fn put_decision(&self, url: &str, dom_fingerprint: u64, decision: CachedDecision) {
        if let Some(mut entry) = self.entries.get_mut(&self.key(url, dom_fingerprint)) {
            entry.decision = Some(decision);
        }
    }

    pub fn get_perception(&self, url: &str, dom_fingerprint: u64) -> Option<CachedPerception> {
        let key = self.key(url, dom_fingerprint);
        let hit = {
            let entry = self.entries.get(&key)?;
            if !self.fresh(&entry) {
                None
            } else {
                entry.perception.clone()
            }
        };
        match hit {
            Some(perception) => {
                self.perception_hits.fetch_add(1, Ordering::Relaxed);
                Some(perception)
            }
            None => {
                self.entries.remove(&key);
                None
            }
        }
    }

    pub fn get_screenshot(&self, url: &str, dom_fingerprint: u64) -> Option<ScreenshotData> {
        let entry = self.entries.get(&self.key(url, dom_fingerprint))?;
        if !self.fresh(&entry) {
            return None;
        }
        let shot = entry.screenshot.clone()?;
        self.screenshot_hits.fetch_add(1, Ordering::Relaxed);
        Some(shot)
    }

    /// Decision reuse is disabled for the whole of a no-progress streak.
    pub fn get_decision(
        &self,
        url: &str,
        dom_fingerprint: u64,
        no_progress_streak: u32,
    ) -> Option<CachedDecision> {
        if no_progress_streak > 0 {
            return None;
        }
        let entry = self.entries.get(&self.key(url, dom_fingerprint))?;
        if !self.fresh(&entry) {
            return None;
        }
        let decision = entry.decision.clone()?;
        self.decision_hits.fetch_add(1, Ordering::Relaxed);
        Some(decision)
    }

    /// Drop everything for a URL: navigation, scroll, or a significant
    /// mutation landed. Mutations beat TTL.
    pub fn invalidate_url(&self, url: &str) {
        let keys: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|e| e.key().url == url)
            .map(|e| e.key().clone())
            .collect();
        for key in keys {
            self.entries.remove(&key);
        }
    }

    pub fn invalidate_all(&self) {
        self.entries.clear();
    }

    /// Drop cached decisions while keeping perception entries; used when
    /// a no-progress streak begins.
    pub fn invalidate_decisions(&self) {
        for mut entry in self.entries.iter_mut() {
            entry.decision = None;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            perception_hits: self.perception_hits.load(Ordering::Relaxed),
            decision_hits: self.decision_hits.load(Ordering::Relaxed),
            screenshot_hits: self.screenshot_hits.load(Ordering::Relaxed),
            max_entries: self.max_entries,
            ttl_ms: self.ttl_ms.load(Ordering::Relaxed),
        }
    }

    fn evict_if_full(&self) {
        if self.entries.len() < self.max_entries {
            return;
        }
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.captured_at)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghostpilot_core_types::ActionKind;

    fn cache() -> ObservationCache {
        ObservationCache::new(
            ContextId::slot(0),
            Duration::from_millis(DEFAULT_TTL_MS),
            DEFAULT_MAX_ENTRIES,
        )
    }

    fn perception() -> CachedPerception {
        CachedPerception {
            index: Vec::new(),
            tree: AxExtraction::default(),
        }
    }

    fn decision() -> CachedDecision {
        CachedDecision {
            decision: RawDecision {
                action: Some(ActionKind::Wait),
                text: Some("100".into()),
                confidence: 0.8,
                ..Default::default()
            },
            fingerprint: 1,
        }
    }

    #[test]
    fn perception_hit_counts() {
        let cache = cache();
        cache.put_perception("https://a.test/", 1, perception());
        assert!(cache.get_perception("https://a.test/", 1).is_some());
        assert!(cache.get_perception("https://a.test/", 2).is_none());
        assert_eq!(cache.metrics().perception_hits, 1);
    }

    #[test]
    fn ttl_expiry_drops_entry() {
        let cache = ObservationCache::new(ContextId::slot(0), Duration::from_millis(0), 8);
        cache.put_perception("https://a.test/", 1, perception());
        std::thread::sleep(Duration::from_millis(2));
        assert!(cache.get_perception("https://a.test/", 1).is_none());
        assert_eq!(cache.metrics().perception_hits, 0);
    }

    #[test]
    fn decision_suppressed_during_no_progress_streak() {
        let cache = cache();
        cache.put_perception("https://a.test/", 1, perception());
        cache.put_decision("https://a.test/", 1, decision());
        assert!(cache.get_decision("https://a.test/", 1, 1).is_none());
        assert!(cache.get_decision("https://a.test/", 1, 0).is_some());
        assert_eq!(cache.metrics().decision_hits, 1);
    }

    #[test]
    fn mutation_invalidation_beats_ttl() {
        let cache = cache();
        cache.put_perception("https://a.test/", 1, perception());
        cache.invalidate_url("https://a.test/");
        assert!(cache.get_perception("https://a.test/", 1).is_none());
    }

    #[test]
    fn eviction_keeps_bound() {
        let cache = ObservationCache::new(ContextId::slot(0), Duration::from_secs(60), 2);
        for i in 0..4u64 {
            cache.put_perception("https://a.test/", i, perception());
        }
        assert!(cache.len() <= 3);
    }
}
