//! Shared in-memory snapshot cache.
//!
//! Holds captured snapshots keyed by a generated cache id, plus links from
//! step ids to cache ids. One mutex guards both maps; every read returns an
//! owned clone so no lock outlives a call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Snapshot;
use crate::obs;
use crate::xml::{extract_elements, UiElement};

/// A cached snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Empty until the cache assigns one on `put`.
    #[serde(default)]
    pub cache_id: String,
    pub snapshot: Snapshot,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub elements: Vec<UiElement>,
    pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            cache_id: String::new(),
            snapshot,
            elements: Vec::new(),
            stored_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, cache_id: impl Into<String>) -> Self {
        self.cache_id = cache_id.into();
        self
    }

    /// Attach flattened `node` summaries parsed from the snapshot content.
    pub fn with_parsed_elements(mut self) -> Self {
        self.elements = extract_elements(&self.snapshot.content);
        self
    }

    /// Capture time when known, otherwise the time the entry was stored.
    pub fn age_reference(&self) -> DateTime<Utc> {
        self.snapshot.captured_at.unwrap_or(self.stored_at)
    }
}

/// Association of a step with a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepLink {
    pub step_id: String,
    pub cache_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub linked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub links: usize,
    pub total_bytes: usize,
    pub oldest_capture: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    links: HashMap<String, StepLink>,
}

/// Process-wide snapshot store. Share it with `Arc<SnapshotCache>`.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    state: Mutex<CacheState>,
    counter: AtomicU64,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `snap-<unix ms>-<sequence>-<random>`; unique across concurrent callers.
    fn next_id(&self) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!(
            "snap-{}-{}-{}",
            Utc::now().timestamp_millis(),
            seq,
            &suffix[..8]
        )
    }

    /// Store `entry`, assigning an id when it has none. An existing entry with
    /// the same id is replaced.
    pub fn put(&self, mut entry: CacheEntry) -> String {
        if entry.cache_id.trim().is_empty() {
            entry.cache_id = self.next_id();
        }
        let id = entry.cache_id.clone();
        self.state().entries.insert(id.clone(), entry);
        id
    }

    pub fn get(&self, cache_id: &str) -> Option<CacheEntry> {
        let found = self.state().entries.get(cache_id).cloned();
        if found.is_none() {
            obs::emit_cache_miss(cache_id);
        }
        found
    }

    /// Point `step_id` at `cache_id`, replacing any earlier link.
    pub fn link(&self, step_id: &str, cache_id: &str, context: Option<String>) {
        let link = StepLink {
            step_id: step_id.to_string(),
            cache_id: cache_id.to_string(),
            context,
            linked_at: Utc::now(),
        };
        self.state().links.insert(step_id.to_string(), link);
    }

    pub fn unlink(&self, step_id: &str) -> bool {
        self.state().links.remove(step_id).is_some()
    }

    /// Entry linked to `step_id`. `None` when unlinked or the entry is gone.
    pub fn resolve(&self, step_id: &str) -> Option<(CacheEntry, StepLink)> {
        let resolved = {
            let state = self.state();
            state
                .links
                .get(step_id)
                .map(|link| (state.entries.get(&link.cache_id).cloned(), link.clone()))
        };
        match resolved {
            Some((Some(entry), link)) => Some((entry, link)),
            Some((None, link)) => {
                obs::emit_cache_miss(&link.cache_id);
                None
            }
            None => {
                obs::emit_cache_miss(step_id);
                None
            }
        }
    }

    /// Most recent entry with content captured from this app and page.
    pub fn find_by_page(&self, app_package: &str, page_title: &str) -> Option<CacheEntry> {
        let state = self.state();
        state
            .entries
            .values()
            .filter(|e| {
                e.snapshot.has_content()
                    && e.snapshot.device.app_package == app_package
                    && e.snapshot.page.title == page_title
            })
            .max_by(|a, b| {
                a.age_reference()
                    .cmp(&b.age_reference())
                    .then_with(|| a.cache_id.cmp(&b.cache_id))
            })
            .cloned()
    }

    /// Remove entries older than `max_age`. Links are kept and resolve to
    /// `None` afterwards.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let age = chrono::Duration::from_std(max_age)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 1000));
        match Utc::now().checked_sub_signed(age) {
            Some(cutoff) => self.sweep_before(cutoff),
            None => 0,
        }
    }

    /// Remove entries whose capture (or store) time is before `cutoff`.
    pub fn sweep_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut state = self.state();
        let before = state.entries.len();
        state.entries.retain(|_, e| e.age_reference() >= cutoff);
        let removed = before - state.entries.len();
        let remaining = state.entries.len();
        drop(state);
        obs::emit_cache_swept(removed, remaining);
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state();
        CacheStats {
            entries: state.entries.len(),
            links: state.links.len(),
            total_bytes: state.entries.values().map(|e| e.snapshot.size()).sum(),
            oldest_capture: state.entries.values().map(CacheEntry::age_reference).min(),
        }
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.entries.clear();
        state.links.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DeviceInfo, PageInfo};

    fn snapshot(app: &str, title: &str) -> Snapshot {
        Snapshot::capture(
            r#"<hierarchy><node class="a" bounds="[0,0][10,10]"/></hierarchy>"#,
            DeviceInfo::new("d1", "Pixel").with_app(app, ".Main"),
            PageInfo::new(title, "list"),
        )
    }

    #[test]
    fn put_assigns_unique_ids() {
        let cache = SnapshotCache::new();
        let a = cache.put(CacheEntry::new(snapshot("app", "Home")));
        let b = cache.put(CacheEntry::new(snapshot("app", "Home")));
        assert_ne!(a, b);
        assert!(a.starts_with("snap-"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn put_with_same_id_overwrites() {
        let cache = SnapshotCache::new();
        cache.put(CacheEntry::new(snapshot("app", "Home")).with_id("fixed"));
        cache.put(CacheEntry::new(snapshot("app", "Cart")).with_id("fixed"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("fixed").unwrap().snapshot.page.title, "Cart");
    }

    #[test]
    fn get_missing_is_none() {
        assert!(SnapshotCache::new().get("nope").is_none());
    }

    #[test]
    fn link_replaces_and_resolves() {
        let cache = SnapshotCache::new();
        let home = cache.put(CacheEntry::new(snapshot("app", "Home")));
        let cart = cache.put(CacheEntry::new(snapshot("app", "Cart")));
        cache.link("s1", &home, None);
        cache.link("s1", &cart, Some("after add".to_string()));
        let (entry, link) = cache.resolve("s1").unwrap();
        assert_eq!(entry.snapshot.page.title, "Cart");
        assert_eq!(link.context.as_deref(), Some("after add"));
        assert_eq!(cache.stats().links, 1);
    }

    #[test]
    fn resolve_is_soft_after_unlink_or_eviction() {
        let cache = SnapshotCache::new();
        let id = cache.put(CacheEntry::new(snapshot("app", "Home")));
        cache.link("s1", &id, None);
        cache.link("s2", &id, None);
        assert!(cache.unlink("s1"));
        assert!(cache.resolve("s1").is_none());

        assert_eq!(cache.sweep_before(Utc::now() + chrono::Duration::hours(1)), 1);
        assert!(cache.resolve("s2").is_none());
    }

    #[test]
    fn sweep_keeps_fresh_entries() {
        let cache = SnapshotCache::new();
        let old = snapshot("app", "Home")
            .with_captured_at(Some(Utc::now() - chrono::Duration::days(30)));
        cache.put(CacheEntry::new(old));
        cache.put(CacheEntry::new(snapshot("app", "Cart")));
        assert_eq!(cache.sweep(Duration::from_secs(24 * 60 * 60)), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn find_by_page_prefers_most_recent() {
        let cache = SnapshotCache::new();
        let older = snapshot("app", "Home")
            .with_captured_at(Some(Utc::now() - chrono::Duration::minutes(5)));
        cache.put(CacheEntry::new(older).with_id("older"));
        cache.put(CacheEntry::new(snapshot("app", "Home")).with_id("newer"));
        cache.put(CacheEntry::new(snapshot("other", "Home")).with_id("other"));
        assert_eq!(cache.find_by_page("app", "Home").unwrap().cache_id, "newer");
        assert!(cache.find_by_page("app", "Settings").is_none());
    }

    #[test]
    fn parsed_elements_and_stats() {
        let cache = SnapshotCache::new();
        let entry = CacheEntry::new(snapshot("app", "Home")).with_parsed_elements();
        assert_eq!(entry.elements.len(), 1);
        cache.put(entry);
        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert!(stats.total_bytes > 0);
        assert!(stats.oldest_capture.is_some());
        cache.clear();
        assert!(cache.is_empty());
    }
}
