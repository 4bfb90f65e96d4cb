//! Places the cache-lookup strategy can borrow a snapshot from.

use std::time::Duration;

use async_trait::async_trait;

use crate::cache::SnapshotCache;
use crate::domain::{Script, ScriptValidationResult, Snapshot, Step};
use crate::obs;

/// Page identity a replacement snapshot must share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupKey {
    pub app_package: String,
    pub page_title: String,
}

impl LookupKey {
    /// Identity from the step's snapshot metadata, falling back to the
    /// `appPackage` / `pageTitle` step parameters. `None` without a title.
    pub fn for_step(step: &Step) -> Option<Self> {
        let param = |key: &str| {
            step.params
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let snapshot = step.snapshot.as_ref();
        let page_title = snapshot
            .map(|s| s.page.title.trim().to_string())
            .filter(|t| !t.is_empty())
            .or_else(|| param("pageTitle"))?;
        let app_package = snapshot
            .map(|s| s.device.app_package.trim().to_string())
            .filter(|a| !a.is_empty())
            .or_else(|| param("appPackage"))
            .unwrap_or_default();
        Some(Self {
            app_package,
            page_title,
        })
    }

    pub fn matches(&self, snapshot: &Snapshot) -> bool {
        snapshot.device.app_package == self.app_package && snapshot.page.title == self.page_title
    }
}

#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Short name used in logs and warnings.
    fn name(&self) -> &str;

    async fn lookup(&self, key: &LookupKey) -> Option<Snapshot>;
}

#[async_trait]
impl SnapshotSource for SnapshotCache {
    fn name(&self) -> &str {
        "cache"
    }

    async fn lookup(&self, key: &LookupKey) -> Option<Snapshot> {
        self.find_by_page(&key.app_package, &key.page_title)
            .map(|entry| entry.snapshot)
    }
}

/// Valid snapshots of other steps in the script under recovery.
#[derive(Debug, Clone, Default)]
pub struct ScriptSiblings {
    snapshots: Vec<Snapshot>,
}

impl ScriptSiblings {
    pub fn from_validation(script: &Script, validation: &ScriptValidationResult) -> Self {
        let snapshots = validation
            .steps
            .iter()
            .filter(|sv| sv.validation.as_ref().is_some_and(|v| v.is_valid()))
            .filter_map(|sv| script.steps.get(sv.step_index)?.snapshot.clone())
            .filter(Snapshot::has_content)
            .collect();
        Self { snapshots }
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[async_trait]
impl SnapshotSource for ScriptSiblings {
    fn name(&self) -> &str {
        "script"
    }

    async fn lookup(&self, key: &LookupKey) -> Option<Snapshot> {
        self.snapshots.iter().find(|s| key.matches(s)).cloned()
    }
}

/// Query `source`, giving up after `timeout`.
pub async fn lookup_with_timeout(
    source: &dyn SnapshotSource,
    key: &LookupKey,
    timeout: Duration,
) -> Option<Snapshot> {
    match tokio::time::timeout(timeout, source.lookup(key)).await {
        Ok(found) => found,
        Err(_) => {
            obs::emit_lookup_timed_out(source.name(), timeout.as_millis() as u64);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheEntry;
    use crate::domain::{DeviceInfo, ElementLocator, PageInfo};

    struct Stalled;

    #[async_trait]
    impl SnapshotSource for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn lookup(&self, _key: &LookupKey) -> Option<Snapshot> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            None
        }
    }

    fn key() -> LookupKey {
        LookupKey {
            app_package: "com.shop".to_string(),
            page_title: "Cart".to_string(),
        }
    }

    #[test]
    fn key_prefers_snapshot_metadata_then_params() {
        let mut step = Step::new("s1", ElementLocator::default());
        assert!(LookupKey::for_step(&step).is_none());

        step.params.insert("pageTitle".to_string(), "Cart".into());
        step.params.insert("appPackage".to_string(), "com.shop".into());
        assert_eq!(LookupKey::for_step(&step), Some(key()));

        let step = step.with_snapshot(Snapshot::capture(
            "",
            DeviceInfo::new("d", "n").with_app("com.other", ".Main"),
            PageInfo::new("Checkout", "form"),
        ));
        let k = LookupKey::for_step(&step).unwrap();
        assert_eq!(k.page_title, "Checkout");
        assert_eq!(k.app_package, "com.other");
    }

    #[tokio::test]
    async fn cache_is_a_source() {
        let cache = SnapshotCache::new();
        cache.put(CacheEntry::new(Snapshot::capture(
            "<hierarchy/>",
            DeviceInfo::new("d", "n").with_app("com.shop", ".Main"),
            PageInfo::new("Cart", "list"),
        )));
        let found = lookup_with_timeout(&cache, &key(), Duration::from_millis(100)).await;
        assert_eq!(found.unwrap().content, "<hierarchy/>");
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_source_times_out() {
        let found = lookup_with_timeout(&Stalled, &key(), Duration::from_millis(50)).await;
        assert!(found.is_none());
    }
}
