use crate::cache::CacheKey;
use dashmap::DashMap;
use std::collections::HashSet;
use std::fmt;

/// Identifies one live watch for the lifetime of its subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(pub(crate) u64);

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watch-{}", self.0)
    }
}

/// Reverse index from record keys to the watches whose last materialization
/// read them.
///
/// Invalidation cost is O(affected): a write batch only ever touches the
/// index entries of the keys it merged, unaffected watches are never
/// visited.
#[derive(Debug, Default)]
pub struct DependencyTracker {
    watchers: DashMap<CacheKey, HashSet<WatchId>>,
    dependencies: DashMap<WatchId, HashSet<CacheKey>>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a watch's dependency set wholesale. Watches re-register after
    /// every materialization: conditionally executed selections can shrink
    /// or grow their dependencies between runs.
    pub fn register(&self, id: WatchId, keys: HashSet<CacheKey>) {
        let previous = self.dependencies.insert(id, keys.clone());

        if let Some(previous) = previous {
            for key in previous.difference(&keys) {
                if let Some(mut watchers) = self.watchers.get_mut(key) {
                    watchers.remove(&id);
                }
            }
        }
        for key in keys {
            self.watchers.entry(key).or_default().insert(id);
        }
    }

    /// Drop a watch entirely, on teardown.
    pub fn unregister(&self, id: WatchId) {
        if let Some((_, keys)) = self.dependencies.remove(&id) {
            for key in keys {
                if let Some(mut watchers) = self.watchers.get_mut(&key) {
                    watchers.remove(&id);
                }
            }
        }
    }

    /// The set of watches whose dependency set intersects the keys a write
    /// batch merged.
    pub fn affected(&self, merged_keys: &[CacheKey]) -> HashSet<WatchId> {
        let mut affected = HashSet::new();
        for key in merged_keys {
            if let Some(watchers) = self.watchers.get(key) {
                affected.extend(watchers.iter().copied());
            }
        }
        affected
    }

    pub fn watch_count(&self) -> usize {
        self.dependencies.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> HashSet<CacheKey> {
        names.iter().map(|name| CacheKey::from(*name)).collect()
    }

    #[test]
    fn notified_iff_the_batch_intersects_the_dependency_set() {
        let tracker = DependencyTracker::new();
        let watch = WatchId(1);
        tracker.register(watch, keys(&["User:1", "User:2"]));

        assert_eq!(
            tracker.affected(&[CacheKey::from("User:1")]),
            [watch].into_iter().collect(),
        );
        assert_eq!(
            tracker.affected(&[CacheKey::from("User:2"), CacheKey::from("User:3")]),
            [watch].into_iter().collect(),
        );
        assert!(tracker.affected(&[CacheKey::from("User:3")]).is_empty());
    }

    #[test]
    fn re_registration_replaces_the_previous_set_wholesale() {
        let tracker = DependencyTracker::new();
        let watch = WatchId(1);
        tracker.register(watch, keys(&["User:1", "User:2"]));
        tracker.register(watch, keys(&["User:2", "Post:7"]));

        assert!(tracker.affected(&[CacheKey::from("User:1")]).is_empty());
        assert!(!tracker.affected(&[CacheKey::from("User:2")]).is_empty());
        assert!(!tracker.affected(&[CacheKey::from("Post:7")]).is_empty());
    }

    #[test]
    fn unregister_removes_every_index_entry() {
        let tracker = DependencyTracker::new();
        let one = WatchId(1);
        let two = WatchId(2);
        tracker.register(one, keys(&["User:1"]));
        tracker.register(two, keys(&["User:1"]));
        assert_eq!(tracker.watch_count(), 2);

        tracker.unregister(one);
        assert_eq!(
            tracker.affected(&[CacheKey::from("User:1")]),
            [two].into_iter().collect(),
        );
        assert_eq!(tracker.watch_count(), 1);
    }

    #[test]
    fn affected_unions_across_watches() {
        let tracker = DependencyTracker::new();
        tracker.register(WatchId(1), keys(&["User:1"]));
        tracker.register(WatchId(2), keys(&["User:1", "User:2"]));
        tracker.register(WatchId(3), keys(&["Post:9"]));

        let affected = tracker.affected(&[CacheKey::from("User:1"), CacheKey::from("User:2")]);
        assert_eq!(affected, [WatchId(1), WatchId(2)].into_iter().collect());
    }
}
