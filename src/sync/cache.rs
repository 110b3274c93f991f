//! Push cache.
//!
//! # Responsibilities
//! - Remember the last content successfully pushed per (model kind, id)
//! - Suppress byte-identical re-pushes to stateful downstream targets
//!
//! # Design Decisions
//! - An entry is written only immediately after a successful push of
//!   exactly that content, so a hit means the downstream already reflects
//!   it (best-effort, not transactionally guaranteed)
//! - Normally written only from the worker task; delete reconciliation may
//!   remove single entries from the caller task, which the concurrent map
//!   tolerates

use dashmap::DashMap;
use serde_json::Value;

use crate::observability::metrics;

/// Cache of last-successfully-pushed content keyed by (kind, id).
#[derive(Default)]
pub struct PushCache {
    entries: DashMap<(String, String), Value>,
}

impl PushCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// True iff a prior entry exists and structurally equals `content`.
    pub fn check(&self, kind: &str, id: &str, content: &Value) -> bool {
        let hit = self
            .entries
            .get(&(kind.to_string(), id.to_string()))
            .is_some_and(|entry| entry.value() == content);
        if hit {
            metrics::record_cache_hit(kind);
        }
        hit
    }

    /// Record `content` as pushed. Call only after a confirmed success.
    pub fn update(&self, kind: &str, id: &str, content: Value) {
        self.entries
            .insert((kind.to_string(), id.to_string()), content);
    }

    /// Forget one entry.
    pub fn remove(&self, kind: &str, id: &str) {
        self.entries.remove(&(kind.to_string(), id.to_string()));
    }

    /// Drop every entry, forcing a full re-push on the next reconciliation.
    pub fn invalidate_all(&self) {
        self.entries.clear();
        tracing::debug!("push cache invalidated");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_check_requires_structural_equality() {
        let cache = PushCache::new();
        let content = json!({"imsis": ["001"], "mtu": 1400});

        assert!(!cache.check("device-group", "g1", &content));
        cache.update("device-group", "g1", content.clone());
        assert!(cache.check("device-group", "g1", &content));
        assert!(!cache.check("device-group", "g1", &json!({"imsis": ["002"], "mtu": 1400})));
        assert!(!cache.check("network-slice", "g1", &content));
    }

    #[test]
    fn test_remove_and_invalidate() {
        let cache = PushCache::new();
        cache.update("device-group", "g1", json!(1));
        cache.update("network-slice", "s1", json!(2));
        assert_eq!(cache.len(), 2);

        cache.remove("device-group", "g1");
        assert!(!cache.check("device-group", "g1", &json!(1)));
        assert!(cache.check("network-slice", "s1", &json!(2)));

        cache.invalidate_all();
        assert!(cache.is_empty());
    }
}
