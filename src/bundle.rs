//! Bundle lifecycle persistence.
//!
//! The store is an injected interface so tests and future shared
//! backends can swap the in-memory registry out. Retention is bounded:
//! beyond the cap the oldest bundles are evicted.

use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::types::ExecutionBundle;

pub trait BundleStore: Send + Sync {
    fn get(&self, bundle_id: &str) -> Option<ExecutionBundle>;
    /// Insert or replace by id.
    fn put(&self, bundle: ExecutionBundle);
    /// Most-recently-updated first.
    fn recent(&self, limit: usize) -> Vec<ExecutionBundle>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct InMemoryBundleStore {
    /// Insertion-ordered; front is oldest
    bundles: Mutex<VecDeque<ExecutionBundle>>,
    cap: usize,
}

impl InMemoryBundleStore {
    pub fn new(cap: usize) -> Self {
        Self {
            bundles: Mutex::new(VecDeque::new()),
            cap: cap.max(1),
        }
    }
}

impl BundleStore for InMemoryBundleStore {
    fn get(&self, bundle_id: &str) -> Option<ExecutionBundle> {
        self.bundles
            .lock()
            .iter()
            .find(|b| b.bundle_id == bundle_id)
            .cloned()
    }

    fn put(&self, bundle: ExecutionBundle) {
        let mut bundles = self.bundles.lock();
        if let Some(existing) = bundles.iter_mut().find(|b| b.bundle_id == bundle.bundle_id) {
            *existing = bundle;
            return;
        }
        bundles.push_back(bundle);
        while bundles.len() > self.cap {
            bundles.pop_front();
        }
    }

    fn recent(&self, limit: usize) -> Vec<ExecutionBundle> {
        let bundles = self.bundles.lock();
        let mut recent: Vec<ExecutionBundle> = bundles.iter().cloned().collect();
        recent.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        recent.truncate(limit);
        recent
    }

    fn len(&self) -> usize {
        self.bundles.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BundleStatus;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn bundle(id: &str) -> ExecutionBundle {
        ExecutionBundle {
            bundle_id: id.to_string(),
            legs: Vec::new(),
            share_count: dec!(1),
            unit_cost: dec!(0.9),
            expected_profit: dec!(0.1),
            expected_profit_percent: dec!(11),
            slippage_bps: 40,
            fee_bps: 20,
            status: BundleStatus::Planned,
            failure_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn upsert_replaces_by_id() {
        let store = InMemoryBundleStore::new(10);
        store.put(bundle("b-1"));
        let mut updated = bundle("b-1");
        updated.status = BundleStatus::Executing;
        store.put(updated);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("b-1").unwrap().status, BundleStatus::Executing);
    }

    #[test]
    fn evicts_oldest_beyond_cap() {
        let store = InMemoryBundleStore::new(3);
        for i in 0..5 {
            store.put(bundle(&format!("b-{}", i)));
        }
        assert_eq!(store.len(), 3);
        assert!(store.get("b-0").is_none());
        assert!(store.get("b-1").is_none());
        assert!(store.get("b-4").is_some());
    }

    #[test]
    fn recent_is_most_recently_updated_first() {
        let store = InMemoryBundleStore::new(10);
        store.put(bundle("b-old"));
        let mut newer = bundle("b-new");
        newer.updated_at = Utc::now() + chrono::Duration::seconds(5);
        store.put(newer);
        let recent = store.recent(10);
        assert_eq!(recent[0].bundle_id, "b-new");
        assert_eq!(recent.len(), 2);
    }
}
