//! Idempotency cache.
//!
//! The first execute under a caller-supplied key runs for real and its
//! exact response - success or failure - is cached; any retry with the
//! same key short-circuits to that response without re-executing.
//!
//! Deliberately check-then-act: two racing first uses of a key are not
//! mutually excluded. Replay-after-completion is the guarantee.

use dashmap::DashMap;
use serde_json::Value;

pub struct IdempotencyCache {
    responses: DashMap<String, Value>,
}

impl IdempotencyCache {
    pub fn new() -> Self {
        Self {
            responses: DashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.responses.get(key).map(|v| v.clone())
    }

    pub fn put(&self, key: &str, response: Value) {
        self.responses.insert(key.to_string(), response);
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }
}

impl Default for IdempotencyCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_response_wins_for_a_key() {
        let cache = IdempotencyCache::new();
        assert!(cache.get("k1").is_none());
        cache.put("k1", json!({"status": "success", "bundle": "b-1"}));

        let replay = cache.get("k1").unwrap();
        assert_eq!(replay["bundle"], "b-1");
    }

    #[test]
    fn failures_are_cached_too() {
        let cache = IdempotencyCache::new();
        cache.put("k2", json!({"success": false, "error": {"code": "EXECUTION_REJECTED"}}));
        assert_eq!(cache.get("k2").unwrap()["error"]["code"], "EXECUTION_REJECTED");
    }
}
