//! In-process preparation cache: keyed by the canonical fingerprint of the
//! request with `changes` removed, TTL-expiring, LRU-evicting at a
//! configurable size.

use crate::types::FrozenInput;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry {
    value: FrozenInput,
    inserted_at: Instant,
    last_used: Instant,
}

pub struct PreparationCache {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
    max_entries: usize,
}

impl PreparationCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries,
        }
    }

    /// Returns a clone of the cached frozen input if present and not past
    /// its TTL. Touches the entry's recency on a hit.
    pub fn get(&self, key: &str) -> Option<(FrozenInput, Duration)> {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        let expired = entries.get(key).map(|e| now.duration_since(e.inserted_at) > self.ttl).unwrap_or(false);
        if expired {
            entries.remove(key);
            return None;
        }
        let entry = entries.get_mut(key)?;
        entry.last_used = now;
        Some((entry.value.clone(), now.duration_since(entry.inserted_at)))
    }

    pub fn insert(&self, key: String, value: FrozenInput) {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            if let Some(lru_key) = entries.iter().min_by_key(|(_, e)| e.last_used).map(|(k, _)| k.clone()) {
                entries.remove(&lru_key);
            }
        }
        entries.insert(
            key,
            Entry {
                value,
                inserted_at: now,
                last_used: now,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaxConfig;
    use std::collections::BTreeMap;

    fn dummy(id: &str) -> FrozenInput {
        FrozenInput {
            proposal_id: id.to_string(),
            tenant: "t1".to_string(),
            schema_version: "v1".to_string(),
            line_items: vec![],
            modifiers: vec![],
            dependencies: vec![],
            compiled_rules: BTreeMap::new(),
            config: TaxConfig {
                mode: crate::types::TaxMode::Retail,
                retail_rate: Some("0.08".to_string()),
                use_tax_rate: None,
                jurisdictions: vec![],
                schema_version: "v1".to_string(),
            },
        }
    }

    #[test]
    fn hit_then_expire() {
        let cache = PreparationCache::new(Duration::from_millis(10), 10);
        cache.insert("k1".to_string(), dummy("p1"));
        assert!(cache.get("k1").is_some());
        std::thread::sleep(Duration::from_millis(30));
        assert!(cache.get("k1").is_none());
    }

    #[test]
    fn lru_eviction_at_capacity() {
        let cache = PreparationCache::new(Duration::from_secs(3600), 2);
        cache.insert("k1".to_string(), dummy("p1"));
        cache.insert("k2".to_string(), dummy("p2"));
        cache.get("k1");
        cache.insert("k3".to_string(), dummy("p3"));
        assert!(cache.get("k2").is_none());
        assert!(cache.get("k1").is_some());
        assert!(cache.get("k3").is_some());
    }
}
