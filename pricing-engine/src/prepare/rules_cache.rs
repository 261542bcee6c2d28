//! Compiled-rule cache, keyed by `(tenantId, contentHash, version)` so a
//! rule body that hasn't changed is never re-validated.

use common_rules::{compile, CompiledRule, RuleError, RuleNode};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RuleCacheKey {
    tenant: String,
    content_hash: String,
    version: u32,
}

pub struct RuleCache {
    entries: Mutex<HashMap<RuleCacheKey, CompiledRule>>,
}

impl RuleCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the compiled rule for `(tenant, content_hash, version)`,
    /// compiling and storing it only on the first request for that key.
    pub fn get_or_compile(
        &self,
        tenant: &str,
        content_hash: &str,
        version: u32,
        expr: &RuleNode,
    ) -> Result<CompiledRule, RuleError> {
        let key = RuleCacheKey {
            tenant: tenant.to_string(),
            content_hash: content_hash.to_string(),
            version,
        };
        if let Some(compiled) = self.entries.lock().unwrap().get(&key) {
            tracing::debug!(tenant, content_hash, version, "rule cache hit");
            return Ok(compiled.clone());
        }
        tracing::debug!(tenant, content_hash, version, "rule cache miss, compiling");
        let compiled = compile(expr)?;
        self.entries.lock().unwrap().insert(key, compiled.clone());
        Ok(compiled)
    }
}

impl Default for RuleCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_rules::RuleNode;

    #[test]
    fn second_compile_of_same_key_reuses_the_cache_entry() {
        let cache = RuleCache::new();
        let expr = RuleNode::Literal { value: true };
        assert!(cache.get_or_compile("tenant-a", "hash-1", 1, &expr).is_ok());
        assert!(cache.get_or_compile("tenant-a", "hash-1", 1, &expr).is_ok());
        assert_eq!(cache.entries.lock().unwrap().len(), 1);
    }

    #[test]
    fn different_content_hash_is_a_different_entry() {
        let cache = RuleCache::new();
        let expr = RuleNode::Literal { value: true };
        cache.get_or_compile("tenant-a", "hash-1", 1, &expr).unwrap();
        cache.get_or_compile("tenant-a", "hash-2", 1, &expr).unwrap();
        assert_eq!(cache.entries.lock().unwrap().len(), 2);
    }
}
