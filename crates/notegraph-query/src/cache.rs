//! Compiled regex and boolean-expression cache.
//!
//! One instance is built per engine and handed by reference to the filter
//! pipeline. Each map is a small LRU bounded by `capacity`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use regex::Regex;
use tracing::debug;

use crate::expr::BoolExpr;
use notegraph_core::Result;

struct Lru<V> {
    entries: HashMap<String, V>,
    order: Vec<String>,
    max_size: usize,
}

impl<V: Clone> Lru<V> {
    fn new(max_size: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(max_size),
            order: Vec::with_capacity(max_size),
            max_size: max_size.max(1),
        }
    }

    fn get(&mut self, key: &str) -> Option<V> {
        let value = self.entries.get(key)?.clone();
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos);
            self.order.push(k);
        }
        Some(value)
    }

    fn put(&mut self, key: String, value: V) {
        if self.entries.insert(key.clone(), value).is_some() {
            self.order.retain(|k| k != &key);
        }
        self.order.push(key);
        while self.entries.len() > self.max_size && !self.order.is_empty() {
            let oldest = self.order.remove(0);
            self.entries.remove(&oldest);
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

pub struct QueryCache {
    /// `None` remembers a pattern that failed to compile.
    regexes: Mutex<Lru<Option<Arc<Regex>>>>,
    expressions: Mutex<Lru<Arc<BoolExpr>>>,
}

impl QueryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            regexes: Mutex::new(Lru::new(capacity)),
            expressions: Mutex::new(Lru::new(capacity)),
        }
    }

    /// Compiled regex for `pattern`, or `None` if it is not a valid regex.
    pub fn regex(&self, pattern: &str) -> Option<Arc<Regex>> {
        if let Some(hit) = self.regexes.lock().get(pattern) {
            return hit;
        }
        let compiled = match Regex::new(pattern) {
            Ok(re) => Some(Arc::new(re)),
            Err(e) => {
                debug!("Path pattern {:?} is not a regex ({}); using prefix match", pattern, e);
                None
            }
        };
        self.regexes.lock().put(pattern.to_string(), compiled.clone());
        compiled
    }

    /// Parsed expression for `src`. Parse failures are returned, not cached.
    pub fn expression(&self, src: &str) -> Result<Arc<BoolExpr>> {
        if let Some(hit) = self.expressions.lock().get(src) {
            return Ok(hit);
        }
        let parsed = Arc::new(BoolExpr::parse(src)?);
        self.expressions.lock().put(src.to_string(), parsed.clone());
        Ok(parsed)
    }

    /// (regex entries, expression entries)
    pub fn len(&self) -> (usize, usize) {
        (self.regexes.lock().len(), self.expressions.lock().len())
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notegraph_core::Error;

    #[test]
    fn test_regex_hit_and_invalid() {
        let cache = QueryCache::new(8);
        let a = cache.regex(r"^notes/.*\.md$").unwrap();
        let b = cache.regex(r"^notes/.*\.md$").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        assert!(cache.regex("notes/[unclosed").is_none());
        assert!(cache.regex("notes/[unclosed").is_none());
        assert_eq!(cache.len().0, 2);
    }

    #[test]
    fn test_expression_cache_and_errors() {
        let cache = QueryCache::new(8);
        let a = cache.expression("tag:a AND tag:b").unwrap();
        let b = cache.expression("tag:a AND tag:b").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        assert!(matches!(cache.expression("tag:"), Err(Error::Parse(_))));
        assert_eq!(cache.len().1, 1);
    }

    #[test]
    fn test_eviction_is_least_recently_used() {
        let cache = QueryCache::new(2);
        cache.expression("tag:a").unwrap();
        cache.expression("tag:b").unwrap();
        // Touch "a" so "b" is oldest.
        cache.expression("tag:a").unwrap();
        cache.expression("tag:c").unwrap();
        assert_eq!(cache.len().1, 2);

        let mut inner = cache.expressions.lock();
        assert!(inner.get("tag:a").is_some());
        assert!(inner.get("tag:b").is_none());
        assert!(inner.get("tag:c").is_some());
    }
}
