//! Return cache (§3 "Return cache", §4.E): producer->consumer map keyed by
//! `(resource-kind, textual-value)`.

use crate::prog::Arg;
use std::collections::HashMap;

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
struct CacheKey {
    kind: String,
    text: String,
}

/// One cached producer: the index of the call that produced it within the
/// program currently being translated, plus the value it returned.
#[derive(Debug, Clone, Copy)]
pub struct Producer {
    pub call_idx: usize,
    pub value: u64,
}

#[derive(Debug, Default)]
pub struct ReturnCache {
    entries: HashMap<CacheKey, Producer>,
}

impl ReturnCache {
    pub fn new() -> Self {
        ReturnCache::default()
    }

    fn key(kind: &str, text: &str) -> CacheKey {
        CacheKey {
            kind: format!("ResourceType-{}", kind),
            text: text.to_string(),
        }
    }

    pub fn cache(&mut self, kind: &str, raw_text: &str, producer: Producer) {
        self.entries.insert(Self::key(kind, raw_text), producer);
    }

    pub fn get(&self, kind: &str, raw_text: &str) -> Option<Producer> {
        self.entries.get(&Self::key(kind, raw_text)).copied()
    }
}

/// Builds a `Result`-shaped target-arg from a cached producer, per §4.G.1's
/// resource-reification rule ("link to it").
pub fn result_arg_from_producer(producer: Producer) -> Arg {
    Arg::Result {
        value: producer.value,
        producer: Some(producer.call_idx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_by_kind_and_text() {
        let mut cache = ReturnCache::new();
        cache.cache(
            "fd",
            "3",
            Producer {
                call_idx: 0,
                value: 3,
            },
        );
        let hit = cache.get("fd", "3").expect("should hit");
        assert_eq!(hit.call_idx, 0);
        assert_eq!(hit.value, 3);
        assert!(cache.get("fd", "4").is_none());
        assert!(cache.get("sock", "3").is_none());
    }

    #[test]
    fn later_lookup_returns_same_identity() {
        let mut cache = ReturnCache::new();
        cache.cache(
            "fd",
            "5",
            Producer {
                call_idx: 2,
                value: 5,
            },
        );
        let first = cache.get("fd", "5").unwrap();
        let second = cache.get("fd", "5").unwrap();
        assert_eq!(first.call_idx, second.call_idx);
        assert_eq!(first.value, second.value);
    }
}
