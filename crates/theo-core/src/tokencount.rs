//! Shared token-count memoization cache.
//!
//! Adapters that lack a vendor tokenizer fall back to a char-per-token
//! heuristic; either way the result is memoized by a fingerprint of the
//! counted content so repeated calls over an unchanged history (e.g. a
//! context-limit check run before every turn) don't re-tokenize.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};

use crate::message::{Content, Message};

/// Default bound on the memoization cache before LRU eviction kicks in.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Per-adapter character-per-token ratios for the heuristic fallback.
pub const OLLAMA_CHARS_PER_TOKEN: f32 = 3.75;
pub const ANTHROPIC_CHARS_PER_TOKEN: f32 = 3.5;
pub const DEFAULT_CHARS_PER_TOKEN: f32 = 4.0;

/// Counts tokens in `text` using a simple char-per-token ratio, rounding up
/// so a non-empty string never counts as zero tokens.
pub fn heuristic_count(text: &str, chars_per_token: f32) -> u32 {
    if text.is_empty() {
        return 0;
    }
    (text.chars().count() as f32 / chars_per_token).ceil() as u32
}

/// Fingerprints a message slice by its role and flattened content, used as
/// the cache key. Two histories differing only in message ids or timestamps
/// fingerprint identically, since those never affect token count.
fn fingerprint(messages: &[Message]) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for m in messages {
        (m.role as u8).hash(&mut hasher);
        match &m.content {
            Content::Text(t) => t.hash(&mut hasher),
            Content::Blocks(blocks) => {
                for b in blocks {
                    format!("{b:?}").hash(&mut hasher);
                }
            }
        }
    }
    hasher.finish()
}

/// A bounded, LRU-evicted cache from content fingerprint to token count.
///
/// Insertion-ordered via a side deque rather than a dedicated `lru` crate,
/// mirroring the plain `HashMap` + `VecDeque` shape already used by the
/// connection pool's idle queues.
pub struct TokenCountCache {
    capacity: usize,
    entries: HashMap<u64, u32>,
    order: VecDeque<u64>,
}

impl TokenCountCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Returns the memoized count for `messages` if present, computing and
    /// storing it via `compute` otherwise. A hit refreshes the entry's
    /// recency so eviction is true LRU, not insertion-order FIFO.
    pub fn get_or_compute(&mut self, messages: &[Message], compute: impl FnOnce() -> u32) -> u32 {
        let key = fingerprint(messages);
        if let Some(count) = self.entries.get(&key).copied() {
            self.touch(key);
            return count;
        }
        let count = compute();
        self.insert(key, count);
        count
    }

    fn touch(&mut self, key: u64) {
        if let Some(pos) = self.order.iter().position(|k| *k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key);
    }

    fn insert(&mut self, key: u64, count: u32) {
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(key, count);
        self.order.push_back(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TokenCountCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
