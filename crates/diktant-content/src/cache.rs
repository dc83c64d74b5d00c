//! Bounded cache in front of a speech synthesizer.
//!
//! Entries are keyed by (speaker hint, text) and evicted least recently used
//! first. Only successful syntheses are cached, so a failed line is retried
//! on the next request.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use diktant_core::error::Result;
use tracing::debug;

use crate::SpeechSynthesizer;

type CacheKey = (String, String);

#[derive(Debug, Default)]
struct LruState {
    entries: HashMap<CacheKey, Arc<Vec<u8>>>,
    order: VecDeque<CacheKey>,
}

impl LruState {
    fn get(&mut self, key: &CacheKey) -> Option<Arc<Vec<u8>>> {
        let payload = self.entries.get(key).cloned()?;
        self.touch(key);
        Some(payload)
    }

    fn touch(&mut self, key: &CacheKey) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }

    fn insert(&mut self, key: CacheKey, payload: Arc<Vec<u8>>, capacity: usize) {
        if self.entries.insert(key.clone(), payload).is_some() {
            self.touch(&key);
            return;
        }
        self.order.push_back(key);
        while self.order.len() > capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
                debug!(text = %evicted.1, "Evicted synthesized clip");
            }
        }
    }
}

/// Hit/miss counters for a [`CachedSynthesizer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Wraps a synthesizer with a bounded LRU cache. Callers apply their own
/// timeout around [`SpeechSynthesizer::synthesize`].
pub struct CachedSynthesizer<S> {
    inner: S,
    capacity: usize,
    state: Mutex<LruState>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<S: SpeechSynthesizer> CachedSynthesizer<S> {
    /// A capacity of zero disables caching.
    pub fn new(inner: S, capacity: usize) -> Self {
        Self {
            inner,
            capacity,
            state: Mutex::new(LruState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.state.lock().map(|s| s.entries.len()).unwrap_or(0),
        }
    }

    fn lookup(&self, key: &CacheKey) -> Option<Arc<Vec<u8>>> {
        self.state.lock().ok().and_then(|mut state| state.get(key))
    }

    fn store(&self, key: CacheKey, payload: Arc<Vec<u8>>) {
        if self.capacity == 0 {
            return;
        }
        if let Ok(mut state) = self.state.lock() {
            state.insert(key, payload, self.capacity);
        }
    }
}

impl<S: SpeechSynthesizer> SpeechSynthesizer for CachedSynthesizer<S> {
    async fn synthesize(&self, text: &str, speaker_hint: &str) -> Result<Vec<u8>> {
        let key = (speaker_hint.to_string(), text.to_string());
        if let Some(payload) = self.lookup(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(payload.as_ref().clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let payload = self.inner.synthesize(text, speaker_hint).await?;
        self.store(key, Arc::new(payload.clone()));
        Ok(payload)
    }
}
