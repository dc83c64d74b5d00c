//! Per-lesson progress persistence.
//!
//! All records live in one JSON object stored under a fixed key, mapping
//! lesson id to `{ currentIndex, percentage, isCompleted }`. Reads and writes
//! never fail towards the caller: missing or corrupt data reads as "no
//! progress", and when the backend is unavailable the store keeps working
//! from its in-memory copy.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use diktant_core::error::DiktantError;
use diktant_core::types::{LessonId, ProgressMap, ProgressRecord};
use tracing::{debug, info, warn};

use crate::kv::KeyValueStore;

pub struct ProgressStore {
    backend: Arc<dyn KeyValueStore>,
    storage_key: String,
    cache: Mutex<CachedProgress>,
}

/// Last known map plus the lessons whose records have not reached the
/// backend yet. Serves reads when the backend fails and serializes
/// read-modify-write cycles.
#[derive(Debug, Default)]
struct CachedProgress {
    map: ProgressMap,
    unsaved: BTreeSet<String>,
}

impl ProgressStore {
    pub fn new(backend: Arc<dyn KeyValueStore>, storage_key: impl Into<String>) -> Self {
        Self {
            backend,
            storage_key: storage_key.into(),
            cache: Mutex::new(CachedProgress::default()),
        }
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    /// Record that line `index` of a `total`-line lesson was finished.
    ///
    /// The stored percentage never decreases and completion never reverts.
    /// Returns the record as stored, or `None` for an empty lesson.
    pub fn checkpoint(&self, lesson_id: &LessonId, index: usize, total: usize) -> Option<ProgressRecord> {
        let Some(fresh) = ProgressRecord::at_line(index, total) else {
            warn!(lesson_id = %lesson_id, index, "Ignoring checkpoint for empty lesson");
            return None;
        };
        let record = self.update(lesson_id, fresh);

        debug!(
            lesson_id = %lesson_id,
            index,
            percentage = record.percentage,
            completed = record.is_completed,
            "Progress checkpointed"
        );
        Some(record)
    }

    /// Mark a `total`-line lesson finished, leaving it positioned on its last
    /// line.
    pub fn complete(&self, lesson_id: &LessonId, total: usize) -> ProgressRecord {
        let record = self.update(lesson_id, ProgressRecord::completed(total));
        info!(lesson_id = %lesson_id, "Lesson completed");
        record
    }

    pub fn read(&self, lesson_id: &LessonId) -> Option<ProgressRecord> {
        let mut cache = self.lock_cache();
        self.load(&mut cache);
        cache.map.get(lesson_id.as_str()).copied()
    }

    /// Every stored record, most recently updated first.
    pub fn all(&self) -> Vec<(LessonId, ProgressRecord)> {
        let mut cache = self.lock_cache();
        self.load(&mut cache);
        let mut records: Vec<_> = cache
            .map
            .iter()
            .map(|(id, record)| (LessonId::from(id.as_str()), *record))
            .collect();
        records.sort_by(|a, b| {
            b.1.updated_at
                .cmp(&a.1.updated_at)
                .then_with(|| a.0.cmp(&b.0))
        });
        records
    }

    fn lock_cache(&self) -> MutexGuard<'_, CachedProgress> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Merge `fresh` into the record for `lesson_id` and write the map back.
    ///
    /// The map is only written after a successful read, so a backend that
    /// fails reads is never overwritten with a partial document. Records that
    /// could not be written stay in memory and are merged into the next
    /// successful read.
    fn update(&self, lesson_id: &LessonId, fresh: ProgressRecord) -> ProgressRecord {
        let mut cache = self.lock_cache();
        let loaded = self.load(&mut cache);
        let record = fresh.merged_with(cache.map.get(lesson_id.as_str()));
        cache.map.insert(lesson_id.to_string(), record);
        cache.unsaved.insert(lesson_id.to_string());

        if !loaded {
            warn!(lesson_id = %lesson_id, "Progress kept in memory until storage recovers");
        } else if let Err(e) = self.write(&cache.map) {
            warn!(error = %e, "Failed to persist progress, keeping it in memory");
        } else {
            cache.unsaved.clear();
        }
        record
    }

    /// Refresh the cached map from the backend, re-applying unsaved records.
    /// Returns `false` and leaves the cache untouched when the backend cannot
    /// be read.
    fn load(&self, cache: &mut CachedProgress) -> bool {
        let mut stored = match self.backend.get(&self.storage_key) {
            Ok(Some(raw)) => parse_map(&raw),
            Ok(None) => ProgressMap::new(),
            Err(e) => {
                warn!(error = %e, "Progress storage unavailable, using in-memory copy");
                return false;
            }
        };
        for id in &cache.unsaved {
            if let Some(pending) = cache.map.get(id) {
                let merged = pending.merged_with(stored.get(id));
                stored.insert(id.clone(), merged);
            }
        }
        cache.map = stored;
        true
    }

    fn write(&self, map: &ProgressMap) -> Result<(), DiktantError> {
        let raw = serde_json::to_string(map)?;
        self.backend.put(&self.storage_key, &raw)
    }
}

/// Parse a stored map, dropping entries that are not valid records.
fn parse_map(raw: &str) -> ProgressMap {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Stored progress is corrupt, treating as empty");
            return ProgressMap::new();
        }
    };
    let serde_json::Value::Object(entries) = value else {
        warn!("Stored progress is not an object, treating as empty");
        return ProgressMap::new();
    };

    entries
        .into_iter()
        .filter_map(|(id, entry)| match serde_json::from_value::<ProgressRecord>(entry) {
            Ok(record) if record.percentage <= 100 => Some((id, record)),
            Ok(_) | Err(_) => {
                debug!(lesson_id = %id, "Skipping malformed progress entry");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::kv::MemoryStore;
    use std::sync::atomic::{AtomicBool, Ordering};

    const KEY: &str = "russianDictationProgress_v2";

    fn memory_store() -> (ProgressStore, Arc<MemoryStore>) {
        let backend = Arc::new(MemoryStore::new());
        (ProgressStore::new(backend.clone(), KEY), backend)
    }

    /// Backend whose reads and writes can be failed independently.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        reads_down: AtomicBool,
        writes_down: AtomicBool,
    }

    impl FlakyStore {
        fn set_down(&self, down: bool) {
            self.reads_down.store(down, Ordering::SeqCst);
            self.writes_down.store(down, Ordering::SeqCst);
        }
    }

    impl KeyValueStore for FlakyStore {
        fn get(&self, key: &str) -> Result<Option<String>, DiktantError> {
            if self.reads_down.load(Ordering::SeqCst) {
                return Err(DiktantError::Storage("quota exceeded".into()));
            }
            self.inner.get(key)
        }

        fn put(&self, key: &str, value: &str) -> Result<(), DiktantError> {
            if self.writes_down.load(Ordering::SeqCst) {
                return Err(DiktantError::Storage("quota exceeded".into()));
            }
            self.inner.put(key, value)
        }
    }

    #[test]
    fn test_first_checkpoint_creates_record() {
        let (store, _) = memory_store();
        let id = LessonId::from("001");
        assert!(store.read(&id).is_none());

        let record = store.checkpoint(&id, 0, 2).unwrap();
        assert_eq!(record.current_index, 0);
        assert_eq!(record.percentage, 50);
        assert!(!record.is_completed);
        assert_eq!(store.read(&id).map(|r| r.percentage), Some(50));
    }

    #[test]
    fn test_checkpoint_is_idempotent() {
        let (store, _) = memory_store();
        let id = LessonId::from("001");
        let once = store.checkpoint(&id, 3, 10).unwrap();
        let twice = store.checkpoint(&id, 3, 10).unwrap();
        assert_eq!(once.percentage, twice.percentage);
        assert_eq!(once.current_index, twice.current_index);
        assert_eq!(once.is_completed, twice.is_completed);
    }

    #[test]
    fn test_percentage_never_decreases() {
        let (store, _) = memory_store();
        let id = LessonId::from("001");
        store.checkpoint(&id, 2, 10);
        let record = store.checkpoint(&id, 1, 10).unwrap();

        assert_eq!(record.percentage, 30);
        assert_eq!(record.current_index, 1);
    }

    #[test]
    fn test_completion_is_one_way() {
        let (store, _) = memory_store();
        let id = LessonId::from("001");
        store.checkpoint(&id, 1, 2);
        let record = store.checkpoint(&id, 0, 2).unwrap();
        assert!(record.is_completed);
        assert_eq!(record.percentage, 100);
    }

    #[test]
    fn test_complete_forces_full_progress() {
        let (store, _) = memory_store();
        let id = LessonId::from("001");
        store.checkpoint(&id, 8, 10);

        let record = store.complete(&id, 10);
        assert_eq!(record.percentage, 100);
        assert!(record.is_completed);
        assert_eq!(record.current_index, 9);
        assert_eq!(store.read(&id), Some(record));

        let unseen = store.complete(&LessonId::from("002"), 3);
        assert_eq!(unseen.current_index, 2);
    }

    #[test]
    fn test_empty_lesson_checkpoint_is_ignored() {
        let (store, backend) = memory_store();
        assert!(store.checkpoint(&LessonId::from("001"), 0, 0).is_none());
        assert!(backend.get(KEY).unwrap().is_none());
    }

    #[test]
    fn test_stored_document_shape() {
        let (store, backend) = memory_store();
        store.checkpoint(&LessonId::from("007"), 0, 4);

        let raw = backend.get(KEY).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["007"]["currentIndex"], 0);
        assert_eq!(value["007"]["percentage"], 25);
        assert_eq!(value["007"]["isCompleted"], false);
    }

    #[test]
    fn test_corrupt_storage_reads_as_no_progress() {
        let (store, backend) = memory_store();
        backend.put(KEY, "{ this is not json").unwrap();
        assert!(store.read(&LessonId::from("001")).is_none());

        // A checkpoint overwrites the corrupt document.
        store.checkpoint(&LessonId::from("001"), 0, 2);
        assert_eq!(store.read(&LessonId::from("001")).map(|r| r.percentage), Some(50));
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let (store, backend) = memory_store();
        backend
            .put(
                KEY,
                r#"{
                    "001": 40,
                    "002": {"currentIndex": 1, "percentage": 20, "isCompleted": false},
                    "003": {"currentIndex": 1, "percentage": 250, "isCompleted": false}
                }"#,
            )
            .unwrap();

        assert!(store.read(&LessonId::from("001")).is_none());
        assert_eq!(store.read(&LessonId::from("002")).map(|r| r.percentage), Some(20));
        assert!(store.read(&LessonId::from("003")).is_none());
    }

    #[test]
    fn test_failing_backend_degrades_to_memory() {
        let backend = Arc::new(FlakyStore::default());
        let store = ProgressStore::new(backend.clone(), KEY);
        let id = LessonId::from("001");
        store.checkpoint(&id, 0, 4);

        backend.set_down(true);
        let record = store.checkpoint(&id, 1, 4).unwrap();
        assert_eq!(record.percentage, 50);
        assert_eq!(store.read(&id).map(|r| r.percentage), Some(50));
        assert_eq!(store.complete(&id, 4).percentage, 100);
    }

    #[test]
    fn test_failed_read_never_overwrites_other_lessons() {
        let backend = Arc::new(FlakyStore::default());
        backend
            .put(
                KEY,
                r#"{"001": {"currentIndex": 5, "percentage": 60, "isCompleted": false}}"#,
            )
            .unwrap();
        let store = ProgressStore::new(backend.clone(), KEY);

        backend.reads_down.store(true, Ordering::SeqCst);
        let record = store.checkpoint(&LessonId::from("002"), 0, 4).unwrap();
        assert_eq!(record.percentage, 25);
        assert!(backend.inner.get(KEY).unwrap().unwrap().contains("\"001\""));
        backend.reads_down.store(false, Ordering::SeqCst);

        let first = store.read(&LessonId::from("001")).unwrap();
        assert_eq!(first.current_index, 5);
        assert_eq!(first.percentage, 60);
        assert_eq!(store.read(&LessonId::from("002")).map(|r| r.percentage), Some(25));

        // The next write carries both lessons.
        store.checkpoint(&LessonId::from("003"), 0, 2);
        let raw = backend.inner.get(KEY).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["001"]["percentage"], 60);
        assert_eq!(value["002"]["percentage"], 25);
        assert_eq!(value["003"]["percentage"], 50);
    }

    #[test]
    fn test_failed_write_is_retried_on_next_update() {
        let backend = Arc::new(FlakyStore::default());
        let store = ProgressStore::new(backend.clone(), KEY);

        backend.writes_down.store(true, Ordering::SeqCst);
        store.checkpoint(&LessonId::from("001"), 1, 4);
        assert!(backend.inner.get(KEY).unwrap().is_none());
        assert_eq!(store.read(&LessonId::from("001")).map(|r| r.percentage), Some(50));

        backend.writes_down.store(false, Ordering::SeqCst);
        store.checkpoint(&LessonId::from("002"), 0, 4);
        let raw = backend.inner.get(KEY).unwrap().unwrap();
        assert!(raw.contains("\"001\"") && raw.contains("\"002\""));
    }

    #[test]
    fn test_successful_read_refreshes_fallback_copy() {
        let backend = Arc::new(FlakyStore::default());
        backend
            .put(
                KEY,
                r#"{"001": {"currentIndex": 2, "percentage": 30, "isCompleted": false}}"#,
            )
            .unwrap();
        let store = ProgressStore::new(backend.clone(), KEY);
        let id = LessonId::from("001");
        assert_eq!(store.read(&id).map(|r| r.percentage), Some(30));

        backend.set_down(true);
        assert_eq!(store.read(&id).map(|r| r.percentage), Some(30));
        assert_eq!(store.all().len(), 1);
    }

    #[test]
    fn test_all_lists_most_recent_first() {
        let (store, backend) = memory_store();
        backend
            .put(
                KEY,
                r#"{
                    "001": {"currentIndex": 0, "percentage": 10, "isCompleted": false,
                            "updatedAt": "2026-01-01T00:00:00Z"},
                    "002": {"currentIndex": 3, "percentage": 40, "isCompleted": false,
                            "updatedAt": "2026-03-01T00:00:00Z"}
                }"#,
            )
            .unwrap();

        let ids: Vec<String> = store.all().into_iter().map(|(id, _)| id.0).collect();
        assert_eq!(ids, vec!["002".to_string(), "001".to_string()]);
    }

    #[test]
    fn test_progress_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.db");
        let id = LessonId::from("012");

        {
            let store = ProgressStore::new(Arc::new(Database::new(&path).unwrap()), KEY);
            store.checkpoint(&id, 4, 10);
        }

        let store = ProgressStore::new(Arc::new(Database::new(&path).unwrap()), KEY);
        let record = store.read(&id).unwrap();
        assert_eq!(record.current_index, 4);
        assert_eq!(record.percentage, 50);
    }

    #[test]
    fn test_legacy_key_is_untouched() {
        let (store, backend) = memory_store();
        backend.put("russianDictationProgress", r#"{"001": 80}"#).unwrap();
        store.checkpoint(&LessonId::from("001"), 0, 10);

        assert_eq!(
            backend.get("russianDictationProgress").unwrap().as_deref(),
            Some(r#"{"001": 80}"#)
        );
        assert_eq!(store.read(&LessonId::from("001")).map(|r| r.percentage), Some(10));
    }
}
