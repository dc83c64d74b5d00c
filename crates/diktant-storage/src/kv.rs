//! Key-value persistence seam.
//!
//! Progress is stored as one serialized document under a fixed key, so the
//! store only needs whole-value reads and writes.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::OptionalExtension;

use diktant_core::error::DiktantError;

use crate::db::Database;

/// Durable string storage keyed by name.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, DiktantError>;
    fn put(&self, key: &str, value: &str) -> Result<(), DiktantError>;
}

impl KeyValueStore for Database {
    fn get(&self, key: &str) -> Result<Option<String>, DiktantError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                rusqlite::params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| DiktantError::Storage(format!("Failed to read '{}': {}", key, e)))
        })
    }

    fn put(&self, key: &str, value: &str) -> Result<(), DiktantError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                rusqlite::params![key, value, Utc::now().timestamp()],
            )
            .map_err(|e| DiktantError::Storage(format!("Failed to write '{}': {}", key, e)))?;
            Ok(())
        })
    }
}

/// Non-durable store, used in tests and when the database cannot be opened.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, DiktantError> {
        let values = self
            .values
            .lock()
            .map_err(|e| DiktantError::Storage(format!("Store lock poisoned: {}", e)))?;
        Ok(values.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), DiktantError> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| DiktantError::Storage(format!("Store lock poisoned: {}", e)))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
