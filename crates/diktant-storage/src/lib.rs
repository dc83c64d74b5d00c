//! Diktant Storage crate - durable lesson progress.
//!
//! Provides a WAL-mode SQLite database with migrations, a small key-value
//! seam over it, and the progress store that keeps one JSON-serialized map
//! of lesson progress under a fixed key.

pub mod db;
pub mod kv;
pub mod migrations;
pub mod progress;

pub use db::Database;
pub use kv::{KeyValueStore, MemoryStore};
pub use progress::ProgressStore;
