//! Durable key/value slots for saved sessions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};

/// Slot holding the one saved session.
pub const SAVE_SLOT: &str = "savedState";

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot store lock poisoned")]
    Poisoned,
    #[error("serialization error: {0}")]
    Serde(String),
}

/// String blobs stored under string keys.
///
/// `put` replaces whatever the slot held; a failed `put` leaves it intact.
pub trait SnapshotStore: Send + Sync {
    fn put(&self, key: &str, blob: &str) -> Result<(), SnapshotError>;
    fn get(&self, key: &str) -> Result<Option<String>, SnapshotError>;
    fn delete(&self, key: &str) -> Result<(), SnapshotError>;
}

/// In-process store; contents die with the process.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    slots: Mutex<HashMap<String, String>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn put(&self, key: &str, blob: &str) -> Result<(), SnapshotError> {
        let mut slots = self.slots.lock().map_err(|_| SnapshotError::Poisoned)?;
        slots.insert(key.to_string(), blob.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, SnapshotError> {
        let slots = self.slots.lock().map_err(|_| SnapshotError::Poisoned)?;
        Ok(slots.get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<(), SnapshotError> {
        let mut slots = self.slots.lock().map_err(|_| SnapshotError::Poisoned)?;
        slots.remove(key);
        Ok(())
    }
}

/// SQLite-backed store: one row per slot.
#[derive(Clone)]
pub struct SqliteSnapshotStore {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSnapshotStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             CREATE TABLE IF NOT EXISTS snapshots (
               slot TEXT PRIMARY KEY,
               blob TEXT NOT NULL,
               updated_at INTEGER NOT NULL
             );",
        )?;

        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("ANIMESORT_SAVE_PATH") {
            return PathBuf::from(path);
        }
        PathBuf::from(".animesort_save.sqlite")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_conn<F, R>(&self, f: F) -> Result<R, SnapshotError>
    where
        F: FnOnce(&Connection) -> Result<R, SnapshotError>,
    {
        let guard = self.conn.lock().map_err(|_| SnapshotError::Poisoned)?;
        f(&guard)
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    fn put(&self, key: &str, blob: &str) -> Result<(), SnapshotError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO snapshots (slot, blob, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(slot) DO UPDATE SET
                    blob = excluded.blob,
                    updated_at = excluded.updated_at",
                params![key, blob, now_epoch()],
            )?;
            Ok(())
        })
    }

    fn get(&self, key: &str) -> Result<Option<String>, SnapshotError> {
        self.with_conn(|conn| {
            let blob = conn
                .query_row(
                    "SELECT blob FROM snapshots WHERE slot = ?1",
                    params![key],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            Ok(blob)
        })
    }

    fn delete(&self, key: &str) -> Result<(), SnapshotError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM snapshots WHERE slot = ?1", params![key])?;
            Ok(())
        })
    }
}

fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_put_get_delete() {
        let store = MemorySnapshotStore::new();
        assert_eq!(store.get(SAVE_SLOT).unwrap(), None);
        store.put(SAVE_SLOT, "one").unwrap();
        store.put(SAVE_SLOT, "two").unwrap();
        assert_eq!(store.get(SAVE_SLOT).unwrap().as_deref(), Some("two"));
        store.delete(SAVE_SLOT).unwrap();
        assert_eq!(store.get(SAVE_SLOT).unwrap(), None);
        // Deleting an empty slot is fine.
        store.delete(SAVE_SLOT).unwrap();
    }

    #[test]
    fn sqlite_store_overwrites_an_existing_slot() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteSnapshotStore::new(dir.path().join("save.sqlite")).unwrap();
        store.put(SAVE_SLOT, "first").unwrap();
        store.put(SAVE_SLOT, "second").unwrap();
        assert_eq!(store.get(SAVE_SLOT).unwrap().as_deref(), Some("second"));

        let rows: i64 = store
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(rows, 1);
    }
}
