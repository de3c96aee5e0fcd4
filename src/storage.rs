//! Key-path JSON storage.
//!
//! Everything the subsystem persists (event buffers, the start-time marker,
//! counter state) goes through the [`PersistentStore`] trait: an ordered
//! sequence of string keys mapping to an arbitrary JSON value. Atomicity is
//! per single `update` call. The default backend is SQLite; an in-memory
//! backend serves tests and embedders that manage their own durability.

use crate::error::GleanError;
use crate::utils::debug_log;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Narrow storage contract the events subsystem owns its state through.
///
/// `get` on an interior path returns the assembled subtree as a JSON
/// object keyed by child names; `delete` removes the path and everything
/// beneath it. Path segments never contain `/`.
pub trait PersistentStore: Send + Sync {
    fn get(&self, path: &[&str]) -> Option<Value>;

    /// Atomically replace the value at `path` with `mutator(current)`.
    fn update(
        &self,
        path: &[&str],
        mutator: &mut dyn FnMut(Option<Value>) -> Value,
    ) -> Result<(), GleanError>;

    fn delete(&self, path: &[&str]) -> Result<(), GleanError>;
}

fn join_path(path: &[&str]) -> String {
    path.join("/")
}

/// Build a nested JSON object out of `(remaining segments, leaf value)`
/// pairs collected under a common prefix.
fn insert_nested(root: &mut Map<String, Value>, segments: &[&str], value: Value) {
    match segments {
        [] => {}
        [leaf] => {
            root.insert((*leaf).to_string(), value);
        }
        [head, rest @ ..] => {
            let entry = root
                .entry((*head).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(map) = entry {
                insert_nested(map, rest, value);
            }
        }
    }
}

fn assemble_subtree(children: Vec<(String, Value)>) -> Option<Value> {
    if children.is_empty() {
        return None;
    }
    let mut root = Map::new();
    for (suffix, value) in children {
        let segments: Vec<&str> = suffix.split('/').collect();
        insert_nested(&mut root, &segments, value);
    }
    Some(Value::Object(root))
}

/// Current schema version (must match MIGRATIONS.len())
const SCHEMA_VERSION: usize = 1;

/// Database migrations - each migration upgrades the schema by one version
const MIGRATIONS: &[&str] = &[
    // Migration 0 -> 1: Initial schema with the key-path table
    r#"
    CREATE TABLE store (
        path TEXT PRIMARY KEY NOT NULL,
        value TEXT NOT NULL
    );
    "#,
];

/// SQLite-backed store. One row per leaf path, value stored as JSON text.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (and migrate) the store at `db_path`, creating parent
    /// directories as needed.
    pub fn open(db_path: &Path) -> Result<Self, GleanError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Open with WAL mode and performance optimizations
        let mut conn = Connection::open(db_path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA temp_store=MEMORY;
            "#,
        )?;

        Self::initialize_schema(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Default database path: ~/.glean-events/events-db
    pub fn default_path() -> Result<PathBuf, GleanError> {
        let home = dirs::home_dir()
            .ok_or_else(|| GleanError::Generic("Could not determine home directory".to_string()))?;
        Ok(home.join(".glean-events").join("events-db"))
    }

    /// Initialize schema and handle migrations
    fn initialize_schema(conn: &mut Connection) -> Result<(), GleanError> {
        // FAST PATH: Check if database is already at current version
        let version_check: Result<usize, _> = conn.query_row(
            "SELECT value FROM schema_metadata WHERE key = 'version'",
            [],
            |row| {
                let version_str: String = row.get(0)?;
                version_str
                    .parse::<usize>()
                    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
            },
        );

        if let Ok(current_version) = version_check {
            if current_version == SCHEMA_VERSION {
                return Ok(());
            }
            if current_version > SCHEMA_VERSION {
                return Err(GleanError::Generic(format!(
                    "Store schema version {} is newer than supported version {}",
                    current_version, SCHEMA_VERSION
                )));
            }
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_metadata (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            );
            "#,
        )?;

        // Current schema version (0 if brand new database)
        let current_version: usize = conn
            .query_row(
                "SELECT value FROM schema_metadata WHERE key = 'version'",
                [],
                |row| {
                    let version_str: String = row.get(0)?;
                    version_str
                        .parse::<usize>()
                        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
                },
            )
            .unwrap_or(0);

        // Apply all missing migrations sequentially
        for target_version in current_version..SCHEMA_VERSION {
            let tx = conn.transaction()?;
            tx.execute_batch(MIGRATIONS[target_version])?;
            tx.execute(
                "INSERT INTO schema_metadata (key, value) VALUES ('version', ?1)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![(target_version + 1).to_string()],
            )?;
            tx.commit()?;
        }

        Ok(())
    }

    fn get_inner(&self, path: &[&str]) -> Result<Option<Value>, GleanError> {
        let joined = join_path(path);
        let conn = self.conn.lock().unwrap();

        let exact: Option<String> = conn
            .query_row(
                "SELECT value FROM store WHERE path = ?1",
                params![joined],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(text) = exact {
            return Ok(Some(serde_json::from_str(&text)?));
        }

        let mut stmt = conn.prepare("SELECT path, value FROM store WHERE path LIKE ?1")?;
        let prefix = format!("{}/", joined);
        let pattern = format!("{}%", prefix);
        let rows = stmt.query_map(params![pattern], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut children = Vec::new();
        for row in rows {
            let (full_path, text) = row?;
            let suffix = full_path[prefix.len()..].to_string();
            children.push((suffix, serde_json::from_str(&text)?));
        }

        Ok(assemble_subtree(children))
    }
}

impl PersistentStore for SqliteStore {
    fn get(&self, path: &[&str]) -> Option<Value> {
        match self.get_inner(path) {
            Ok(value) => value,
            Err(e) => {
                debug_log(&format!("store read failed for {}: {}", join_path(path), e));
                None
            }
        }
    }

    fn update(
        &self,
        path: &[&str],
        mutator: &mut dyn FnMut(Option<Value>) -> Value,
    ) -> Result<(), GleanError> {
        let joined = join_path(path);
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let current: Option<String> = tx
            .query_row(
                "SELECT value FROM store WHERE path = ?1",
                params![joined],
                |row| row.get(0),
            )
            .optional()?;
        let current = match current {
            Some(text) => Some(serde_json::from_str(&text)?),
            None => None,
        };

        let next = mutator(current);
        tx.execute(
            "INSERT INTO store (path, value) VALUES (?1, ?2)
             ON CONFLICT(path) DO UPDATE SET value = excluded.value",
            params![joined, serde_json::to_string(&next)?],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn delete(&self, path: &[&str]) -> Result<(), GleanError> {
        let joined = join_path(path);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM store WHERE path = ?1 OR path LIKE ?2",
            params![joined, format!("{}/%", joined)],
        )?;
        Ok(())
    }
}

/// In-memory store with the same path semantics as [`SqliteStore`].
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistentStore for MemoryStore {
    fn get(&self, path: &[&str]) -> Option<Value> {
        let joined = join_path(path);
        let entries = self.entries.lock().unwrap();

        if let Some(value) = entries.get(&joined) {
            return Some(value.clone());
        }

        let prefix = format!("{}/", joined);
        let children: Vec<(String, Value)> = entries
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, value)| (key[prefix.len()..].to_string(), value.clone()))
            .collect();
        assemble_subtree(children)
    }

    fn update(
        &self,
        path: &[&str],
        mutator: &mut dyn FnMut(Option<Value>) -> Value,
    ) -> Result<(), GleanError> {
        let joined = join_path(path);
        let mut entries = self.entries.lock().unwrap();
        let current = entries.get(&joined).cloned();
        entries.insert(joined, mutator(current));
        Ok(())
    }

    fn delete(&self, path: &[&str]) -> Result<(), GleanError> {
        let joined = join_path(path);
        let prefix = format!("{}/", joined);
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|key, _| key != &joined && !key.starts_with(&prefix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_store() -> (SqliteStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteStore::open(&temp_dir.path().join("test-store-db")).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_initialize_schema() {
        let (store, _temp_dir) = create_test_store();

        let conn = store.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='store'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);

        let version: String = conn
            .query_row(
                "SELECT value FROM schema_metadata WHERE key = 'version'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(version, "1");
    }

    #[test]
    fn test_leaf_round_trip() {
        let (store, _temp_dir) = create_test_store();

        store
            .update(&["events-meta", "start-time"], &mut |_| json!(12345))
            .unwrap();
        assert_eq!(store.get(&["events-meta", "start-time"]), Some(json!(12345)));
        assert_eq!(store.get(&["events-meta", "missing"]), None);
    }

    #[test]
    fn test_update_sees_current_value() {
        let (store, _temp_dir) = create_test_store();

        store
            .update(&["events", "aPing"], &mut |current| {
                assert!(current.is_none());
                json!([1])
            })
            .unwrap();
        store
            .update(&["events", "aPing"], &mut |current| {
                let mut arr = match current {
                    Some(Value::Array(a)) => a,
                    _ => Vec::new(),
                };
                arr.push(json!(2));
                Value::Array(arr)
            })
            .unwrap();

        assert_eq!(store.get(&["events", "aPing"]), Some(json!([1, 2])));
    }

    #[test]
    fn test_interior_get_assembles_subtree() {
        let (store, _temp_dir) = create_test_store();

        store
            .update(&["events", "aPing"], &mut |_| json!([1]))
            .unwrap();
        store
            .update(&["events", "bPing"], &mut |_| json!([2, 3]))
            .unwrap();

        assert_eq!(
            store.get(&["events"]),
            Some(json!({"aPing": [1], "bPing": [2, 3]}))
        );
    }

    #[test]
    fn test_delete_removes_subtree() {
        let (store, _temp_dir) = create_test_store();

        store
            .update(&["events", "aPing"], &mut |_| json!([1]))
            .unwrap();
        store
            .update(&["events-meta", "start-time"], &mut |_| json!(1))
            .unwrap();

        store.delete(&["events"]).unwrap();
        assert_eq!(store.get(&["events"]), None);
        assert_eq!(store.get(&["events", "aPing"]), None);
        // Sibling tree untouched
        assert_eq!(store.get(&["events-meta", "start-time"]), Some(json!(1)));
    }

    #[test]
    fn test_memory_store_matches_sqlite_semantics() {
        let store = MemoryStore::new();

        store
            .update(&["metrics", "user", "counter", "glean.execution_counter"], &mut |_| {
                json!({"events": 1})
            })
            .unwrap();
        store
            .update(&["events", "aPing"], &mut |_| json!([{"name": "e"}]))
            .unwrap();

        assert_eq!(
            store.get(&["metrics", "user", "counter", "glean.execution_counter"]),
            Some(json!({"events": 1}))
        );
        assert_eq!(
            store.get(&["events"]),
            Some(json!({"aPing": [{"name": "e"}]}))
        );

        store.delete(&["events", "aPing"]).unwrap();
        assert_eq!(store.get(&["events"]), None);
    }

    #[test]
    fn test_deep_subtree_assembly() {
        let store = MemoryStore::new();

        store
            .update(&["metrics", "user", "counter", "glean.error.invalid_value"], &mut |_| {
                json!({"test.metric": 2})
            })
            .unwrap();

        assert_eq!(
            store.get(&["metrics"]),
            Some(json!({
                "user": {"counter": {"glean.error.invalid_value": {"test.metric": 2}}}
            }))
        );
    }
}
