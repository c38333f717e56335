use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::filters::StateStore;

/// Local SQLite store for state that should survive incidental restarts of
/// the viewer but is wiped on an explicit hard reload.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEntry {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("storage: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn close(self) -> Result<()> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| anyhow!("storage: connection still in use"))?
            .into_inner();
        conn.close()
            .map_err(|(_, err)| err)
            .context("storage: close connection")
    }

    pub fn put_state(&self, key: &str, value: &str) -> Result<()> {
        if key.is_empty() {
            bail!("storage: state key required");
        }
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO session_state (key, value, updated_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(key) DO UPDATE SET
  value = excluded.value,
  updated_at = excluded.updated_at
"#,
            params![key, value, Utc::now().timestamp()],
        )
        .context("storage: upsert session state")?;
        Ok(())
    }

    pub fn get_state(&self, key: &str) -> Result<Option<StateEntry>> {
        let conn = self.conn.lock();
        conn.query_row(
            r#"
SELECT key, value, updated_at
FROM session_state
WHERE key = ?1
"#,
            params![key],
            |row| {
                let updated: i64 = row.get(2)?;
                Ok(StateEntry {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    updated_at: Utc
                        .timestamp_opt(updated, 0)
                        .single()
                        .unwrap_or_else(Utc::now),
                })
            },
        )
        .optional()
        .context("storage: query session state")
    }

    pub fn delete_state(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM session_state WHERE key = ?1", params![key])
            .context("storage: delete session state")?;
        Ok(())
    }
}

impl StateStore for Store {
    fn load_state(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get_state(key)?.map(|entry| entry.value))
    }

    fn save_state(&self, key: &str, value: &str) -> Result<()> {
        self.put_state(key, value)
    }

    fn remove_state(&self, key: &str) -> Result<()> {
        self.delete_state(key)
    }
}

/// Process-local state, used when the database cannot be opened and in tests.
#[derive(Debug, Default)]
pub struct MemoryState {
    values: Mutex<HashMap<String, String>>,
}

impl StateStore for MemoryState {
    fn load_state(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn save_state(&self, key: &str, value: &str) -> Result<()> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_state(&self, key: &str) -> Result<()> {
        self.values.lock().remove(key);
        Ok(())
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    for (idx, sql) in migrations().iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![
                version,
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::from_secs(0))
                    .as_secs() as i64,
            ],
        )?;
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![r#"
CREATE TABLE IF NOT EXISTS session_state (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL,
  updated_at INTEGER NOT NULL
);
"#]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("gallery-tui").join("state.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_at(path: &std::path::Path) -> Store {
        Store::open(Options {
            path: Some(path.to_path_buf()),
        })
        .unwrap()
    }

    #[test]
    fn creates_database_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");
        let store = open_at(&path);
        assert!(path.exists());
        store.close().unwrap();
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");
        let store = open_at(&path);
        store.put_state("galleryFilters", r#"{"tags":["a"]}"#).unwrap();
        store.put_state("galleryFilters", r#"{"tags":["b"]}"#).unwrap();
        store.close().unwrap();

        let store = open_at(&path);
        let entry = store.get_state("galleryFilters").unwrap().unwrap();
        assert_eq!(entry.value, r#"{"tags":["b"]}"#);
    }

    #[test]
    fn delete_removes_entry() {
        let dir = tempdir().unwrap();
        let store = open_at(&dir.path().join("state.db"));
        store.save_state("k", "v").unwrap();
        store.remove_state("k").unwrap();
        assert!(store.load_state("k").unwrap().is_none());
    }

    #[test]
    fn empty_key_is_rejected() {
        let dir = tempdir().unwrap();
        let store = open_at(&dir.path().join("state.db"));
        assert!(store.put_state("", "v").is_err());
    }
}
