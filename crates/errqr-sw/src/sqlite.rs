//! SQLite-backed cache storage.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::cache::{ensure_cacheable, now_millis, CacheEntry, CacheKey, CacheStorage};
use crate::SwError;

/// Database schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// Cache storage that survives process restarts.
#[derive(Clone)]
pub struct SqliteCacheStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCacheStorage {
    /// Open or create the database at `path`.
    pub fn open_path(path: &Path) -> Result<Self, SwError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SwError::CacheError(format!("create {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "Opened cache database");
        Self::from_connection(conn)
    }

    /// In-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, SwError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, SwError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking database operation off the async runtime.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, SwError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, SwError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| SwError::CacheError("cache database lock poisoned".into()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| SwError::CacheError(format!("cache task failed: {e}")))?
    }
}

fn migrate(conn: &Connection) -> Result<(), SwError> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version >= SCHEMA_VERSION {
        return Ok(());
    }

    debug!(from = version, to = SCHEMA_VERSION, "Migrating cache database");
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS caches (
            name TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS entries (
            cache TEXT NOT NULL REFERENCES caches(name) ON DELETE CASCADE,
            method TEXT NOT NULL,
            url TEXT NOT NULL,
            status INTEGER NOT NULL,
            status_text TEXT NOT NULL,
            headers TEXT NOT NULL,
            body BLOB NOT NULL,
            cached_at INTEGER NOT NULL,
            PRIMARY KEY (cache, method, url)
        );

        PRAGMA user_version = 1;
        "#,
    )?;
    Ok(())
}

fn cache_exists(conn: &Connection, name: &str) -> Result<bool, SwError> {
    let found = conn
        .query_row("SELECT 1 FROM caches WHERE name = ?1", params![name], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

fn insert_entry(
    conn: &Connection,
    name: &str,
    key: &CacheKey,
    entry: &CacheEntry,
) -> Result<(), SwError> {
    let headers = serde_json::to_string(&entry.headers)
        .map_err(|e| SwError::CacheError(format!("encode headers: {e}")))?;
    conn.execute(
        "INSERT OR REPLACE INTO entries
            (cache, method, url, status, status_text, headers, body, cached_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            name,
            key.method,
            key.url,
            entry.status,
            entry.status_text,
            headers,
            entry.body.as_ref(),
            entry.cached_at as i64,
        ],
    )?;
    Ok(())
}

#[async_trait]
impl CacheStorage for SqliteCacheStorage {
    async fn open(&self, name: &str) -> Result<(), SwError> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO caches (name, created_at) VALUES (?1, ?2)",
                params![name, now_millis() as i64],
            )?;
            Ok(())
        })
        .await
    }

    async fn has(&self, name: &str) -> Result<bool, SwError> {
        let name = name.to_string();
        self.with_conn(move |conn| cache_exists(conn, &name)).await
    }

    async fn keys(&self) -> Result<Vec<String>, SwError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT name FROM caches ORDER BY created_at, name")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(names)
        })
        .await
    }

    async fn delete(&self, name: &str) -> Result<bool, SwError> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute("DELETE FROM caches WHERE name = ?1", params![name])?;
            Ok(removed > 0)
        })
        .await
    }

    async fn match_request(
        &self,
        name: &str,
        key: &CacheKey,
    ) -> Result<Option<CacheEntry>, SwError> {
        let name = name.to_string();
        let key = key.clone();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT status, status_text, headers, body, cached_at FROM entries
                     WHERE cache = ?1 AND method = ?2 AND url = ?3",
                    params![name, key.method, key.url],
                    |row| {
                        Ok((
                            row.get::<_, u16>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Vec<u8>>(3)?,
                            row.get::<_, i64>(4)?,
                        ))
                    },
                )
                .optional()?;

            let Some((status, status_text, headers, body, cached_at)) = row else {
                return Ok(None);
            };
            let headers: HashMap<String, String> = serde_json::from_str(&headers)
                .map_err(|e| SwError::CacheError(format!("decode headers: {e}")))?;

            Ok(Some(CacheEntry {
                url: key.url,
                status,
                status_text,
                headers,
                body: Bytes::from(body),
                cached_at: cached_at as u64,
            }))
        })
        .await
    }

    async fn put(&self, name: &str, key: CacheKey, entry: CacheEntry) -> Result<(), SwError> {
        ensure_cacheable(&key)?;
        let name = name.to_string();
        self.with_conn(move |conn| {
            if !cache_exists(conn, &name)? {
                return Err(SwError::NotFound(format!("cache {name}")));
            }
            insert_entry(conn, &name, &key, &entry)
        })
        .await
    }

    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(CacheKey, CacheEntry)>,
    ) -> Result<(), SwError> {
        for (key, _) in &entries {
            ensure_cacheable(key)?;
        }
        let name = name.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            if !cache_exists(&tx, &name)? {
                return Err(SwError::NotFound(format!("cache {name}")));
            }
            for (key, entry) in &entries {
                insert_entry(&tx, &name, key, entry)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn requests(&self, name: &str) -> Result<Vec<CacheKey>, SwError> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            if !cache_exists(conn, &name)? {
                return Err(SwError::NotFound(format!("cache {name}")));
            }
            let mut stmt =
                conn.prepare("SELECT method, url FROM entries WHERE cache = ?1 ORDER BY url, method")?;
            let keys = stmt
                .query_map(params![name], |row| {
                    Ok(CacheKey {
                        method: row.get(0)?,
                        url: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(keys)
        })
        .await
    }
}
