use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

/// One stored response inside a cache bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub bucket: String,
    pub url: String,
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
    pub checksum: String,
    pub stored_at: DateTime<Utc>,
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
        Self::prepare(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("storage: open in-memory database")?;
        Self::prepare(conn)
    }

    fn prepare(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("storage: enable foreign keys")?;
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

    pub fn get_value(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT value FROM kv WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .context("storage: query value")
    }

    pub fn put_value(&self, key: &str, value: &str) -> Result<()> {
        if key.is_empty() {
            bail!("storage: key required");
        }
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO kv (key, value, updated_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(key) DO UPDATE SET
  value = excluded.value,
  updated_at = excluded.updated_at
"#,
            params![key, value, Utc::now().timestamp()],
        )
        .context("storage: write value")?;
        Ok(())
    }

    pub fn delete_value(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])
            .context("storage: delete value")?;
        Ok(())
    }

    /// Creates the bucket if it does not exist yet.
    pub fn open_bucket(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            bail!("storage: bucket name required");
        }
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO cache_buckets (name, created_at) VALUES (?1, ?2)",
            params![name, Utc::now().timestamp()],
        )
        .context("storage: open bucket")?;
        Ok(())
    }

    pub fn list_buckets(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT name FROM cache_buckets ORDER BY rowid ASC")?;
        let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
    }

    /// Removes a bucket and every entry stored in it. Returns whether the
    /// bucket existed.
    pub fn delete_bucket(&self, name: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let removed = conn
            .execute("DELETE FROM cache_buckets WHERE name = ?1", params![name])
            .context("storage: delete bucket")?;
        Ok(removed > 0)
    }

    pub fn put_entry(&self, entry: &CacheEntry) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("storage: begin put")?;
        insert_entry(&tx, entry)?;
        tx.commit().context("storage: commit put")
    }

    /// Stores every entry or none of them.
    pub fn put_all(&self, entries: &[CacheEntry]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("storage: begin batch")?;
        for entry in entries {
            insert_entry(&tx, entry)?;
        }
        tx.commit().context("storage: commit batch")
    }

    /// Looks up `url` in every bucket, oldest bucket first.
    pub fn match_entry(&self, url: &str) -> Result<Option<CacheEntry>> {
        let conn = self.conn.lock();
        conn.query_row(
            r#"
SELECT e.bucket, e.url, e.status, e.content_type, e.body, e.checksum, e.stored_at
FROM cache_entries e
JOIN cache_buckets b ON b.name = e.bucket
WHERE e.url = ?1
ORDER BY b.rowid ASC
LIMIT 1
"#,
            params![url],
            cache_entry_from_row,
        )
        .optional()
        .context("storage: match cache entry")
    }

    pub fn count_entries(&self, bucket: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM cache_entries WHERE bucket = ?1",
            params![bucket],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }
}

fn insert_entry(conn: &Connection, entry: &CacheEntry) -> Result<()> {
    if entry.url.is_empty() {
        bail!("storage: cache url required");
    }
    conn.execute(
        "INSERT OR IGNORE INTO cache_buckets (name, created_at) VALUES (?1, ?2)",
        params![entry.bucket, Utc::now().timestamp()],
    )?;
    conn.execute(
        r#"
INSERT INTO cache_entries (bucket, url, status, content_type, body, checksum, stored_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
ON CONFLICT(bucket, url) DO UPDATE SET
  status = excluded.status,
  content_type = excluded.content_type,
  body = excluded.body,
  checksum = excluded.checksum,
  stored_at = excluded.stored_at
"#,
        params![
            entry.bucket,
            entry.url,
            entry.status,
            entry.content_type,
            entry.body,
            entry.checksum,
            entry.stored_at.timestamp(),
        ],
    )
    .with_context(|| format!("storage: store {}", entry.url))?;
    Ok(())
}

fn cache_entry_from_row(row: &Row<'_>) -> rusqlite::Result<CacheEntry> {
    let stored: i64 = row.get(6)?;
    Ok(CacheEntry {
        bucket: row.get(0)?,
        url: row.get(1)?,
        status: row.get(2)?,
        content_type: row.get(3)?,
        body: row.get(4)?,
        checksum: row.get(5)?,
        stored_at: Utc
            .timestamp_opt(stored, 0)
            .single()
            .unwrap_or_else(Utc::now),
    })
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

    let migrations = migrations();
    for (idx, sql) in migrations.iter().enumerate() {
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
    vec![
        r#"
CREATE TABLE IF NOT EXISTS kv (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL,
  updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS cache_buckets (
  name TEXT PRIMARY KEY,
  created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS cache_entries (
  bucket TEXT NOT NULL,
  url TEXT NOT NULL,
  status INTEGER NOT NULL,
  content_type TEXT NOT NULL,
  body BLOB NOT NULL,
  checksum TEXT NOT NULL,
  stored_at INTEGER NOT NULL,
  PRIMARY KEY (bucket, url),
  FOREIGN KEY(bucket) REFERENCES cache_buckets(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_url ON cache_entries(url);
"#,
    ]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("clawmic-reader").join("state.db"))
}

pub fn default_offline_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("clawmic-reader").join("offline.db"))
}
