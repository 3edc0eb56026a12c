use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::store::errors::{OpenCause, StoreError};
use crate::store::{Entry, Page, StampRange, StoreBackend};

/// SQLite file backend. All statements run on one connection behind a
/// mutex; each save writes value, version and stamp in a single statement.
#[derive(Debug)]
pub struct SqliteBackend {
    /// `None` once closed.
    conn: Mutex<Option<Connection>>,
}

impl SqliteBackend {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let open_error = |cause| StoreError::Open {
            path: path.display().to_string(),
            cause,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| {
                open_error(OpenCause::CreateDir {
                    path: parent.display().to_string(),
                    source,
                })
            })?;
        }

        let conn = Connection::open(path).map_err(|e| open_error(e.into()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS entries (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL,
                version TEXT NOT NULL,
                stamp INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS entries_stamp ON entries (stamp);",
        )
        .map_err(|e| open_error(e.into()))?;

        tracing::debug!(path = %path.display(), "Opened file store");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, StoreError> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        Ok(f(conn)?)
    }
}

fn sql_int(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

impl StoreBackend for SqliteBackend {
    fn save(&self, key: &str, value: &str, version: &str, stamp: i64) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO entries (key, value, version, stamp)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    version = excluded.version,
                    stamp = excluded.stamp",
                params![key, value, version, stamp],
            )
        })?;
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Entry>, StoreError> {
        self.with_conn(|conn| {
            let result = conn.query_row(
                "SELECT value, version, stamp FROM entries WHERE key = ?1",
                params![key],
                |row| {
                    Ok(Entry {
                        value: row.get(0)?,
                        version: row.get(1)?,
                        stamp: row.get(2)?,
                    })
                },
            );
            match result {
                Ok(entry) => Ok(Some(entry)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let rows = self.with_conn(|conn| {
            conn.execute("DELETE FROM entries WHERE key = ?1", params![key])
        })?;
        Ok(rows > 0)
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM entries ORDER BY key")?;
            let keys = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(keys)
        })
    }

    fn keys_in(&self, range: StampRange, page: Option<Page>) -> Result<Vec<String>, StoreError> {
        let (sql, stamp) = match range {
            StampRange::Since(n) => (
                "SELECT key FROM entries WHERE stamp >= ?1 ORDER BY key LIMIT ?2 OFFSET ?3",
                n,
            ),
            StampRange::Until(n) => (
                "SELECT key FROM entries WHERE stamp <= ?1 ORDER BY key LIMIT ?2 OFFSET ?3",
                n,
            ),
        };
        // LIMIT -1 means no limit
        let (limit, offset) = match page {
            Some(page) => (sql_int(page.size), sql_int(page.offset())),
            None => (-1, 0),
        };
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let keys = stmt
                .query_map(params![stamp, limit, offset], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(keys)
        })
    }

    fn evict(&self, range: StampRange) -> Result<usize, StoreError> {
        self.with_conn(|conn| match range {
            StampRange::Since(n) => conn.execute("DELETE FROM entries WHERE stamp >= ?1", params![n]),
            StampRange::Until(n) => conn.execute("DELETE FROM entries WHERE stamp <= ?1", params![n]),
        })
    }

    fn close(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().take();
        if let Some(conn) = conn {
            conn.close().map_err(|(_, e)| StoreError::Backend(e))?;
            tracing::debug!("Closed file store");
        }
        Ok(())
    }
}
