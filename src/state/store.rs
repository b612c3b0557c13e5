use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};

use crate::errors::StoreError;

/// A single stored key.
///
/// `name` is the read-write key, `roname` its read-only twin. `value` stays
/// `None` until the first update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub name: String,
    pub roname: String,
    pub value: Option<String>,
    pub last_accessed: DateTime<Utc>,
}

impl Record {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let millis: i64 = row.get("last_accessed")?;
        let last_accessed = DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                Type::Integer,
                format!("last_accessed out of range: {millis}").into(),
            )
        })?;

        Ok(Self {
            name: row.get("name")?,
            roname: row.get("roname")?,
            value: row.get("value")?,
            last_accessed,
        })
    }
}

/// SQLite-backed record table shared by all handlers.
///
/// Every access goes through [`RecordStore::unit_of_work`], which holds the
/// connection for the duration of one transaction.
#[derive(Clone)]
pub struct RecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl RecordStore {
    /// Open (or create) a file database.
    ///
    /// With `drop_existing` the keys table is dropped before the schema is
    /// created again.
    pub fn open(path: &Path, drop_existing: bool) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Self::from_connection(conn, drop_existing)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, false)
    }

    fn from_connection(conn: Connection, drop_existing: bool) -> Result<Self, StoreError> {
        if drop_existing {
            tracing::warn!("Dropping keys table (DANGEROUS_DELETE_TABLE is set)");
            conn.execute("DROP TABLE IF EXISTS keys", [])?;
        }
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS keys (
                name TEXT PRIMARY KEY NOT NULL,
                roname TEXT NOT NULL UNIQUE,
                value TEXT,
                last_accessed INTEGER NOT NULL
                    DEFAULT (CAST(strftime('%s', 'now') AS INTEGER) * 1000)
            );
            CREATE INDEX IF NOT EXISTS keys_last_accessed ON keys (last_accessed);",
        )?;
        Ok(())
    }

    /// Run `f` inside one immediate transaction on a blocking thread.
    ///
    /// The transaction commits only if `f` returns `Ok`; any error (business
    /// or storage) or panic rolls it back, and the connection is released on
    /// every path.
    pub async fn unit_of_work<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&UnitOfWork<'_>) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);

        let joined = tokio::task::spawn_blocking(move || -> Result<T, E> {
            // A panicking unit of work has already rolled back on unwind.
            let mut guard = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

            let tx = guard
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(StoreError::from)?;
            let uow = UnitOfWork { tx };

            let out = f(&uow)?;
            uow.tx.commit().map_err(StoreError::from)?;
            Ok(out)
        })
        .await;

        match joined {
            Ok(result) => result,
            Err(join_err) => Err(E::from(StoreError::from(join_err))),
        }
    }
}

/// One open transaction on the keys table.
pub struct UnitOfWork<'c> {
    tx: Transaction<'c>,
}

impl UnitOfWork<'_> {
    /// Look up by read-write name only.
    pub fn find_by_name(&self, name: &str) -> Result<Option<Record>, StoreError> {
        Ok(self
            .tx
            .query_row(
                "SELECT name, roname, value, last_accessed FROM keys WHERE name = ?1 LIMIT 1",
                params![name],
                Record::from_row,
            )
            .optional()?)
    }

    /// Look up by either the read-write or the read-only name.
    pub fn find_by_any_name(&self, id: &str) -> Result<Option<Record>, StoreError> {
        Ok(self
            .tx
            .query_row(
                "SELECT name, roname, value, last_accessed FROM keys
                 WHERE name = ?1 OR roname = ?1 LIMIT 1",
                params![id],
                Record::from_row,
            )
            .optional()?)
    }

    /// True if either candidate is already used as a name or roname.
    pub fn any_taken(&self, name: &str, roname: &str) -> Result<bool, StoreError> {
        let hits: i64 = self.tx.query_row(
            "SELECT COUNT(*) FROM keys
             WHERE name = ?1 OR roname = ?2 OR name = ?2 OR roname = ?1",
            params![name, roname],
            |row| row.get(0),
        )?;
        Ok(hits > 0)
    }

    pub fn insert(&self, name: &str, roname: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.tx.execute(
            "INSERT INTO keys (name, roname, value, last_accessed) VALUES (?1, ?2, NULL, ?3)",
            params![name, roname, now.timestamp_millis()],
        )?;
        Ok(())
    }

    /// Overwrite the value and refresh the access time.
    pub fn set_value(&self, name: &str, value: &str, now: DateTime<Utc>) -> Result<usize, StoreError> {
        Ok(self.tx.execute(
            "UPDATE keys SET value = ?2, last_accessed = MAX(last_accessed, ?3) WHERE name = ?1",
            params![name, value, now.timestamp_millis()],
        )?)
    }

    /// Refresh the access time. Never moves it backwards.
    pub fn touch(&self, name: &str, now: DateTime<Utc>) -> Result<usize, StoreError> {
        Ok(self.tx.execute(
            "UPDATE keys SET last_accessed = MAX(last_accessed, ?2) WHERE name = ?1",
            params![name, now.timestamp_millis()],
        )?)
    }

    pub fn delete(&self, name: &str) -> Result<usize, StoreError> {
        Ok(self
            .tx
            .execute("DELETE FROM keys WHERE name = ?1", params![name])?)
    }

    /// Remove every record last accessed strictly before `cutoff`.
    pub fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        Ok(self.tx.execute(
            "DELETE FROM keys WHERE last_accessed < ?1",
            params![cutoff.timestamp_millis()],
        )?)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .tx
            .query_row("SELECT COUNT(*) FROM keys", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    #[cfg(test)]
    pub fn execute_raw(&self, sql: &str) -> Result<(), StoreError> {
        self.tx.execute_batch(sql)?;
        Ok(())
    }

    /// Backdate a record, bypassing the monotonic guard.
    #[cfg(test)]
    pub fn set_last_accessed(&self, name: &str, at: DateTime<Utc>) -> Result<usize, StoreError> {
        Ok(self.tx.execute(
            "UPDATE keys SET last_accessed = ?2 WHERE name = ?1",
            params![name, at.timestamp_millis()],
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn insert_then_find_by_either_name() {
        let store = RecordStore::open_in_memory().unwrap();
        let now = Utc::now();

        let (by_rw, by_ro, by_ro_write) = store
            .unit_of_work(move |uow| -> Result<_, StoreError> {
                uow.insert("alpha", "readonly-aa", now)?;
                Ok((
                    uow.find_by_any_name("alpha")?,
                    uow.find_by_any_name("readonly-aa")?,
                    uow.find_by_name("readonly-aa")?,
                ))
            })
            .await
            .unwrap();

        let rec = by_rw.unwrap();
        assert_eq!(rec.roname, "readonly-aa");
        assert_eq!(rec.value, None);
        assert_eq!(rec.last_accessed.timestamp_millis(), now.timestamp_millis());
        assert_eq!(by_ro.unwrap().name, "alpha");
        assert!(by_ro_write.is_none());
    }

    #[tokio::test]
    async fn any_taken_checks_both_columns_both_ways() {
        let store = RecordStore::open_in_memory().unwrap();
        let taken = store
            .unit_of_work(|uow| -> Result<_, StoreError> {
                uow.insert("alpha", "readonly-aa", Utc::now())?;
                Ok([
                    uow.any_taken("alpha", "x")?,
                    uow.any_taken("readonly-aa", "x")?,
                    uow.any_taken("x", "alpha")?,
                    uow.any_taken("x", "readonly-aa")?,
                    uow.any_taken("x", "y")?,
                ])
            })
            .await
            .unwrap();

        assert_eq!(taken, [true, true, true, true, false]);
    }

    #[tokio::test]
    async fn error_rolls_back_the_unit_of_work() {
        let store = RecordStore::open_in_memory().unwrap();

        let res: Result<(), StoreError> = store
            .unit_of_work(|uow| {
                uow.insert("alpha", "readonly-aa", Utc::now())?;
                Err(StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
            })
            .await;
        assert!(res.is_err());

        let count = store
            .unit_of_work(|uow| uow.count())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn touch_never_moves_backwards() {
        let store = RecordStore::open_in_memory().unwrap();
        let now = Utc::now();

        let rec = store
            .unit_of_work(move |uow| -> Result<_, StoreError> {
                uow.insert("alpha", "readonly-aa", now)?;
                uow.touch("alpha", now - Duration::hours(1))?;
                uow.find_by_name("alpha")
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(rec.last_accessed.timestamp_millis(), now.timestamp_millis());
    }

    #[tokio::test]
    async fn delete_older_than_uses_strict_cutoff() {
        let store = RecordStore::open_in_memory().unwrap();
        let now = Utc::now();

        let (removed, left) = store
            .unit_of_work(move |uow| -> Result<_, StoreError> {
                uow.insert("old", "readonly-01", now - Duration::hours(2))?;
                uow.insert("edge", "readonly-02", now - Duration::hours(1))?;
                uow.insert("new", "readonly-03", now)?;
                let removed = uow.delete_older_than(now - Duration::hours(1))?;
                Ok((removed, uow.count()?))
            })
            .await
            .unwrap();

        assert_eq!(removed, 1);
        assert_eq!(left, 2);
    }

    #[tokio::test]
    async fn file_database_survives_reopen_unless_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("keys.sqlite3");

        let store = RecordStore::open(&path, false).unwrap();
        store
            .unit_of_work(|uow| uow.insert("alpha", "readonly-aa", Utc::now()))
            .await
            .unwrap();
        drop(store);

        let reopened = RecordStore::open(&path, false).unwrap();
        let count = reopened.unit_of_work(|uow| uow.count()).await.unwrap();
        assert_eq!(count, 1);
        drop(reopened);

        let wiped = RecordStore::open(&path, true).unwrap();
        let count = wiped.unit_of_work(|uow| uow.count()).await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn out_of_range_timestamp_is_an_error_not_the_epoch() {
        let store = RecordStore::open_in_memory().unwrap();

        let res = store
            .unit_of_work(|uow| -> Result<_, StoreError> {
                uow.execute_raw(
                    "INSERT INTO keys (name, roname, value, last_accessed)
                     VALUES ('alpha', 'readonly-aa', NULL, 9223372036854775807)",
                )?;
                uow.find_by_name("alpha")
            })
            .await;

        assert!(matches!(
            res,
            Err(StoreError::Sqlite(rusqlite::Error::FromSqlConversionFailure(3, Type::Integer, _)))
        ));
    }
}
