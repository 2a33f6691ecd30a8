use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};

use super::Store;
use super::schema::SCHEMA;
use crate::error::{Error, Result};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite metadata store.
///
/// One connection behind a mutex. Reads run directly on the connection;
/// writes run inside an IMMEDIATE transaction so the write lock is taken up
/// front rather than on first write.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns a guard to the underlying database connection.
    /// This allows consuming applications to execute custom SQL.
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn()
    }
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn();
        f(&conn)
    }

    fn write_then<T, F, G>(&self, f: F, finish: G) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
        G: FnOnce(&Result<T>),
    {
        let mut conn = self.conn();
        let result = run_immediate(&mut conn, f);
        finish(&result);
        result
    }
}

fn run_immediate<T, F>(conn: &mut Connection, f: F) -> Result<T>
where
    F: FnOnce(&Transaction<'_>) -> Result<T>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}

pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Maps a UNIQUE/CHECK failure to `Conflict` and passes everything else through.
pub(crate) fn map_constraint(e: rusqlite::Error, conflict: impl FnOnce() -> String) -> Error {
    match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Error::Conflict(conflict())
        }
        e => Error::from(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use rusqlite::params;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, SqliteStore) {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();
        (temp, store)
    }

    #[test]
    fn test_initialize_creates_tables() {
        let (_temp, store) = test_store();

        let conn = store.conn();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"users".to_string()));
        assert!(tables.contains(&"physical_files".to_string()));
        assert!(tables.contains(&"resources".to_string()));
        assert!(tables.contains(&"permissions".to_string()));
        assert!(tables.contains(&"resource_ancestors".to_string()));
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let (_temp, store) = test_store();
        store.initialize().unwrap();
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let (_temp, store) = test_store();
        let enabled: i64 = store
            .read(|conn| Ok(conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(enabled, 1);
    }

    #[test]
    fn test_write_rolls_back_on_error() {
        let (_temp, store) = test_store();

        let result: Result<()> = store.write(|tx| {
            tx.execute(
                "INSERT INTO users (username, email) VALUES (?1, ?2)",
                params!["alice", "alice@example.com"],
            )?;
            Err(Error::validation("abort"))
        });
        assert!(matches!(result, Err(Error::Validation(_))));

        let count: i64 = store
            .read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_write_commits_on_ok() {
        let (_temp, store) = test_store();

        store
            .write(|tx| {
                tx.execute(
                    "INSERT INTO users (username, email) VALUES (?1, ?2)",
                    params!["alice", "alice@example.com"],
                )?;
                Ok(())
            })
            .unwrap();

        let count: i64 = store
            .read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_write_then_sees_committed_outcome() {
        let (_temp, store) = test_store();

        let mut seen = Vec::new();
        let result = store.write_then(
            |tx| {
                tx.execute(
                    "INSERT INTO users (username, email) VALUES (?1, ?2)",
                    params!["alice", "alice@example.com"],
                )?;
                Ok(tx.last_insert_rowid())
            },
            |result| seen.push(result.is_ok()),
        );
        assert!(result.is_ok());

        // A duplicate email fails on insert and the finish step sees the error
        let result = store.write_then(
            |tx| {
                tx.execute(
                    "INSERT INTO users (username, email) VALUES (?1, ?2)",
                    params!["alice2", "alice@example.com"],
                )?;
                Ok(())
            },
            |result| seen.push(result.is_ok()),
        );
        assert!(matches!(result, Err(Error::Database(_))));
        assert_eq!(seen, vec![true, false]);

        let count: i64 = store
            .read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_file_kind_requires_physical_file() {
        let (_temp, store) = test_store();

        let result = store.write(|tx| {
            tx.execute(
                "INSERT INTO users (username, email) VALUES ('alice', 'alice@example.com')",
                [],
            )?;
            tx.execute(
                "INSERT INTO resources (owner_id, name, kind) VALUES (1, 'orphan.txt', 'file')",
                [],
            )?;
            Ok(())
        });
        assert!(matches!(result, Err(Error::Database(_))));
    }

    #[test]
    fn test_parse_datetime_formats() {
        let sqlite = parse_datetime("2024-03-01 12:30:00");
        assert_eq!(format_datetime(&sqlite), "2024-03-01T12:30:00+00:00");

        let rfc = parse_datetime("2024-03-01T12:30:00+02:00");
        assert_eq!(format_datetime(&rfc), "2024-03-01T10:30:00+00:00");
    }
}
