//! SQLite attendance log. The table's unique key enforces one row per
//! identity per day, including across processes sharing the file.

use chrono::{DateTime, Local, NaiveDate};
use rollcall_core::{AttendanceStore, StoreError};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

const SCHEMA: &str = "
    PRAGMA journal_mode = WAL;
    CREATE TABLE IF NOT EXISTS attendance (
        row_id      TEXT PRIMARY KEY,
        identity_id TEXT NOT NULL,
        status      TEXT NOT NULL DEFAULT 'present',
        day         TEXT NOT NULL,
        recorded_at TEXT NOT NULL,
        UNIQUE (identity_id, day)
    );
";

const BUSY_TIMEOUT: Duration = Duration::from_secs(2);

pub struct SqliteAttendanceStore {
    conn: Connection,
}

impl SqliteAttendanceStore {
    /// Open (or create) the database and its schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(unavailable)?;
        Self::init(conn)
    }

    #[cfg(test)]
    fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().map_err(unavailable)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT).map_err(unavailable)?;
        conn.execute_batch(SCHEMA).map_err(unavailable)?;
        Ok(Self { conn })
    }

    /// Identities marked present on `day`, in the order they were recorded.
    pub fn present_on(&self, day: NaiveDate) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT identity_id FROM attendance WHERE day = ?1 ORDER BY recorded_at")
            .map_err(unavailable)?;
        let rows = stmt
            .query_map(params![day.to_string()], |row| row.get::<_, String>(0))
            .map_err(unavailable)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(unavailable)
    }
}

impl AttendanceStore for SqliteAttendanceStore {
    fn already_recorded(&self, identity_id: &str, day: NaiveDate) -> Result<bool, StoreError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM attendance WHERE identity_id = ?1 AND day = ?2",
                params![identity_id, day.to_string()],
                |_| Ok(()),
            )
            .optional()
            .map_err(unavailable)?;
        Ok(found.is_some())
    }

    fn record_present(&mut self, identity_id: &str, at: DateTime<Local>) -> Result<(), StoreError> {
        let day = at.date_naive();
        let inserted = self.conn.execute(
            "INSERT INTO attendance (row_id, identity_id, status, day, recorded_at)
             VALUES (?1, ?2, 'present', ?3, ?4)",
            params![
                Uuid::new_v4().to_string(),
                identity_id,
                day.to_string(),
                at.to_rfc3339()
            ],
        );
        match inserted {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Duplicate {
                    identity_id: identity_id.to_string(),
                    day,
                })
            }
            Err(e) => Err(unavailable(e)),
        }
    }
}

fn unavailable(e: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rollcall_core::{AttendanceDeduper, EmitOutcome};

    fn at(day: u32, h: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, day, h, 0, 0).single().unwrap()
    }

    #[test]
    fn test_record_and_query() {
        let mut store = SqliteAttendanceStore::open_in_memory().unwrap();
        assert!(!store.already_recorded("17", at(14, 9).date_naive()).unwrap());
        store.record_present("17", at(14, 9)).unwrap();
        assert!(store.already_recorded("17", at(14, 9).date_naive()).unwrap());
        assert!(!store.already_recorded("17", at(15, 9).date_naive()).unwrap());
        assert!(!store.already_recorded("18", at(14, 9).date_naive()).unwrap());
    }

    #[test]
    fn test_second_row_same_day_rejected() {
        let mut store = SqliteAttendanceStore::open_in_memory().unwrap();
        store.record_present("17", at(14, 9)).unwrap();
        let again = store.record_present("17", at(14, 15));
        assert!(matches!(
            again,
            Err(StoreError::Duplicate { ref identity_id, .. }) if identity_id == "17"
        ));
        store.record_present("17", at(15, 9)).unwrap();
        assert_eq!(store.present_on(at(14, 0).date_naive()).unwrap(), vec!["17".to_string()]);
    }

    #[test]
    fn test_rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log/attendance.db");
        {
            let mut store = SqliteAttendanceStore::open(&path).unwrap();
            store.record_present("17", at(14, 9)).unwrap();
            store.record_present("23", at(14, 10)).unwrap();
        }
        let reopened = SqliteAttendanceStore::open(&path).unwrap();
        assert!(reopened.already_recorded("23", at(14, 12).date_naive()).unwrap());
        assert_eq!(
            reopened.present_on(at(14, 0).date_naive()).unwrap(),
            vec!["17".to_string(), "23".to_string()]
        );
    }

    #[test]
    fn test_two_writers_share_one_row_per_day() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.db");
        let mut first = SqliteAttendanceStore::open(&path).unwrap();
        let mut second = SqliteAttendanceStore::open(&path).unwrap();

        let mut a = AttendanceDeduper::new(Duration::from_secs(60));
        let mut b = AttendanceDeduper::new(Duration::from_secs(60));
        assert_eq!(a.decide_emit(&mut first, "17", at(14, 9)), EmitOutcome::Emitted);
        assert_eq!(b.decide_emit(&mut second, "17", at(14, 9)), EmitOutcome::AlreadyRecorded);
        assert_eq!(first.present_on(at(14, 0).date_naive()).unwrap().len(), 1);
    }
}
