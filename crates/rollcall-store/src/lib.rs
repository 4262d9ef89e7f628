//! rollcall-store: SQLite persistence for students, embeddings and attendance.
//!
//! [`SqliteStore`] implements the core's [`AttendanceStore`] and adds the
//! student-management and reporting queries used by the CLI.

mod report;
mod students;

pub use report::{AttendanceRow, ReportFilter};
pub use students::{NewStudent, Student, StudentUpdate};

use chrono::{NaiveDate, NaiveTime, Utc};
use rollcall_core::{AttendanceMark, AttendanceStore, DataUnavailable, Embedding, EnrolledFace, Identity};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";
pub(crate) const TIME_FORMAT: &str = "%H:%M:%S";

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS students (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  student_id TEXT NOT NULL UNIQUE CHECK (length(student_id) > 0),
  name TEXT NOT NULL CHECK (length(name) > 0),
  department TEXT NOT NULL DEFAULT '',
  email TEXT NOT NULL DEFAULT '',
  face_encoding BLOB
);

CREATE TABLE IF NOT EXISTS attendance (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  student_id TEXT NOT NULL,
  date TEXT NOT NULL,
  time TEXT NOT NULL,
  UNIQUE(student_id, date),
  FOREIGN KEY (student_id) REFERENCES students(student_id) ON UPDATE CASCADE ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance(date);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to create database directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("student {0} already exists")]
    DuplicateStudent(String),
    #[error("no such student: {0}")]
    UnknownStudent(String),
    #[error("invalid student record: {0}")]
    InvalidStudent(&'static str),
    #[error("invalid date {0:?}: expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("corrupt {column} value {value:?} in attendance table")]
    Corrupt { column: &'static str, value: String },
    #[error("database connection lock poisoned")]
    Poisoned,
}

/// SQLite-backed store. The connection is guarded so the store can be
/// shared with the recognition thread.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        tracing::debug!(path = %path.display(), "opened attendance database");

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Fresh in-memory database, migrated.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Apply any schema migrations not yet recorded. Idempotent.
    pub fn migrate(&self) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        conn.execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)?;

        let current: i64 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )?;
        if current >= LATEST_SCHEMA_VERSION {
            return Ok(());
        }

        let tx = conn.transaction()?;
        tx.execute_batch(MIGRATION_001_SQL)?;
        tx.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
            params![1, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;

        tracing::info!(from = current, to = LATEST_SCHEMA_VERSION, "database schema migrated");
        Ok(())
    }

    pub fn schema_version(&self) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        Ok(conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )?)
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn load_enrolled(&self) -> Result<Vec<EnrolledFace>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT student_id, name, face_encoding FROM students ORDER BY student_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(EnrolledFace {
                identity: Identity::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
                encoding: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn load_marks(&self, date: NaiveDate) -> Result<Vec<AttendanceMark>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT student_id, date, time FROM attendance WHERE date = ?1 ORDER BY time",
        )?;
        let rows = stmt.query_map(params![date.format(DATE_FORMAT).to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut marks = Vec::new();
        for row in rows {
            let (student_id, date, time) = row?;
            marks.push(AttendanceMark {
                student_id,
                date: parse_date(&date)?,
                time: parse_time(&time)?,
            });
        }
        Ok(marks)
    }

    /// Insert a mark. A second mark for the same student and date is ignored.
    /// Returns whether a row was written.
    pub fn insert_mark(&self, mark: &AttendanceMark) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO attendance (student_id, date, time) VALUES (?1, ?2, ?3)",
            params![
                mark.student_id,
                mark.date.format(DATE_FORMAT).to_string(),
                mark.time.format(TIME_FORMAT).to_string(),
            ],
        )?;
        if inserted == 0 {
            tracing::debug!(student = %mark.student_id, date = %mark.date, "mark already stored");
        }
        Ok(inserted == 1)
    }

    pub fn store_embedding(&self, student_id: &str, embedding: &Embedding) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE students SET face_encoding = ?1 WHERE student_id = ?2",
            params![embedding.to_bytes(), student_id],
        )?;
        if updated == 0 {
            return Err(StoreError::UnknownStudent(student_id.to_string()));
        }
        tracing::info!(student = student_id, dim = embedding.dim(), "face embedding stored");
        Ok(())
    }

    fn lookup_identity(&self, student_id: &str) -> Result<Option<Identity>, StoreError> {
        let conn = self.lock()?;
        let name: Option<String> = conn
            .query_row(
                "SELECT name FROM students WHERE student_id = ?1",
                params![student_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name.map(|name| Identity::new(student_id, name)))
    }
}

pub(crate) fn parse_date(value: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| StoreError::Corrupt {
        column: "date",
        value: value.to_string(),
    })
}

pub(crate) fn parse_time(value: &str) -> Result<NaiveTime, StoreError> {
    NaiveTime::parse_from_str(value, TIME_FORMAT).map_err(|_| StoreError::Corrupt {
        column: "time",
        value: value.to_string(),
    })
}

impl AttendanceStore for SqliteStore {
    fn enrolled_faces(&self) -> Result<Vec<EnrolledFace>, DataUnavailable> {
        self.load_enrolled()
            .map_err(|e| DataUnavailable::new("loading enrolled faces", e))
    }

    fn marks_for_date(&self, date: NaiveDate) -> Result<Vec<AttendanceMark>, DataUnavailable> {
        self.load_marks(date)
            .map_err(|e| DataUnavailable::new("loading attendance marks", e))
    }

    fn append_mark(&self, mark: &AttendanceMark) -> Result<(), DataUnavailable> {
        self.insert_mark(mark)
            .map(|_| ())
            .map_err(|e| DataUnavailable::new("appending attendance mark", e))
    }

    fn save_embedding(&self, student_id: &str, embedding: &Embedding) -> Result<(), DataUnavailable> {
        self.store_embedding(student_id, embedding)
            .map_err(|e| DataUnavailable::new("saving face embedding", e))
    }

    fn find_identity(&self, student_id: &str) -> Result<Option<Identity>, DataUnavailable> {
        self.lookup_identity(student_id)
            .map_err(|e| DataUnavailable::new("looking up student", e))
    }
}
