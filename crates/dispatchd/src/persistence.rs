//! SQLite-backed job and driver records.

use chrono::{DateTime, SecondsFormat, Utc};
use dispatch_core::state::{JobStatus, UnknownStatus};
use dispatch_core::types::{Driver, DriverId, Job, JobId, NewDriver, NewJob};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("sqlite error: {source}")]
    Sql {
        #[from]
        source: rusqlite::Error,
    },
    #[error("timestamp parse error for value '{value}': {source}")]
    TimestampParse {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("stored job {job_id} has {source}")]
    CorruptStatus {
        job_id: i64,
        #[source]
        source: UnknownStatus,
    },
    #[error("store connection lock poisoned")]
    LockPoisoned,
}

/// Durable record store for jobs and the driver roster.
///
/// `update_job_if_status` is the only way a job row changes after insert; it
/// must apply atomically and only when the stored status still equals
/// `expected`.
pub trait JobStore: Send + Sync {
    fn insert_job(&self, spec: &NewJob, at: DateTime<Utc>) -> Result<Job, PersistenceError>;
    fn load_job(&self, job_id: JobId) -> Result<Option<Job>, PersistenceError>;
    /// Newest first, optionally restricted to one status.
    fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<Job>, PersistenceError>;
    fn count_jobs(&self) -> Result<usize, PersistenceError>;
    /// Returns false when no row matched `job.id` with status `expected`.
    fn update_job_if_status(
        &self,
        job: &Job,
        expected: JobStatus,
    ) -> Result<bool, PersistenceError>;

    /// Insert unless the phone is already registered; returns the stored row.
    fn register_driver(
        &self,
        spec: &NewDriver,
        at: DateTime<Utc>,
    ) -> Result<Driver, PersistenceError>;
    fn list_drivers(&self) -> Result<Vec<Driver>, PersistenceError>;
    fn toggle_driver(&self, driver_id: DriverId) -> Result<Option<Driver>, PersistenceError>;
    fn active_driver_phones(&self) -> Result<Vec<String>, PersistenceError>;
}

const JOB_COLUMNS: &str = "id, title, location, food_type, expires_at, contact_name, \
contact_phone, status, claimed_by, photo_path, created_at, updated_at";

const DRIVER_COLUMNS: &str = "id, name, phone, is_active, created_at";

#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn migrate(&self) -> Result<(), PersistenceError> {
        self.conn()?.execute_batch(
            r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    location TEXT NOT NULL,
    food_type TEXT,
    expires_at TEXT,
    contact_name TEXT,
    contact_phone TEXT,
    status TEXT NOT NULL DEFAULT 'open',
    claimed_by TEXT,
    photo_path TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_created ON jobs(created_at);
CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status, created_at);

CREATE TABLE IF NOT EXISTS drivers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL DEFAULT '',
    phone TEXT NOT NULL UNIQUE,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);
"#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, PersistenceError> {
        self.conn.lock().map_err(|_| PersistenceError::LockPoisoned)
    }
}

impl JobStore for SqliteStore {
    fn insert_job(&self, spec: &NewJob, at: DateTime<Utc>) -> Result<Job, PersistenceError> {
        let stamp = timestamp_tag(at);
        let conn = self.conn()?;
        conn.execute(
            r#"
INSERT INTO jobs (title, location, food_type, expires_at, contact_name, contact_phone,
                  status, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
"#,
            params![
                spec.title,
                spec.location,
                spec.food_type.clone().unwrap_or_default(),
                spec.expires_at,
                spec.contact_name.clone().unwrap_or_default(),
                spec.contact_phone.clone().unwrap_or_default(),
                JobStatus::Open.as_str(),
                stamp,
            ],
        )?;
        let id = JobId(conn.last_insert_rowid());
        Ok(Job::posted(id, spec, parse_timestamp(&stamp)?))
    }

    fn load_job(&self, job_id: JobId) -> Result<Option<Job>, PersistenceError> {
        let row = self
            .conn()?
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![job_id.0],
                read_job_row,
            )
            .optional()?;
        row.map(JobRow::into_job).transpose()
    }

    fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<Job>, PersistenceError> {
        let conn = self.conn()?;
        let rows = match status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ?1 ORDER BY created_at DESC, id DESC"
                ))?;
                let rows = stmt
                    .query_map(params![status.as_str()], read_job_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC, id DESC"
                ))?;
                let rows = stmt
                    .query_map([], read_job_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        rows.into_iter().map(JobRow::into_job).collect()
    }

    fn count_jobs(&self) -> Result<usize, PersistenceError> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn update_job_if_status(
        &self,
        job: &Job,
        expected: JobStatus,
    ) -> Result<bool, PersistenceError> {
        let updated = self.conn()?.execute(
            r#"
UPDATE jobs
SET status = ?1, claimed_by = ?2, photo_path = ?3, updated_at = ?4
WHERE id = ?5 AND status = ?6
"#,
            params![
                job.status.as_str(),
                job.claimed_by,
                job.photo_path,
                timestamp_tag(job.updated_at),
                job.id.0,
                expected.as_str(),
            ],
        )?;
        Ok(updated == 1)
    }

    fn register_driver(
        &self,
        spec: &NewDriver,
        at: DateTime<Utc>,
    ) -> Result<Driver, PersistenceError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO drivers (name, phone, is_active, created_at) VALUES (?1, ?2, 1, ?3)",
            params![spec.name.trim(), spec.phone.trim(), timestamp_tag(at)],
        )?;
        let row = conn.query_row(
            &format!("SELECT {DRIVER_COLUMNS} FROM drivers WHERE phone = ?1"),
            params![spec.phone.trim()],
            read_driver_row,
        )?;
        row.into_driver()
    }

    fn list_drivers(&self) -> Result<Vec<Driver>, PersistenceError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DRIVER_COLUMNS} FROM drivers ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt
            .query_map([], read_driver_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(DriverRow::into_driver).collect()
    }

    fn toggle_driver(&self, driver_id: DriverId) -> Result<Option<Driver>, PersistenceError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE drivers SET is_active = CASE is_active WHEN 0 THEN 1 ELSE 0 END WHERE id = ?1",
            params![driver_id.0],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        let row = conn.query_row(
            &format!("SELECT {DRIVER_COLUMNS} FROM drivers WHERE id = ?1"),
            params![driver_id.0],
            read_driver_row,
        )?;
        row.into_driver().map(Some)
    }

    fn active_driver_phones(&self) -> Result<Vec<String>, PersistenceError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT phone FROM drivers WHERE is_active = 1 AND phone <> '' ORDER BY id ASC",
        )?;
        let phones = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(phones)
    }
}

struct JobRow {
    id: i64,
    title: String,
    location: String,
    food_type: Option<String>,
    expires_at: Option<String>,
    contact_name: Option<String>,
    contact_phone: Option<String>,
    status: String,
    claimed_by: Option<String>,
    photo_path: Option<String>,
    created_at: String,
    updated_at: String,
}

fn read_job_row(row: &Row<'_>) -> rusqlite::Result<JobRow> {
    Ok(JobRow {
        id: row.get(0)?,
        title: row.get(1)?,
        location: row.get(2)?,
        food_type: row.get(3)?,
        expires_at: row.get(4)?,
        contact_name: row.get(5)?,
        contact_phone: row.get(6)?,
        status: row.get(7)?,
        claimed_by: row.get(8)?,
        photo_path: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

impl JobRow {
    fn into_job(self) -> Result<Job, PersistenceError> {
        let status = self
            .status
            .parse::<JobStatus>()
            .map_err(|source| PersistenceError::CorruptStatus {
                job_id: self.id,
                source,
            })?;
        Ok(Job {
            id: JobId(self.id),
            title: self.title,
            location: self.location,
            food_type: self.food_type.unwrap_or_default(),
            expires_at: self.expires_at.filter(|value| !value.is_empty()),
            contact_name: self.contact_name.unwrap_or_default(),
            contact_phone: self.contact_phone.unwrap_or_default(),
            status,
            claimed_by: self.claimed_by.filter(|value| !value.is_empty()),
            photo_path: self.photo_path.filter(|value| !value.is_empty()),
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

struct DriverRow {
    id: i64,
    name: String,
    phone: String,
    is_active: bool,
    created_at: String,
}

fn read_driver_row(row: &Row<'_>) -> rusqlite::Result<DriverRow> {
    Ok(DriverRow {
        id: row.get(0)?,
        name: row.get(1)?,
        phone: row.get(2)?,
        is_active: row.get(3)?,
        created_at: row.get(4)?,
    })
}

impl DriverRow {
    fn into_driver(self) -> Result<Driver, PersistenceError> {
        Ok(Driver {
            id: DriverId(self.id),
            name: self.name,
            phone: self.phone,
            is_active: self.is_active,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn timestamp_tag(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| PersistenceError::TimestampParse {
            value: value.to_string(),
            source,
        })
}
