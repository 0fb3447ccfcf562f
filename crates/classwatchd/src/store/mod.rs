//! SQLite persistence for students, class schedules and the attendance ledger.
//!
//! One `tokio_rusqlite` connection serialises every call on its own worker
//! thread, so each closure passed to [`Store::call`] runs atomically with
//! respect to the others.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use std::path::Path;
use thiserror::Error;

mod attendance;
mod classes;
mod migrations;
mod students;

pub use attendance::{AttendanceFilter, AttendanceUpdate, SeedRecord};
pub use students::NewStudent;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Student with this roll number already exists: {0}")]
    DuplicateRollNumber(String),
    #[error("failed to create database directory {path}: {source}")]
    CreateDir {
        path: String,
        source: std::io::Error,
    },
    #[error("database: {0}")]
    Database(#[from] tokio_rusqlite::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Clone-safe handle to the database.
#[derive(Clone)]
pub struct Store {
    conn: tokio_rusqlite::Connection,
}

impl Store {
    /// Open (creating if needed) the database file and bring its schema up to date.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                    path: parent.display().to_string(),
                    source,
                })?;
            }
        }

        let conn = tokio_rusqlite::Connection::open(path).await?;
        let store = Self::init(conn).await?;
        tracing::info!(path = %path.display(), "database opened");
        Ok(store)
    }

    /// Private in-memory database, used by tests.
    #[cfg(test)]
    pub async fn open_in_memory() -> StoreResult<Self> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: tokio_rusqlite::Connection) -> StoreResult<Self> {
        conn.call(|conn| {
            if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                tracing::warn!(error = %err, "failed to enable WAL mode");
            }
            conn.pragma_update(None, "foreign_keys", "ON")?;
            migrations::run_migrations(conn)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    /// Run a closure against the connection on the database thread.
    async fn call<F, T>(&self, task: F) -> StoreResult<T>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<T, tokio_rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        Ok(self.conn.call(task).await?)
    }
}

fn conversion_failure<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

/// Read a TEXT column by name and parse it.
fn parse_column<T, E>(
    row: &Row<'_>,
    column: &str,
    parse: impl FnOnce(&str) -> Result<T, E>,
) -> rusqlite::Result<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let idx = row.as_ref().column_index(column)?;
    let raw: String = row.get(idx)?;
    parse(&raw).map_err(|e| conversion_failure(idx, e))
}

fn parse_optional_column<T, E>(
    row: &Row<'_>,
    column: &str,
    parse: impl FnOnce(&str) -> Result<T, E>,
) -> rusqlite::Result<Option<T>>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let idx = row.as_ref().column_index(column)?;
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| parse(&raw).map_err(|e| conversion_failure(idx, e)))
        .transpose()
}

/// Read a non-negative INTEGER column as `u32`.
fn u32_column(row: &Row<'_>, column: &str) -> rusqlite::Result<u32> {
    let idx = row.as_ref().column_index(column)?;
    let value: i64 = row.get(idx)?;
    u32::try_from(value).map_err(|e| conversion_failure(idx, e))
}

fn parse_datetime(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

fn parse_day(raw: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
}

fn format_day(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

fn is_unique_violation(err: &tokio_rusqlite::Error) -> bool {
    matches!(
        err,
        tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn to_json_error(err: serde_json::Error) -> tokio_rusqlite::Error {
    tokio_rusqlite::Error::Other(Box::new(err))
}
