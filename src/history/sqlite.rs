use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use miette::{Context, IntoDiagnostic, Result};
use rusqlite::{
    params,
    types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef},
    Connection, OptionalExtension, Row, ToSql,
};
use tracing::debug;

use super::{HistoryDb, HistoryEntry, HistoryRecord, Outcome, Statistics};
use crate::utils::MutexUtils;

const COLUMNS: &str = "id, url, video_id, title, uploader, format, duration, \
                       outcome, file_path, size, error, finished_at";

#[derive(Debug)]
pub struct Sqlite {
    conn: Mutex<Connection>,
}

impl Sqlite {
    /// Read the history file at the given path or create it if it does not exist
    pub fn read_or_create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .into_diagnostic()
                .wrap_err_with(|| format!("Could not create directory {parent:?}"))?;
        }

        let conn = Connection::open(path)
            .into_diagnostic()
            .wrap_err("Could not open sqlite file")?;
        Self::with_connection(conn)
    }

    /// History that lives as long as the value
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .into_diagnostic()
            .wrap_err("Could not open in-memory sqlite database")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let history = Self {
            conn: Mutex::new(conn),
        };
        history.create_tables().wrap_err("Could not create tables")?;
        Ok(history)
    }

    /// Create the tables if they do not already exist
    fn create_tables(&self) -> Result<()> {
        self.conn
            .with_lock(|conn| {
                conn.execute_batch(
                    "BEGIN;
                    CREATE TABLE IF NOT EXISTS downloads (
                        id          INTEGER PRIMARY KEY,
                        url         TEXT NOT NULL,
                        video_id    TEXT NOT NULL,
                        title       TEXT NOT NULL,
                        uploader    TEXT NOT NULL,
                        format      TEXT NOT NULL,
                        duration    INTEGER,
                        outcome     TEXT NOT NULL,
                        file_path   TEXT,
                        size        INTEGER,
                        error       TEXT,
                        finished_at INTEGER NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS downloads_url ON downloads (url);
                    CREATE INDEX IF NOT EXISTS downloads_finished_at ON downloads (finished_at);
                    COMMIT;",
                )
            })
            .into_diagnostic()
    }
}

impl HistoryDb for Sqlite {
    fn record(&self, entry: &HistoryEntry) -> Result<i64> {
        let id = self
            .conn
            .with_lock(|conn| {
                conn.execute(
                    "INSERT INTO downloads (url, video_id, title, uploader, format, duration,
                        outcome, file_path, size, error, finished_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        entry.url,
                        entry.video_id,
                        entry.title,
                        entry.uploader,
                        entry.format,
                        entry.duration,
                        entry.outcome,
                        entry
                            .file_path
                            .as_ref()
                            .map(|p| p.to_string_lossy().into_owned()),
                        entry.size,
                        entry.error,
                        entry.finished_at,
                    ],
                )?;
                Ok::<_, rusqlite::Error>(conn.last_insert_rowid())
            })
            .into_diagnostic()
            .wrap_err("Could not insert the download row")?;

        debug!("Recorded {} of {} as entry {id}", entry.outcome, entry.url);
        Ok(id)
    }

    fn latest_for_url(&self, url: &str) -> Result<Option<HistoryRecord>> {
        self.conn
            .with_lock(|conn| {
                conn.query_row(
                    &format!(
                        "SELECT {COLUMNS} FROM downloads
                        WHERE url = ?
                        ORDER BY finished_at DESC, id DESC
                        LIMIT 1"
                    ),
                    [url],
                    row_to_record,
                )
                .optional()
            })
            .into_diagnostic()
            .wrap_err("Could not query the downloads of the URL")
    }

    fn recent(&self, limit: usize, outcome: Option<Outcome>) -> Result<Vec<HistoryRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        self.conn
            .with_lock(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM downloads
                    WHERE ?1 IS NULL OR outcome = ?1
                    ORDER BY finished_at DESC, id DESC
                    LIMIT ?2"
                ))?;
                let records = stmt
                    .query_map(params![outcome, limit], row_to_record)?
                    .collect::<rusqlite::Result<Vec<_>>>();
                records
            })
            .into_diagnostic()
            .wrap_err("Could not query the recent downloads")
    }

    fn delete_before(&self, timestamp: i64) -> Result<usize> {
        let removed = self
            .conn
            .with_lock(|conn| {
                conn.execute("DELETE FROM downloads WHERE finished_at < ?", [timestamp])
            })
            .into_diagnostic()
            .wrap_err("Could not delete the old downloads")?;

        debug!("Removed {removed} history entries");
        Ok(removed)
    }

    fn clear(&self) -> Result<usize> {
        let removed = self
            .conn
            .with_lock(|conn| conn.execute("DELETE FROM downloads", []))
            .into_diagnostic()
            .wrap_err("Could not delete the downloads")?;

        debug!("Removed {removed} history entries");
        Ok(removed)
    }

    fn statistics(&self) -> Result<Statistics> {
        self.conn
            .with_lock(|conn| {
                conn.query_row(
                    "SELECT
                        COUNT(*),
                        COALESCE(SUM(outcome = 'completed'), 0),
                        COALESCE(SUM(outcome = 'failed'), 0),
                        COALESCE(SUM(outcome = 'cancelled'), 0),
                        COALESCE(SUM(CASE WHEN outcome = 'completed' THEN size END), 0)
                    FROM downloads",
                    [],
                    |row| {
                        Ok(Statistics {
                            total: row.get(0)?,
                            completed: row.get(1)?,
                            failed: row.get(2)?,
                            cancelled: row.get(3)?,
                            total_size: row.get(4)?,
                        })
                    },
                )
            })
            .into_diagnostic()
            .wrap_err("Could not compute the history statistics")
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<HistoryRecord> {
    Ok(HistoryRecord {
        id: row.get("id")?,
        entry: HistoryEntry {
            url: row.get("url")?,
            video_id: row.get("video_id")?,
            title: row.get("title")?,
            uploader: row.get("uploader")?,
            format: row.get("format")?,
            duration: row.get("duration")?,
            outcome: row.get("outcome")?,
            file_path: row.get::<_, Option<String>>("file_path")?.map(PathBuf::from),
            size: row.get("size")?,
            error: row.get("error")?,
            finished_at: row.get("finished_at")?,
        },
    })
}

impl FromSql for Outcome {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_str()?.parse().map_err(|_| FromSqlError::InvalidType)
    }
}

impl ToSql for Outcome {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}
