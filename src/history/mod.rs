//! Persistent record of the downloads that reached an outcome.

mod sqlite;

use std::{fmt::Display, path::PathBuf, str::FromStr};

use miette::{miette, Result};

pub use sqlite::Sqlite;

/// How a recorded download ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
    Cancelled,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Failed => "failed",
            Outcome::Cancelled => "cancelled",
        }
    }
}

impl Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = miette::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "completed" => Ok(Outcome::Completed),
            "failed" => Ok(Outcome::Failed),
            "cancelled" => Ok(Outcome::Cancelled),
            _ => Err(miette!("Unknown download outcome {s:?}")),
        }
    }
}

/// A download as it ended
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub url: String,
    pub video_id: String,
    pub title: String,
    pub uploader: String,
    /// The format specifier given to the tool, e.g. `137+140`
    pub format: String,
    /// In seconds
    pub duration: Option<u64>,
    pub outcome: Outcome,
    /// The final file, for completed downloads
    pub file_path: Option<PathBuf>,
    /// In bytes
    pub size: Option<u64>,
    /// Why the download failed
    pub error: Option<String>,
    /// Unix timestamp, in seconds
    pub finished_at: i64,
}

/// An entry along with its identifier in the history
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub id: i64,
    pub entry: HistoryEntry,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Statistics {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Sum of the sizes of the completed downloads, in bytes
    pub total_size: u64,
}

/// Storage of the download history.
///
/// Implementations are shared between threads: every method takes `&self`.
pub trait HistoryDb: Send + Sync {
    /// Add an entry, returning its identifier
    fn record(&self, entry: &HistoryEntry) -> Result<i64>;

    /// The most recent entry for the URL, if any
    fn latest_for_url(&self, url: &str) -> Result<Option<HistoryRecord>>;

    /// The most recent entries first, optionally only those with the given outcome
    fn recent(&self, limit: usize, outcome: Option<Outcome>) -> Result<Vec<HistoryRecord>>;

    /// Remove the entries that finished before the timestamp.
    /// Return the number of removed entries.
    fn delete_before(&self, timestamp: i64) -> Result<usize>;

    /// Remove every entry. Return the number of removed entries.
    fn clear(&self) -> Result<usize>;

    fn statistics(&self) -> Result<Statistics>;
}
