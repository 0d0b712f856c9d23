//! Task records and the storage trait shared by both backends.

use chrono::{NaiveDate, NaiveDateTime};
use std::fmt;

/// Format used for parsing owner input and for the `time` column.
pub const DUE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// A validated task that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDraft {
    pub due_at: NaiveDateTime,
    pub text: String,
}

/// A stored reminder.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: i64,
    pub due_at: NaiveDateTime,
    pub text: String,
    /// Set once the reminder has been sent.
    pub fired: bool,
}

impl Task {
    pub fn due_string(&self) -> String {
        self.due_at.format(DUE_FORMAT).to_string()
    }
}

#[derive(Debug)]
pub enum StorageError {
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
    /// A stored `time` value that no longer parses.
    Corrupt { id: i64, value: String },
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(e) => write!(f, "sqlite error: {e}"),
            Self::Io(e) => write!(f, "storage I/O error: {e}"),
            Self::Corrupt { id, value } => {
                write!(f, "task #{id} has an unreadable due time '{value}'")
            }
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Sqlite(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Corrupt { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Sqlite(e)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// CRUD over task records.
///
/// Listings are ordered by due time, then id. There is no update operation:
/// a task's due time and text never change after `create`.
pub trait TaskStore: Send + Sync {
    fn create(&self, draft: &TaskDraft) -> Result<Task, StorageError>;

    fn list_all(&self) -> Result<Vec<Task>, StorageError>;

    /// Deleting an unknown id is a no-op.
    fn delete(&self, id: i64) -> Result<(), StorageError>;

    fn mark_fired(&self, id: i64) -> Result<(), StorageError>;

    /// Tasks due on the given calendar day.
    fn list_for_date(&self, date: NaiveDate) -> Result<Vec<Task>, StorageError> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|t| t.due_at.date() == date)
            .collect())
    }

    /// Tasks whose reminder has not been sent yet.
    fn list_pending(&self) -> Result<Vec<Task>, StorageError> {
        Ok(self.list_all()?.into_iter().filter(|t| !t.fired).collect())
    }
}
