//! Persistent SQLite task store.

use chrono::{Local, NaiveDate, NaiveDateTime};
use rusqlite::{Connection, Row, params};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use super::store::{StorageError, Task, TaskDraft, TaskStore, DUE_FORMAT};

/// SQLite-backed task store.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Create a new in-memory database.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn: Mutex::new(conn) };
        db.init_schema(Local::now().naive_local())?;
        Ok(db)
    }

    /// Open (or create) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        Self::open_at(path, Local::now().naive_local())
    }

    /// Like [`Database::open`], with `now` deciding which legacy rows count
    /// as already delivered.
    pub fn open_at(path: &Path, now: NaiveDateTime) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let db = Self { conn: Mutex::new(conn) };
        db.init_schema(now)?;

        info!("Loaded task database from {:?} ({} tasks)", path, db.count()?);
        Ok(db)
    }

    fn init_schema(&self, now: NaiveDateTime) -> Result<(), StorageError> {
        let conn = self.conn.lock().expect("task database lock poisoned");

        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                time TEXT NOT NULL,
                text TEXT NOT NULL,
                fired INTEGER NOT NULL DEFAULT 0
            );
        "#)?;

        // Tables created by older versions lack the fired flag. Their past
        // rows were already delivered by the old bot, so only future ones
        // stay pending.
        let has_fired: bool = conn.query_row(
            "SELECT COUNT(*) FROM pragma_table_info('tasks') WHERE name = 'fired'",
            [],
            |row| row.get::<_, i64>(0),
        )? > 0;
        if !has_fired {
            info!("Adding fired column to legacy tasks table");
            conn.execute_batch("ALTER TABLE tasks ADD COLUMN fired INTEGER NOT NULL DEFAULT 0;")?;
            let cutoff = now.format(DUE_FORMAT).to_string();
            let past = conn.execute("UPDATE tasks SET fired = 1 WHERE time <= ?1", params![cutoff])?;
            info!("Marked {} legacy task(s) due by {} as fired", past, cutoff);
        }

        conn.execute_batch("CREATE INDEX IF NOT EXISTS idx_tasks_time ON tasks(time);")?;
        Ok(())
    }

    fn count(&self) -> Result<usize, StorageError> {
        let conn = self.conn.lock().expect("task database lock poisoned");
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    fn query_tasks(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Task>, StorageError> {
        let conn = self.conn.lock().expect("task database lock poisoned");
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(args, read_row)?;

        let mut tasks = Vec::new();
        for row in rows {
            let (id, time, text, fired) = row?;
            let due_at = NaiveDateTime::parse_from_str(&time, DUE_FORMAT)
                .map_err(|_| StorageError::Corrupt { id, value: time.clone() })?;
            tasks.push(Task { id, due_at, text, fired });
        }
        Ok(tasks)
    }
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<(i64, String, String, bool)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get::<_, i64>(3)? != 0))
}

impl TaskStore for Database {
    fn create(&self, draft: &TaskDraft) -> Result<Task, StorageError> {
        let conn = self.conn.lock().expect("task database lock poisoned");
        let time = draft.due_at.format(DUE_FORMAT).to_string();
        conn.execute(
            "INSERT INTO tasks (time, text, fired) VALUES (?1, ?2, 0)",
            params![time, draft.text],
        )?;
        let id = conn.last_insert_rowid();
        debug!("Stored task #{} at {}", id, time);

        Ok(Task {
            id,
            // Stored at minute precision, so report what a reload would return
            due_at: NaiveDateTime::parse_from_str(&time, DUE_FORMAT)
                .map_err(|_| StorageError::Corrupt { id, value: time.clone() })?,
            text: draft.text.clone(),
            fired: false,
        })
    }

    fn list_all(&self) -> Result<Vec<Task>, StorageError> {
        self.query_tasks("SELECT id, time, text, fired FROM tasks ORDER BY time ASC, id ASC", &[])
    }

    fn list_for_date(&self, date: NaiveDate) -> Result<Vec<Task>, StorageError> {
        let day = date.format("%Y-%m-%d").to_string();
        self.query_tasks(
            "SELECT id, time, text, fired FROM tasks WHERE substr(time, 1, 10) = ?1 ORDER BY time ASC, id ASC",
            &[&day as &dyn rusqlite::ToSql],
        )
    }

    fn list_pending(&self) -> Result<Vec<Task>, StorageError> {
        self.query_tasks(
            "SELECT id, time, text, fired FROM tasks WHERE fired = 0 ORDER BY time ASC, id ASC",
            &[],
        )
    }

    fn delete(&self, id: i64) -> Result<(), StorageError> {
        let conn = self.conn.lock().expect("task database lock poisoned");
        let n = conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
        debug!("Delete task #{}: {} row(s)", id, n);
        Ok(())
    }

    fn mark_fired(&self, id: i64) -> Result<(), StorageError> {
        let conn = self.conn.lock().expect("task database lock poisoned");
        conn.execute("UPDATE tasks SET fired = 1 WHERE id = ?1", params![id])?;
        Ok(())
    }
}
