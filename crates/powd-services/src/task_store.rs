//! Durable store for proof-of-work tasks.
//!
//! One SQLite row per initial hash. The primary key on `initial_hash` is
//! the real deduplication guarantee: of two concurrent inserts for the same
//! hash exactly one succeeds and the other reports [`StoreError::Duplicate`].
//! The nonce column is written at most once and never overwritten.
//!
//! Every operation locks the connection for its own duration only; the
//! guard is released on every exit path.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use thiserror::Error;

use crate::pow_types::ProofOfWorkRequest;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS ProofOfWorkTask (
        initial_hash BLOB    NOT NULL PRIMARY KEY,
        client       TEXT    NOT NULL,
        target       BLOB    NOT NULL,
        nonce        BLOB,
        timestamp    INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS ProofOfWorkTask_timestamp ON ProofOfWorkTask (timestamp);
";

/// A row of the task table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub initial_hash: Vec<u8>,
    pub target: Vec<u8>,
    /// Address of the client that first requested the work.
    pub client: String,
    /// `None` while the engine is still working on it.
    pub nonce: Option<Vec<u8>>,
    /// Unix seconds when the task was stored.
    pub created_at: u64,
}

impl Task {
    pub fn is_complete(&self) -> bool {
        self.nonce.is_some()
    }
}

/// Row counts, for the periodic stats line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub incomplete: usize,
    pub complete: usize,
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// A task for this initial hash already exists.
    #[error("task already exists")]
    Duplicate,
    #[error("task store: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to create store directory {0}: {1}")]
    Directory(PathBuf, std::io::Error),
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// SQLite-backed task store. Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct TaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl TaskStore {
    /// Open (creating if needed) the store at `path`.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Directory(parent.to_path_buf(), e))?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::init(conn)
    }

    /// Private in-memory store, for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-statement leaves SQLite consistent; keep serving.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn has_task(&self, initial_hash: &[u8]) -> Result<bool, StoreError> {
        let count: i64 = self.conn().query_row(
            "SELECT count(1) FROM ProofOfWorkTask WHERE initial_hash = ?1",
            params![initial_hash],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Store a new task for `request`, stamped with the current time.
    pub fn store_task(&self, request: &ProofOfWorkRequest) -> Result<(), StoreError> {
        self.insert_task(&Task {
            initial_hash: request.initial_hash.clone(),
            target: request.data.clone(),
            client: request.sender_address(),
            nonce: None,
            created_at: now_secs(),
        })
    }

    /// Insert a task row as given. Fails with `Duplicate` if the hash exists.
    pub fn insert_task(&self, task: &Task) -> Result<(), StoreError> {
        let result = self.conn().execute(
            "INSERT INTO ProofOfWorkTask (initial_hash, client, target, nonce, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                task.initial_hash,
                task.client,
                task.target,
                task.nonce,
                task.created_at as i64,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Duplicate)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Record the nonce for a task.
    ///
    /// Returns `true` if the nonce was written. `false` means the row is
    /// gone (cleaned up while the engine was busy), already has a nonce, or
    /// `nonce` is empty; all leave the store unchanged.
    pub fn update_task(&self, initial_hash: &[u8], nonce: &[u8]) -> Result<bool, StoreError> {
        // An empty nonce would mark the task done without an answer.
        if nonce.is_empty() {
            return Ok(false);
        }
        let changed = self.conn().execute(
            "UPDATE ProofOfWorkTask SET nonce = ?1 WHERE initial_hash = ?2 AND nonce IS NULL",
            params![nonce, initial_hash],
        )?;
        Ok(changed > 0)
    }

    /// Current nonce of a task; `None` if incomplete or absent.
    pub fn get_nonce(&self, initial_hash: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let nonce: Option<Option<Vec<u8>>> = self
            .conn()
            .query_row(
                "SELECT nonce FROM ProofOfWorkTask WHERE initial_hash = ?1",
                params![initial_hash],
                |row| row.get(0),
            )
            .optional()?;
        Ok(nonce.flatten())
    }

    pub fn get_task(&self, initial_hash: &[u8]) -> Result<Option<Task>, StoreError> {
        let task = self
            .conn()
            .query_row(
                "SELECT initial_hash, target, client, nonce, timestamp
                 FROM ProofOfWorkTask WHERE initial_hash = ?1",
                params![initial_hash],
                row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    /// All tasks still waiting for a nonce, oldest first.
    pub fn get_incomplete_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT initial_hash, target, client, nonce, timestamp
             FROM ProofOfWorkTask WHERE nonce IS NULL ORDER BY timestamp",
        )?;
        let tasks = stmt
            .query_map([], row_to_task)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    /// Delete every task older than `max_age_secs`, complete or not.
    /// Returns the number of rows removed.
    pub fn cleanup_tasks(&self, max_age_secs: u64) -> Result<usize, StoreError> {
        let cutoff = now_secs().saturating_sub(max_age_secs);
        let removed = self.conn().execute(
            "DELETE FROM ProofOfWorkTask WHERE timestamp < ?1",
            params![cutoff as i64],
        )?;
        Ok(removed)
    }

    pub fn counts(&self) -> Result<TaskCounts, StoreError> {
        let (incomplete, complete): (i64, i64) = self.conn().query_row(
            "SELECT count(1) - count(nonce), count(nonce) FROM ProofOfWorkTask",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(TaskCounts {
            incomplete: incomplete as usize,
            complete: complete as usize,
        })
    }
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    let created_at: i64 = row.get(4)?;
    Ok(Task {
        initial_hash: row.get(0)?,
        target: row.get(1)?,
        client: row.get(2)?,
        nonce: row.get(3)?,
        created_at: created_at.max(0) as u64,
    })
}
