//! SQLite-backed records
//!
//! Entitlement records, poster records and processed payment events live in
//! one database file. Counter changes are single `UPDATE` statements doing
//! arithmetic on the column, never read-modify-write from Rust.

mod events;
mod posters;
mod users;

pub use events::EventOutcome;
pub use posters::{PendingInsert, Settlement};

#[cfg(test)]
pub(crate) use posters::tests::make_poster;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

use crate::billing::{BillingStatus, Plan};
use crate::generation::{PosterStatus, SizePreset};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to prepare database location: {0}")]
    Io(#[from] std::io::Error),

    #[error("record changed underneath transaction: {0}")]
    Inconsistent(String),

    #[error("database task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        email TEXT,
        name TEXT,
        plan TEXT NOT NULL DEFAULT 'free',
        credits INTEGER NOT NULL DEFAULT 5 CHECK (credits >= 0),
        total_generations INTEGER NOT NULL DEFAULT 0,
        is_admin INTEGER NOT NULL DEFAULT 0,
        billing_status TEXT NOT NULL DEFAULT 'active',
        stripe_customer_id TEXT,
        stripe_subscription_id TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_users_customer
        ON users(stripe_customer_id);

    CREATE TABLE IF NOT EXISTS posters (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        request_id TEXT,
        title TEXT NOT NULL,
        event_type TEXT NOT NULL,
        description TEXT,
        prompt TEXT NOT NULL,
        image_url TEXT NOT NULL,
        storage_path TEXT,
        style TEXT NOT NULL,
        size TEXT NOT NULL,
        width INTEGER NOT NULL,
        height INTEGER NOT NULL,
        model TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        UNIQUE (user_id, request_id)
    );

    CREATE INDEX IF NOT EXISTS idx_posters_owner
        ON posters(user_id, created_at DESC);

    CREATE INDEX IF NOT EXISTS idx_posters_status
        ON posters(status, created_at);

    CREATE TABLE IF NOT EXISTS processed_events (
        event_id TEXT PRIMARY KEY,
        event_type TEXT NOT NULL,
        processed_at INTEGER NOT NULL
    );
"#;

/// Handle to the service database
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database at `path`
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        let db = Self::with_connection(conn)?;
        info!(path = %path.display(), "Opened database");
        Ok(db)
    }

    /// Private in-memory database, used by tests and dry runs
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` on the blocking pool.
    ///
    /// Every method here does SQLite I/O under a mutex; async callers go
    /// through this instead of calling them on a runtime worker.
    pub async fn call<T, F>(self: &Arc<Self>, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&db)).await?
    }

    /// Acquire the connection, recovering from a poisoned lock
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned: PoisonError<MutexGuard<'_, Connection>>| {
                warn!("Database mutex was poisoned, recovering connection");
                poisoned.into_inner()
            })
    }
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}

fn now_millis() -> i64 {
    to_millis(Utc::now())
}

/// Text-backed enum columns
macro_rules! text_column {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse::<$ty>()
                    .map_err(|e| FromSqlError::Other(e.to_string().into()))
            }
        }
    };
}

text_column!(Plan);
text_column!(BillingStatus);
text_column!(PosterStatus);
text_column!(SizePreset);
