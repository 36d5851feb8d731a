//! Database access layer with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `records` - Financial record CRUD, soft deletion, candidate queries
//! - `payloads` - Raw inbound payload storage and lifecycle persistence

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use crate::error::Result;

mod payloads;
pub(crate) mod records;

pub use payloads::PayloadInsert;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Parse a SQLite datetime string into a DateTime<Utc>
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    // SQLite stores as "YYYY-MM-DD HH:MM:SS" format
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

/// Format a DateTime<Utc> the way SQLite's CURRENT_TIMESTAMP does
pub(crate) fn fmt_datetime(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    /// Path to the database file
    db_path: String,
}

impl Database {
    /// Create a new database connection pool and run migrations
    pub fn new(path: &str) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder().max_size(10).build(manager)?;

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create a throwaway database (for testing)
    ///
    /// Uses a temporary file rather than `:memory:` because each pooled
    /// connection would otherwise open its own private in-memory database.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = format!(
            "{}/tally_test_{}_{}.db",
            std::env::temp_dir().display(),
            std::process::id(),
            id
        );

        // Remove any existing file
        let _ = std::fs::remove_file(&path);

        Self::new(&path)
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Enable foreign keys
            PRAGMA foreign_keys = ON;

            -- WAL mode: better concurrency, readers don't block writers
            PRAGMA journal_mode = WAL;

            -- Synchronous NORMAL: good balance of safety and performance
            PRAGMA synchronous = NORMAL;

            -- Store temp tables in memory (faster for complex queries)
            PRAGMA temp_store = MEMORY;

            -- Financial records (the ledger)
            CREATE TABLE IF NOT EXISTS financial_records (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                account_id INTEGER NOT NULL,
                amount TEXT NOT NULL,                      -- fixed-point decimal, non-negative
                currency TEXT NOT NULL DEFAULT 'USD',
                direction TEXT NOT NULL DEFAULT 'debit',   -- debit, credit
                date DATE NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                category TEXT,
                external_id TEXT,                          -- id assigned by an upstream feed
                source TEXT NOT NULL DEFAULT 'manual',     -- email, sms, manual, statement
                metadata TEXT,                             -- JSON (merge history, suspicion, extra)
                deleted BOOLEAN NOT NULL DEFAULT 0,        -- soft delete, never physically erased
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_records_user_account_date
                ON financial_records(user_id, account_id, date);
            CREATE INDEX IF NOT EXISTS idx_records_external_id ON financial_records(external_id);
            CREATE INDEX IF NOT EXISTS idx_records_deleted ON financial_records(deleted);

            -- Child line items of a record (receipt lines, order positions)
            CREATE TABLE IF NOT EXISTS record_items (
                id INTEGER PRIMARY KEY,
                record_id INTEGER NOT NULL REFERENCES financial_records(id),
                label TEXT NOT NULL,
                amount TEXT NOT NULL,
                quantity REAL
            );

            CREATE INDEX IF NOT EXISTS idx_record_items_record ON record_items(record_id);

            -- Raw inbound payloads (the ingestion inbox; rows are never deleted)
            CREATE TABLE IF NOT EXISTS raw_payloads (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                message_id TEXT NOT NULL UNIQUE,           -- natural key, idempotent re-ingestion
                source TEXT NOT NULL,
                sender TEXT,
                subject TEXT,
                body TEXT NOT NULL DEFAULT '',
                raw_blob TEXT,                             -- opaque full payload for audit/training
                received_at DATETIME NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                last_attempt_at DATETIME,
                last_error TEXT,
                event_log TEXT NOT NULL DEFAULT '[]',      -- JSON, append-only
                ingest_log TEXT NOT NULL DEFAULT '[]',     -- JSON, append-only
                linked_record_ids TEXT NOT NULL DEFAULT '[]',  -- JSON, loose references
                feedback_log TEXT NOT NULL DEFAULT '[]',   -- JSON, append-only
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_payloads_user_status ON raw_payloads(user_id, status);
            "#,
        )?;

        info!("Database migrations complete");
        Ok(())
    }
}
