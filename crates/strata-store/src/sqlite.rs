//! SQLite transaction scope using rusqlite.
//!
//! Every scope transaction is a `BEGIN IMMEDIATE` transaction, so two
//! processes migrating the same file are serialized by SQLite's write lock.
//! The version table is created on first use inside that transaction.
//!
//! # Example
//!
//! ```no_run
//! use strata_migrate::{Context, Migrator, Target};
//! use strata_store::{ScriptMigration, SqliteStore};
//!
//! let store = SqliteStore::open("app.db").unwrap();
//! let migrations = ScriptMigration::load_dir("migrations").unwrap();
//! let migrator = Migrator::new(&store, migrations.into_iter().map(|m| m.boxed())).unwrap();
//!
//! migrator.up(&Context::new(), Target::Latest).unwrap();
//! ```

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, InterruptHandle, OpenFlags, OptionalExtension};
use strata_migrate::{Context, MigrateError, TransactionScope, Versioner};
use thiserror::Error;
use tracing::{debug, warn};

use crate::traits::{validate_table_name, ScriptExecutor, StoreError, DEFAULT_VERSION_TABLE};

/// SQLite configuration options.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// SQLite journal mode. Defaults to WAL; `None` keeps whatever mode the
    /// file already uses.
    pub journal_mode: Option<JournalMode>,
    /// Busy timeout in milliseconds. Defaults to 5000.
    pub busy_timeout_ms: u32,
    /// SQLite page size. Defaults to 4096.
    pub page_size: u32,
    /// Table holding the version row. Defaults to `schema_migrations`.
    pub version_table: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            journal_mode: Some(JournalMode::Wal),
            busy_timeout_ms: 5000,
            page_size: 4096,
            version_table: DEFAULT_VERSION_TABLE.to_string(),
        }
    }
}

impl SqliteConfig {
    /// Use `name` as the version table.
    pub fn version_table(mut self, name: impl Into<String>) -> Self {
        self.version_table = name.into();
        self
    }

    /// Set the journal mode.
    pub fn journal_mode(mut self, mode: JournalMode) -> Self {
        self.journal_mode = Some(mode);
        self
    }

    /// Leave the database's journal mode as it is.
    pub fn keep_journal_mode(mut self) -> Self {
        self.journal_mode = None;
        self
    }

    /// Set the busy timeout in milliseconds.
    pub fn busy_timeout_ms(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }
}

/// SQLite journal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    /// Write-Ahead Logging, allows concurrent reads during writes.
    Wal,
    /// Traditional rollback journal.
    Delete,
    /// In-memory journal (fastest, no crash recovery).
    Memory,
}

impl JournalMode {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Wal => "WAL",
            Self::Delete => "DELETE",
            Self::Memory => "MEMORY",
        }
    }
}

/// Error type for the SQLite backend.
#[derive(Debug, Error)]
pub enum SqliteError {
    /// An error from rusqlite.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] StoreError),
    /// Lock poisoned.
    #[error("sqlite lock poisoned")]
    LockPoisoned,
    /// A previous transaction handler panicked and took the connection with it.
    #[error("sqlite connection lost")]
    ConnectionLost,
}

/// SQLite transaction scope.
///
/// Holds one connection. A transaction takes it exclusively for the whole
/// handler and hands it back afterwards, so concurrent callers on the same
/// store queue up on the internal lock.
pub struct SqliteStore {
    conn: Mutex<Option<Connection>>,
    table: String,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at the given path with default config.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SqliteError> {
        Self::open_with_config(path, SqliteConfig::default())
    }

    /// Open with custom configuration.
    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        config: SqliteConfig,
    ) -> Result<Self, SqliteError> {
        validate_table_name(&config.version_table)?;
        let conn = Connection::open(path)?;
        Self::init_connection(&conn, &config)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            table: config.version_table,
        })
    }

    /// Open a database that must already exist.
    ///
    /// Fails instead of creating an empty file when `path` is missing.
    pub fn open_existing<P: AsRef<Path>>(
        path: P,
        config: SqliteConfig,
    ) -> Result<Self, SqliteError> {
        validate_table_name(&config.version_table)?;
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        Self::init_connection(&conn, &config)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            table: config.version_table,
        })
    }

    /// Open an in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, SqliteError> {
        Self::open_in_memory_with_config(SqliteConfig::default())
    }

    /// Open an in-memory database with custom configuration.
    pub fn open_in_memory_with_config(config: SqliteConfig) -> Result<Self, SqliteError> {
        validate_table_name(&config.version_table)?;
        let conn = Connection::open_in_memory()?;
        Self::init_connection(&conn, &config)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            table: config.version_table,
        })
    }

    fn init_connection(conn: &Connection, config: &SqliteConfig) -> Result<(), SqliteError> {
        if let Some(mode) = config.journal_mode {
            conn.execute_batch(&format!("PRAGMA journal_mode = {};", mode.as_str()))?;
        }
        conn.execute_batch(&format!(
            "PRAGMA busy_timeout = {};
             PRAGMA page_size = {};
             PRAGMA foreign_keys = ON;
             PRAGMA synchronous = NORMAL;",
            config.busy_timeout_ms, config.page_size,
        ))?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>, SqliteError> {
        self.conn.lock().map_err(|_| SqliteError::LockPoisoned)
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, SqliteError>,
    ) -> Result<T, SqliteError> {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(SqliteError::ConnectionLost)?;
        f(conn)
    }

    /// Name of the version table.
    pub fn version_table(&self) -> &str {
        &self.table
    }

    /// Read the persisted version outside any migration transaction.
    ///
    /// Returns `0` when the version table does not exist yet.
    pub fn current_version(&self) -> Result<i64, SqliteError> {
        self.with_conn(|conn| {
            let exists: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![self.table],
                |row| row.get(0),
            )?;
            if exists == 0 {
                return Ok(0);
            }
            read_version(conn, &self.table)
        })
    }

    /// Get the database file size in bytes.
    pub fn file_size(&self) -> Result<u64, SqliteError> {
        self.with_conn(|conn| {
            let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
            let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
            Ok((page_count * page_size) as u64)
        })
    }

    /// A handle that aborts the statement running on this store's connection.
    ///
    /// Safe to use from another thread while a migration holds the
    /// connection; the interrupted statement fails and its step rolls back.
    pub fn interrupt_handle(&self) -> Result<InterruptHandle, SqliteError> {
        self.with_conn(|conn| Ok(conn.get_interrupt_handle()))
    }

    /// Get the current journal mode.
    pub fn journal_mode(&self) -> Result<String, SqliteError> {
        self.with_conn(|conn| {
            let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
            Ok(mode)
        })
    }
}

impl TransactionScope for SqliteStore {
    type Tx = SqliteTx;

    fn transaction<R, F>(&self, ctx: &Context, handler: F) -> Result<R, MigrateError>
    where
        F: FnOnce(&mut SqliteTx) -> Result<R, MigrateError>,
    {
        ctx.check()?;
        let mut slot = self.lock().map_err(MigrateError::transaction)?;
        let conn = slot
            .take()
            .ok_or(SqliteError::ConnectionLost)
            .map_err(MigrateError::transaction)?;

        if let Err(e) = conn.execute_batch("BEGIN IMMEDIATE") {
            *slot = Some(conn);
            return Err(MigrateError::transaction(SqliteError::from(e)));
        }
        debug!(table = %self.table, "sqlite transaction started");

        let mut tx = SqliteTx {
            conn,
            table: self.table.clone(),
        };
        let result = tx
            .ensure_version_table()
            .map_err(MigrateError::transaction)
            .and_then(|()| handler(&mut tx))
            .and_then(|r| ctx.check().map(|()| r));

        let result = match result {
            Ok(r) => match tx.conn.execute_batch("COMMIT") {
                Ok(()) => {
                    debug!("sqlite transaction committed");
                    Ok(r)
                }
                Err(e) => {
                    tx.rollback();
                    Err(MigrateError::transaction(SqliteError::from(e)))
                }
            },
            Err(e) => {
                tx.rollback();
                Err(e)
            }
        };

        *slot = Some(tx.conn);
        result
    }
}

/// Handle for one [`SqliteStore`] transaction.
///
/// Migrations run their statements through [`connection`](Self::connection)
/// or [`ScriptExecutor::execute_script`].
pub struct SqliteTx {
    conn: Connection,
    table: String,
}

impl SqliteTx {
    /// The connection, inside the open transaction.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn ensure_version_table(&self) -> Result<(), SqliteError> {
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (version INTEGER PRIMARY KEY)",
            self.table
        ))?;
        Ok(())
    }

    fn rollback(&self) {
        // SQLite may already have rolled back on its own, e.g. after a failed COMMIT.
        if self.conn.is_autocommit() {
            return;
        }
        match self.conn.execute_batch("ROLLBACK") {
            Ok(()) => debug!("sqlite transaction rolled back"),
            Err(e) => warn!(error = %e, "sqlite rollback failed"),
        }
    }
}

impl Versioner for SqliteTx {
    type Error = SqliteError;

    fn current_version(&mut self, _ctx: &Context) -> Result<i64, SqliteError> {
        read_version(&self.conn, &self.table)
    }

    fn set_version(&mut self, _ctx: &Context, version: i64) -> Result<(), SqliteError> {
        let updated = self.conn.execute(
            &format!("UPDATE {} SET version = ?1", self.table),
            params![version],
        )?;
        if updated == 0 {
            self.conn.execute(
                &format!("INSERT INTO {} (version) VALUES (?1)", self.table),
                params![version],
            )?;
        }
        Ok(())
    }
}

impl ScriptExecutor for SqliteTx {
    type Error = SqliteError;

    fn execute_script(&mut self, script: &str) -> Result<(), SqliteError> {
        self.conn.execute_batch(script)?;
        Ok(())
    }
}

fn read_version(conn: &Connection, table: &str) -> Result<i64, SqliteError> {
    let version = conn
        .query_row(&format!("SELECT version FROM {table} LIMIT 1"), [], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(version.unwrap_or(0))
}
