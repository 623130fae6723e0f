//! Pure-Rust transaction scope using [`redb`](https://docs.rs/redb).
//!
//! No C dependencies. Each scope transaction is one redb write transaction;
//! redb allows a single writer at a time, so concurrent migrations on the
//! same database are serialized.
//!
//! Enable with `features = ["redb"]`.
//!
//! ```no_run
//! use strata_migrate::{Context, TransactionScope, Versioner};
//! use strata_store::{RedbStore, StateStore};
//!
//! let store = RedbStore::open("/tmp/app.redb").unwrap();
//! let ctx = Context::new();
//! store
//!     .transaction(&ctx, |tx| {
//!         tx.put("settings", "theme", b"dark").map_err(strata_migrate::MigrateError::transaction)?;
//!         tx.set_version(&ctx, 1).map_err(strata_migrate::MigrateError::transaction)
//!     })
//!     .unwrap();
//! ```

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition, TableError, WriteTransaction};
use strata_migrate::{Context, MigrateError, TransactionScope, Versioner};
use thiserror::Error;
use tracing::{debug, warn};

use crate::traits::{validate_table_name, StateStore, StoreError, DEFAULT_VERSION_TABLE};

// ── Table definitions ───────────────────────────────────────────────

const STATE_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("strata_state");

const VERSION_KEY: &str = "current";

fn version_table(name: &str) -> TableDefinition<'_, &'static str, i64> {
    TableDefinition::new(name)
}

// ── Error type ──────────────────────────────────────────────────────

/// Errors returned by [`RedbStore`] operations.
#[derive(Debug, Error)]
pub enum RedbError {
    /// An error from redb.
    #[error("redb error: {0}")]
    Redb(String),
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] StoreError),
}

fn err(e: impl std::fmt::Display) -> RedbError {
    RedbError::Redb(e.to_string())
}

// ── Store ───────────────────────────────────────────────────────────

/// A pure-Rust transaction scope built on [`redb`].
///
/// Keeps the version in its own table (default `schema_migrations`) and
/// exposes a namespaced key-value table to migrations through
/// [`StateStore`].
pub struct RedbStore {
    db: Database,
    table: String,
}

impl RedbStore {
    /// Open or create a redb database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RedbError> {
        Self::open_with_table(path, DEFAULT_VERSION_TABLE)
    }

    /// Open or create a database with a custom version table name.
    pub fn open_with_table<P: AsRef<Path>>(path: P, table: &str) -> Result<Self, RedbError> {
        validate_table_name(table)?;
        let db = Database::create(path).map_err(err)?;
        Ok(Self {
            db,
            table: table.to_string(),
        })
    }

    /// Create an in-memory redb database (for testing).
    pub fn open_in_memory() -> Result<Self, RedbError> {
        Self::open_in_memory_with_table(DEFAULT_VERSION_TABLE)
    }

    /// Create an in-memory database with a custom version table name.
    pub fn open_in_memory_with_table(table: &str) -> Result<Self, RedbError> {
        validate_table_name(table)?;
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(err)?;
        Ok(Self {
            db,
            table: table.to_string(),
        })
    }

    /// Name of the version table.
    pub fn version_table(&self) -> &str {
        &self.table
    }

    /// Read the persisted version outside any migration transaction.
    ///
    /// Returns `0` when the version table does not exist yet.
    pub fn current_version(&self) -> Result<i64, RedbError> {
        let txn = self.db.begin_read().map_err(err)?;
        let table = match txn.open_table(version_table(&self.table)) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(0),
            Err(e) => return Err(err(e)),
        };
        let version = table.get(VERSION_KEY).map_err(err)?;
        Ok(version.map(|guard| guard.value()).unwrap_or(0))
    }

    /// Read a committed value from the state table.
    pub fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, RedbError> {
        let txn = self.db.begin_read().map_err(err)?;
        let table = match txn.open_table(STATE_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(err(e)),
        };
        let value = table.get(state_key(namespace, key).as_slice()).map_err(err)?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }
}

impl TransactionScope for RedbStore {
    type Tx = RedbTx;

    fn transaction<R, F>(&self, ctx: &Context, handler: F) -> Result<R, MigrateError>
    where
        F: FnOnce(&mut RedbTx) -> Result<R, MigrateError>,
    {
        ctx.check()?;
        let txn = self
            .db
            .begin_write()
            .map_err(err)
            .map_err(MigrateError::transaction)?;
        debug!(table = %self.table, "redb transaction started");

        let mut tx = RedbTx {
            txn,
            table: self.table.clone(),
        };
        let result = tx
            .ensure_tables()
            .map_err(MigrateError::transaction)
            .and_then(|()| handler(&mut tx))
            .and_then(|r| ctx.check().map(|()| r));

        match result {
            Ok(r) => {
                tx.txn
                    .commit()
                    .map_err(err)
                    .map_err(MigrateError::transaction)?;
                debug!("redb transaction committed");
                Ok(r)
            }
            Err(e) => {
                match tx.txn.abort() {
                    Ok(()) => debug!("redb transaction aborted"),
                    Err(abort) => warn!(error = %abort, "redb abort failed"),
                }
                Err(e)
            }
        }
    }
}

/// Handle for one [`RedbStore`] transaction.
pub struct RedbTx {
    txn: WriteTransaction,
    table: String,
}

impl RedbTx {
    /// The underlying write transaction, for migrations that manage their own tables.
    pub fn write_transaction(&self) -> &WriteTransaction {
        &self.txn
    }

    fn ensure_tables(&self) -> Result<(), RedbError> {
        self.txn
            .open_table(version_table(&self.table))
            .map_err(err)?;
        self.txn.open_table(STATE_TABLE).map_err(err)?;
        Ok(())
    }
}

impl Versioner for RedbTx {
    type Error = RedbError;

    fn current_version(&mut self, _ctx: &Context) -> Result<i64, RedbError> {
        let table = self
            .txn
            .open_table(version_table(&self.table))
            .map_err(err)?;
        let version = table.get(VERSION_KEY).map_err(err)?;
        Ok(version.map(|guard| guard.value()).unwrap_or(0))
    }

    fn set_version(&mut self, _ctx: &Context, version: i64) -> Result<(), RedbError> {
        let mut table = self
            .txn
            .open_table(version_table(&self.table))
            .map_err(err)?;
        table.insert(VERSION_KEY, version).map_err(err)?;
        Ok(())
    }
}

impl StateStore for RedbTx {
    type Error = RedbError;

    fn put(&mut self, namespace: &str, key: &str, value: &[u8]) -> Result<(), RedbError> {
        let mut table = self.txn.open_table(STATE_TABLE).map_err(err)?;
        table
            .insert(state_key(namespace, key).as_slice(), value)
            .map_err(err)?;
        Ok(())
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, RedbError> {
        let table = self.txn.open_table(STATE_TABLE).map_err(err)?;
        let value = table
            .get(state_key(namespace, key).as_slice())
            .map_err(err)?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), RedbError> {
        let mut table = self.txn.open_table(STATE_TABLE).map_err(err)?;
        table
            .remove(state_key(namespace, key).as_slice())
            .map_err(err)?;
        Ok(())
    }

    fn list_keys(&self, namespace: &str) -> Result<Vec<String>, RedbError> {
        let table = self.txn.open_table(STATE_TABLE).map_err(err)?;

        let prefix = state_key_prefix(namespace);
        let upper = state_key_prefix_upper(namespace);
        let range = table
            .range(prefix.as_slice()..upper.as_slice())
            .map_err(err)?;

        let mut keys = Vec::new();
        for item in range {
            let (key_guard, _) = item.map_err(err)?;
            if let Some((_, k)) = parse_state_key(key_guard.value()) {
                keys.push(k.to_string());
            }
        }
        Ok(keys)
    }
}

// ── Key encoding ────────────────────────────────────────────────────

/// State key: `namespace \0 key`
fn state_key(namespace: &str, key: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(namespace.len() + 1 + key.len());
    k.extend_from_slice(namespace.as_bytes());
    k.push(0);
    k.extend_from_slice(key.as_bytes());
    k
}

/// Lower bound for all state keys in a namespace.
fn state_key_prefix(namespace: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(namespace.len() + 1);
    k.extend_from_slice(namespace.as_bytes());
    k.push(0);
    k
}

/// Upper bound (exclusive) for all state keys in a namespace.
fn state_key_prefix_upper(namespace: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(namespace.len() + 1);
    k.extend_from_slice(namespace.as_bytes());
    k.push(1);
    k
}

fn parse_state_key(key: &[u8]) -> Option<(&str, &str)> {
    let pos = key.iter().position(|&b| b == 0)?;
    let ns = std::str::from_utf8(&key[..pos]).ok()?;
    let k = std::str::from_utf8(&key[pos + 1..]).ok()?;
    Some((ns, k))
}
