//! # strata-store
//!
//! Transaction scopes for [`strata-migrate`](https://docs.rs/strata-migrate).
//!
//! Each backend implements `TransactionScope`: it opens a transaction,
//! makes sure the version record exists, hands a `Versioner` handle to the
//! migrator and commits or rolls back. [`ScriptMigration`] turns a directory
//! of `.up.sql` / `.down.sql` files into migrations for any handle that can
//! execute scripts.
//!
//! ## Quick Start
//!
//! ```
//! use strata_migrate::{Context, Migrator, Target};
//! use strata_store::{MemoryStore, ScriptMigration};
//!
//! let store = MemoryStore::new();
//! let migrations = vec![
//!     ScriptMigration::new(1, "CREATE TABLE users (id INTEGER)", "DROP TABLE users").unwrap(),
//!     ScriptMigration::new(2, "ALTER TABLE users ADD email TEXT", "").unwrap(),
//! ];
//! let migrator = Migrator::new(&store, migrations.into_iter().map(|m| m.boxed())).unwrap();
//!
//! migrator.up(&Context::new(), Target::Latest).unwrap();
//! assert_eq!(store.version(), 2);
//! assert_eq!(store.scripts().len(), 2);
//! ```
//!
//! ## Backends
//!
//! | Backend | Feature flag | Use case |
//! |---------|-------------|----------|
//! | [`MemoryStore`] | *(always available)* | Testing, prototyping |
//! | `SqliteStore` | `sqlite` | SQL schemas on edge, mobile, desktop |
//! | `RedbStore` | `redb` | Pure-Rust key-value data without C deps |

mod memory;
#[cfg(feature = "redb")]
mod redb;
mod script;
#[cfg(feature = "sqlite")]
mod sqlite;
mod traits;

pub use memory::{MemoryStore, MemoryTx};
#[cfg(feature = "redb")]
pub use redb::{RedbError, RedbStore, RedbTx};
pub use script::{ScriptError, ScriptMigration};
#[cfg(feature = "sqlite")]
pub use sqlite::{JournalMode, SqliteConfig, SqliteError, SqliteStore, SqliteTx};
pub use traits::*;
