//! # strata-migrate
//!
//! Versioned, transactional migrations driven by one persisted number.
//!
//! A store records the version of the last applied migration. A
//! [`Migrator`] holds an ordered set of [`Migration`]s and moves that
//! number toward a [`Target`], one migration per transaction, until the
//! persisted version equals the target.
//!
//! ## How It Works
//!
//! 1. Migrations carry a caller-assigned `i64` version. Gaps are fine.
//! 2. The migrator sorts them and rejects duplicate versions up front.
//! 3. [`Migrator::up`] / [`Migrator::down`] open a transaction through a
//!    [`TransactionScope`], read the version through its [`Versioner`]
//!    handle, run one forward or reverse action, write the new version and
//!    commit. Then they loop.
//! 4. A failure rolls back only the current step. Everything before it is
//!    committed, so running again resumes where the last run stopped.
//!
//! ## Key Concepts
//!
//! - **Storage-agnostic**: the migrator never touches storage itself. See
//!   `strata-store` for in-memory, SQLite and redb scopes.
//! - **Targets**: [`Target::Latest`] and [`Target::Oldest`] resolve to the
//!   highest and lowest registered versions; any other target is a concrete
//!   version that must be registered or already persisted.
//! - **Cancellation**: every operation takes a [`Context`] that is checked
//!   before each transaction and each action.

mod context;
mod engine;
mod error;
mod target;
mod traits;

pub use context::Context;
pub use engine::{BoxedMigration, MigrationOutcome, Migrator, MigratorBuilder};
pub use error::{BoxError, MigrateError};
pub use target::{Direction, Target};
pub use traits::{Migration, TransactionScope, Versioner};

// Re-export proc macros when the `macros` feature is enabled.
#[cfg(feature = "macros")]
pub use strata_migrate_macros::migration;
