use crate::context::Context;
use crate::error::{BoxError, MigrateError};

/// Reads and writes the single persisted version number.
///
/// Implemented by transaction handles, so every call happens inside the
/// transaction a [`TransactionScope`] opened.
pub trait Versioner {
    /// Error type of the underlying storage.
    type Error: std::error::Error + Send + Sync + 'static;

    /// The version of the last applied migration, or `0` when nothing has
    /// been recorded yet.
    fn current_version(&mut self, ctx: &Context) -> Result<i64, Self::Error>;

    /// Persist `version`, inserting the record if it does not exist yet.
    fn set_version(&mut self, ctx: &Context, version: i64) -> Result<(), Self::Error>;
}

/// Runs a handler inside one atomic unit of work.
///
/// Implementations must make the version storage exist before the handler
/// runs, commit when it returns `Ok`, and roll back and return its error
/// unchanged when it returns `Err`. Failures to begin or commit are reported
/// as [`MigrateError::Transaction`].
pub trait TransactionScope {
    /// Handle given to the handler; also the type migrations operate on.
    type Tx: Versioner;

    /// Execute `handler` in a transaction.
    fn transaction<R, F>(&self, ctx: &Context, handler: F) -> Result<R, MigrateError>
    where
        F: FnOnce(&mut Self::Tx) -> Result<R, MigrateError>;
}

impl<S: TransactionScope> TransactionScope for &S {
    type Tx = S::Tx;

    fn transaction<R, F>(&self, ctx: &Context, handler: F) -> Result<R, MigrateError>
    where
        F: FnOnce(&mut Self::Tx) -> Result<R, MigrateError>,
    {
        (**self).transaction(ctx, handler)
    }
}

/// A single versioned change with a forward and a reverse action.
///
/// Versions are caller-assigned. They only need to be unique within one
/// migrator and do not have to be contiguous: `1, 2, 3` and Unix timestamps
/// both work. The migrator orders by [`version`](Self::version) and never
/// looks inside the actions.
///
/// # Example
///
/// ```
/// use strata_migrate::{BoxError, Context, Migration, Versioner};
///
/// struct CreateUsers;
///
/// impl<T: Versioner> Migration<T> for CreateUsers {
///     fn version(&self) -> i64 { 1 }
///     fn name(&self) -> &str { "create_users" }
///     fn up(&self, _ctx: &Context, _tx: &mut T) -> Result<(), BoxError> { Ok(()) }
///     fn down(&self, _ctx: &Context, _tx: &mut T) -> Result<(), BoxError> { Ok(()) }
/// }
/// ```
pub trait Migration<T: Versioner>: Send + Sync {
    /// Version this migration brings the store to.
    fn version(&self) -> i64;

    /// Human-readable name used in logs and status output.
    fn name(&self) -> &str {
        ""
    }

    /// Apply the change.
    fn up(&self, ctx: &Context, tx: &mut T) -> Result<(), BoxError>;

    /// Revert the change.
    fn down(&self, ctx: &Context, tx: &mut T) -> Result<(), BoxError>;
}
