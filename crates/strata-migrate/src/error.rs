use thiserror::Error;

/// Boxed error returned by migration actions and collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors produced while building a [`Migrator`](crate::Migrator) or while
/// converging on a target version.
///
/// The first three variants are the migrator's own verdicts. Everything
/// else wraps a failure raised by a collaborator and carries the version it
/// happened at, so a caller can tell which step to look at before retrying.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MigrateError {
    /// The migrator holds no migrations.
    #[error("no migrations registered")]
    NoMigrations,

    /// The resolved target cannot be reached from the persisted version.
    #[error("no migration reaches target version {target} from version {current}")]
    MigrationNotFound { target: i64, current: i64 },

    /// Two migrations were registered with the same version.
    #[error("duplicate migration version {0}")]
    DuplicateMigrationVersion(i64),

    /// A forward action failed.
    #[error("applying migration {version}: {source}")]
    Apply {
        version: i64,
        #[source]
        source: BoxError,
    },

    /// A reverse action failed.
    #[error("reverting migration {version}: {source}")]
    Revert {
        version: i64,
        #[source]
        source: BoxError,
    },

    /// The persisted version could not be read.
    #[error("reading current version: {0}")]
    ReadVersion(#[source] BoxError),

    /// The new version could not be persisted.
    #[error("persisting version {version}: {source}")]
    WriteVersion {
        version: i64,
        #[source]
        source: BoxError,
    },

    /// The transaction scope failed to begin or commit.
    #[error("transaction failed: {0}")]
    Transaction(#[source] BoxError),

    /// The context was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The context deadline passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl From<core::convert::Infallible> for MigrateError {
    fn from(never: core::convert::Infallible) -> Self {
        match never {}
    }
}

impl MigrateError {
    /// Wrap a begin/commit failure raised by a transaction scope.
    pub fn transaction<E: Into<BoxError>>(err: E) -> Self {
        Self::Transaction(err.into())
    }

    /// `true` for [`MigrateError::MigrationNotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::MigrationNotFound { .. })
    }

    /// The migration version a wrapped failure happened at, if any.
    pub fn failed_version(&self) -> Option<i64> {
        match self {
            Self::Apply { version, .. }
            | Self::Revert { version, .. }
            | Self::WriteVersion { version, .. } => Some(*version),
            Self::DuplicateMigrationVersion(version) => Some(*version),
            _ => None,
        }
    }
}
