use core::fmt;

use tracing::{debug, info, info_span, warn};

use crate::context::Context;
use crate::error::MigrateError;
use crate::target::{Direction, Target};
use crate::traits::{Migration, TransactionScope, Versioner};

/// A registered migration for transaction handle `T`.
pub type BoxedMigration<T> = Box<dyn Migration<T>>;

/// Summary of a successful [`Migrator::up`] or [`Migrator::down`] run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MigrationOutcome {
    /// Direction of the run.
    pub direction: Direction,
    /// Target after sentinel resolution.
    pub target: i64,
    /// Persisted version read by the first transaction.
    pub from_version: i64,
    /// Persisted version when the run finished.
    pub version: i64,
    /// Versions whose action ran, in execution order.
    pub applied: Vec<i64>,
}

impl MigrationOutcome {
    /// `true` when no action ran.
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// What a single transaction of the convergence loop did.
enum Step {
    /// The persisted version already equals the target.
    Reached,
    /// Nothing left to do in this direction; the target is satisfied.
    Settled,
    /// One action ran and `version` was persisted.
    Moved {
        migration: i64,
        version: i64,
        more: bool,
    },
}

/// Applies and reverts an ordered set of migrations against a store.
///
/// The migrator owns an immutable, version-sorted list of migrations and a
/// [`TransactionScope`]. Each call to [`up`](Self::up) or
/// [`down`](Self::down) loops: open a transaction, read the persisted
/// version, run at most one migration, persist the new version, commit.
/// Progress is therefore durable per step; a failed or interrupted run
/// leaves the store at the last committed version and calling again
/// resumes from there.
///
/// # Example
///
/// ```
/// use strata_migrate::{BoxError, Context, Migration, Migrator, Target, Versioner};
/// use strata_store::MemoryStore;
///
/// struct Noop(i64);
///
/// impl<T: Versioner> Migration<T> for Noop {
///     fn version(&self) -> i64 { self.0 }
///     fn up(&self, _: &Context, _: &mut T) -> Result<(), BoxError> { Ok(()) }
///     fn down(&self, _: &Context, _: &mut T) -> Result<(), BoxError> { Ok(()) }
/// }
///
/// let store = MemoryStore::new();
/// let migrator = Migrator::builder(&store)
///     .register(Box::new(Noop(3)))
///     .register(Box::new(Noop(1)))
///     .build()
///     .unwrap();
///
/// let ctx = Context::new();
/// let outcome = migrator.up(&ctx, Target::Latest).unwrap();
/// assert_eq!(outcome.applied, vec![1, 3]);
/// assert_eq!(store.version(), 3);
/// ```
pub struct Migrator<S: TransactionScope> {
    scope: S,
    migrations: Vec<BoxedMigration<S::Tx>>,
}

impl<S: TransactionScope> Migrator<S> {
    /// Build a migrator, sorting `migrations` by version.
    ///
    /// Fails with [`MigrateError::DuplicateMigrationVersion`] when two
    /// migrations share a version. An empty set is accepted here; every
    /// later `up`/`down` then fails with [`MigrateError::NoMigrations`].
    pub fn new<I>(scope: S, migrations: I) -> Result<Self, MigrateError>
    where
        I: IntoIterator<Item = BoxedMigration<S::Tx>>,
    {
        let mut migrations: Vec<_> = migrations.into_iter().collect();
        migrations.sort_by_key(|m| m.version());

        if let Some(pair) = migrations
            .windows(2)
            .find(|pair| pair[0].version() == pair[1].version())
        {
            return Err(MigrateError::DuplicateMigrationVersion(pair[0].version()));
        }

        Ok(Self { scope, migrations })
    }

    /// Start a builder that registers migrations one at a time.
    pub fn builder(scope: S) -> MigratorBuilder<S> {
        MigratorBuilder {
            scope,
            migrations: Vec::new(),
        }
    }

    /// The transaction scope.
    pub fn scope(&self) -> &S {
        &self.scope
    }

    /// Registered migrations in ascending version order.
    pub fn migrations(&self) -> impl Iterator<Item = &dyn Migration<S::Tx>> + '_ {
        self.migrations.iter().map(|m| m.as_ref())
    }

    /// Registered versions in ascending order.
    pub fn versions(&self) -> Vec<i64> {
        self.migrations.iter().map(|m| m.version()).collect()
    }

    /// Highest registered version.
    pub fn latest_version(&self) -> Option<i64> {
        self.migrations.last().map(|m| m.version())
    }

    /// Lowest registered version.
    pub fn oldest_version(&self) -> Option<i64> {
        self.migrations.first().map(|m| m.version())
    }

    /// Number of registered migrations.
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Whether no migrations are registered.
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Read the persisted version inside its own transaction.
    pub fn current_version(&self, ctx: &Context) -> Result<i64, MigrateError> {
        ctx.check()?;
        self.scope.transaction(ctx, |tx| read_version(tx, ctx))
    }

    /// Apply forward actions until the persisted version equals `target`.
    ///
    /// [`Target::Latest`] resolves to the highest registered version. Fails
    /// with [`MigrateError::MigrationNotFound`] when the target lies beyond
    /// the highest version or between two registered versions; in both
    /// cases every reachable step before that point stays committed.
    pub fn up(
        &self,
        ctx: &Context,
        target: impl Into<Target>,
    ) -> Result<MigrationOutcome, MigrateError> {
        self.converge(ctx, Direction::Up, target.into())
    }

    /// Apply reverse actions until the persisted version equals `target`.
    ///
    /// [`Target::Oldest`] resolves to the lowest registered version. Each
    /// step reverts the migration at the persisted version and records the
    /// next lower registered version, so the lowest migration is never
    /// reverted: `down(Oldest)` stops at it.
    pub fn down(
        &self,
        ctx: &Context,
        target: impl Into<Target>,
    ) -> Result<MigrationOutcome, MigrateError> {
        self.converge(ctx, Direction::Down, target.into())
    }

    fn converge(
        &self,
        ctx: &Context,
        direction: Direction,
        target: Target,
    ) -> Result<MigrationOutcome, MigrateError> {
        if self.migrations.is_empty() {
            return Err(MigrateError::NoMigrations);
        }
        let resolved = target
            .resolve(&self.versions())
            .ok_or(MigrateError::NoMigrations)?;

        let span = info_span!("migrate", %direction, %target, resolved);
        let _entered = span.enter();

        let mut from_version = None;
        let mut applied = Vec::new();

        loop {
            ctx.check()?;

            let (current, step) = self
                .scope
                .transaction(ctx, |tx| {
                    let current = read_version(tx, ctx)?;
                    if current == resolved {
                        return Ok((current, Step::Reached));
                    }
                    let step = match direction {
                        Direction::Up => self.step_up(ctx, tx, current, resolved)?,
                        Direction::Down => self.step_down(ctx, tx, current, resolved)?,
                    };
                    Ok((current, step))
                })
                .map_err(|err| {
                    warn!(error = %err, "migration run stopped");
                    err
                })?;

            let from_version = *from_version.get_or_insert(current);
            let finish = |version: i64, applied: Vec<i64>| MigrationOutcome {
                direction,
                target: resolved,
                from_version,
                version,
                applied,
            };

            match step {
                Step::Reached => {
                    debug!(version = current, "target version reached");
                    return Ok(finish(current, applied));
                }
                Step::Settled => {
                    debug!(version = current, "no further migration in this direction");
                    return Ok(finish(current, applied));
                }
                Step::Moved {
                    migration,
                    version,
                    more,
                } => {
                    info!(migration, version, "migration step committed");
                    applied.push(migration);
                    if !more {
                        return Ok(finish(version, applied));
                    }
                }
            }
        }
    }

    fn step_up(
        &self,
        ctx: &Context,
        tx: &mut S::Tx,
        current: i64,
        target: i64,
    ) -> Result<Step, MigrateError> {
        let idx = self.migrations.partition_point(|m| m.version() <= current);
        let Some(next) = self.migrations.get(idx) else {
            if current < target {
                return Err(MigrateError::MigrationNotFound { target, current });
            }
            return Ok(Step::Settled);
        };

        let version = next.version();
        if version > target {
            return Err(MigrateError::MigrationNotFound { target, current });
        }

        ctx.check()?;
        debug!(version, name = next.name(), "applying migration");
        next.up(ctx, tx)
            .map_err(|source| MigrateError::Apply { version, source })?;
        write_version(tx, ctx, version)?;

        Ok(Step::Moved {
            migration: version,
            version,
            more: version < target,
        })
    }

    fn step_down(
        &self,
        ctx: &Context,
        tx: &mut S::Tx,
        current: i64,
        target: i64,
    ) -> Result<Step, MigrateError> {
        let idx = self.migrations.partition_point(|m| m.version() < current);
        let Some(previous) = idx.checked_sub(1).map(|i| self.migrations[i].version()) else {
            if current > target {
                return Err(MigrateError::MigrationNotFound { target, current });
            }
            return Ok(Step::Settled);
        };

        if previous < target {
            return Err(MigrateError::MigrationNotFound { target, current });
        }

        // The persisted version must be one this migrator knows how to revert.
        let Some(applied) = self.migrations.get(idx).filter(|m| m.version() == current) else {
            return Err(MigrateError::MigrationNotFound { target, current });
        };

        ctx.check()?;
        debug!(version = current, name = applied.name(), "reverting migration");
        applied
            .down(ctx, tx)
            .map_err(|source| MigrateError::Revert {
                version: current,
                source,
            })?;
        write_version(tx, ctx, previous)?;

        Ok(Step::Moved {
            migration: current,
            version: previous,
            more: previous > target,
        })
    }
}

impl<S: TransactionScope> fmt::Debug for Migrator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migrator")
            .field("versions", &self.versions())
            .finish_non_exhaustive()
    }
}

/// Collects migrations before validating them into a [`Migrator`].
pub struct MigratorBuilder<S: TransactionScope> {
    scope: S,
    migrations: Vec<BoxedMigration<S::Tx>>,
}

impl<S: TransactionScope> MigratorBuilder<S> {
    /// Register one migration. Order does not matter.
    pub fn register(mut self, migration: BoxedMigration<S::Tx>) -> Self {
        self.migrations.push(migration);
        self
    }

    /// Register several migrations.
    pub fn register_all<I>(mut self, migrations: I) -> Self
    where
        I: IntoIterator<Item = BoxedMigration<S::Tx>>,
    {
        self.migrations.extend(migrations);
        self
    }

    /// Sort and validate; see [`Migrator::new`].
    pub fn build(self) -> Result<Migrator<S>, MigrateError> {
        Migrator::new(self.scope, self.migrations)
    }
}

fn read_version<T: Versioner>(tx: &mut T, ctx: &Context) -> Result<i64, MigrateError> {
    tx.current_version(ctx)
        .map_err(|e| MigrateError::ReadVersion(Box::new(e)))
}

fn write_version<T: Versioner>(tx: &mut T, ctx: &Context, version: i64) -> Result<(), MigrateError> {
    tx.set_version(ctx, version)
        .map_err(|e| MigrateError::WriteVersion {
            version,
            source: Box::new(e),
        })
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::error::BoxError;

    #[derive(Debug, thiserror::Error)]
    #[error("storage unavailable")]
    struct StorageDown;

    /// Committed state of the mock store plus bookkeeping for assertions.
    #[derive(Debug, Clone, Default)]
    struct Ledger {
        version: i64,
        actions: Vec<String>,
        writes: Vec<i64>,
        commits: usize,
        rollbacks: usize,
    }

    #[derive(Default)]
    struct MockTx {
        version: i64,
        actions: Vec<String>,
        writes: Vec<i64>,
        fail_write_at: Option<i64>,
    }

    impl Versioner for MockTx {
        type Error = StorageDown;

        fn current_version(&mut self, _ctx: &Context) -> Result<i64, StorageDown> {
            Ok(self.version)
        }

        fn set_version(&mut self, _ctx: &Context, version: i64) -> Result<(), StorageDown> {
            if self.fail_write_at == Some(version) {
                return Err(StorageDown);
            }
            self.version = version;
            self.writes.push(version);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockScope {
        ledger: RefCell<Ledger>,
        fail_write_at: Option<i64>,
    }

    impl MockScope {
        fn at(version: i64) -> Self {
            let scope = Self::default();
            scope.ledger.borrow_mut().version = version;
            scope
        }

        fn ledger(&self) -> Ledger {
            self.ledger.borrow().clone()
        }
    }

    impl TransactionScope for MockScope {
        type Tx = MockTx;

        fn transaction<R, F>(&self, ctx: &Context, handler: F) -> Result<R, MigrateError>
        where
            F: FnOnce(&mut MockTx) -> Result<R, MigrateError>,
        {
            ctx.check()?;
            let mut tx = MockTx {
                version: self.ledger.borrow().version,
                fail_write_at: self.fail_write_at,
                ..MockTx::default()
            };
            match handler(&mut tx) {
                Ok(result) => {
                    let mut ledger = self.ledger.borrow_mut();
                    ledger.version = tx.version;
                    ledger.actions.extend(tx.actions);
                    ledger.writes.extend(tx.writes);
                    ledger.commits += 1;
                    Ok(result)
                }
                Err(err) => {
                    self.ledger.borrow_mut().rollbacks += 1;
                    Err(err)
                }
            }
        }
    }

    struct Recorded {
        version: i64,
        fail: bool,
    }

    impl Migration<MockTx> for Recorded {
        fn version(&self) -> i64 {
            self.version
        }

        fn up(&self, _ctx: &Context, tx: &mut MockTx) -> Result<(), BoxError> {
            if self.fail {
                return Err(format!("up {} exploded", self.version).into());
            }
            tx.actions.push(format!("up:{}", self.version));
            Ok(())
        }

        fn down(&self, _ctx: &Context, tx: &mut MockTx) -> Result<(), BoxError> {
            if self.fail {
                return Err(format!("down {} exploded", self.version).into());
            }
            tx.actions.push(format!("down:{}", self.version));
            Ok(())
        }
    }

    fn ok(version: i64) -> BoxedMigration<MockTx> {
        Box::new(Recorded {
            version,
            fail: false,
        })
    }

    fn failing(version: i64) -> BoxedMigration<MockTx> {
        Box::new(Recorded {
            version,
            fail: true,
        })
    }

    fn migrator(scope: MockScope, versions: &[i64]) -> Migrator<MockScope> {
        Migrator::new(scope, versions.iter().map(|&v| ok(v))).unwrap()
    }

    #[test]
    fn new_sorts_by_version() {
        let m = migrator(MockScope::default(), &[5, 1, 4, 3]);
        assert_eq!(m.versions(), vec![1, 3, 4, 5]);
        assert_eq!(m.oldest_version(), Some(1));
        assert_eq!(m.latest_version(), Some(5));
        assert_eq!(m.len(), 4);
        let listed: Vec<i64> = m.migrations().map(|m| m.version()).collect();
        assert_eq!(listed, vec![1, 3, 4, 5]);
    }

    #[test]
    fn duplicate_version_is_rejected() {
        let err = Migrator::new(MockScope::default(), vec![ok(1), ok(2), ok(2)]).unwrap_err();
        assert!(matches!(err, MigrateError::DuplicateMigrationVersion(2)));
    }

    #[test]
    fn empty_set_builds_but_cannot_run() {
        let m = migrator(MockScope::at(3), &[]);
        assert!(m.is_empty());

        let ctx = Context::new();
        assert!(matches!(m.up(&ctx, 3), Err(MigrateError::NoMigrations)));
        assert!(matches!(
            m.up(&ctx, Target::Latest),
            Err(MigrateError::NoMigrations)
        ));
        assert!(matches!(
            m.down(&ctx, Target::Oldest),
            Err(MigrateError::NoMigrations)
        ));
        // Nothing was opened.
        assert_eq!(m.scope().ledger().commits, 0);
    }

    #[test]
    fn up_latest_from_scratch() {
        let m = migrator(MockScope::default(), &[1, 2, 3]);
        let outcome = m.up(&Context::new(), Target::Latest).unwrap();

        assert_eq!(outcome.from_version, 0);
        assert_eq!(outcome.version, 3);
        assert_eq!(outcome.target, 3);
        assert_eq!(outcome.applied, vec![1, 2, 3]);

        let ledger = m.scope().ledger();
        assert_eq!(ledger.actions, vec!["up:1", "up:2", "up:3"]);
        assert_eq!(ledger.writes, vec![1, 2, 3]);
        // One transaction per applied migration.
        assert_eq!(ledger.commits, 3);
    }

    #[test]
    fn equal_version_is_a_noop_commit() {
        let m = migrator(MockScope::at(3), &[1, 3, 4]);
        let outcome = m.up(&Context::new(), 3).unwrap();

        assert!(outcome.is_noop());
        assert_eq!(outcome.version, 3);
        let ledger = m.scope().ledger();
        assert!(ledger.actions.is_empty());
        assert!(ledger.writes.is_empty());
        assert_eq!(ledger.commits, 1);
    }

    #[test]
    fn up_to_intermediate_version() {
        let m = migrator(MockScope::default(), &[1, 3, 4, 5]);
        let outcome = m.up(&Context::new(), 4).unwrap();

        assert_eq!(outcome.version, 4);
        let ledger = m.scope().ledger();
        assert_eq!(ledger.actions, vec!["up:1", "up:3", "up:4"]);
        assert_eq!(ledger.commits, 3);
        assert!(!ledger.actions.contains(&"up:5".to_string()));
    }

    #[test]
    fn up_into_gap_keeps_reachable_progress() {
        let m = migrator(MockScope::default(), &[1, 3, 4, 5]);
        let err = m.up(&Context::new(), 2).unwrap_err();

        assert!(matches!(
            err,
            MigrateError::MigrationNotFound {
                target: 2,
                current: 1
            }
        ));
        let ledger = m.scope().ledger();
        assert_eq!(ledger.version, 1);
        assert_eq!(ledger.actions, vec!["up:1"]);
        assert_eq!(ledger.rollbacks, 1);
    }

    #[test]
    fn up_beyond_highest_version() {
        let m = migrator(MockScope::default(), &[1, 3]);
        let err = m.up(&Context::new(), 10).unwrap_err();

        assert!(err.is_not_found());
        let ledger = m.scope().ledger();
        assert_eq!(ledger.version, 3);
        assert_eq!(ledger.actions, vec!["up:1", "up:3"]);
    }

    #[test]
    fn up_when_already_past_target_settles() {
        let m = migrator(MockScope::at(3), &[1, 3]);
        let outcome = m.up(&Context::new(), 2).unwrap();

        assert!(outcome.is_noop());
        assert_eq!(outcome.version, 3);
        let ledger = m.scope().ledger();
        assert!(ledger.writes.is_empty());
        assert_eq!(ledger.commits, 1);
    }

    #[test]
    fn up_below_target_with_later_migrations_is_not_found() {
        // Persisted 3, target 2: the next migration (4) overshoots.
        let m = migrator(MockScope::at(3), &[1, 3, 4]);
        let err = m.up(&Context::new(), 2).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(m.scope().ledger().version, 3);
    }

    #[test]
    fn down_oldest_stops_at_lowest_version() {
        let m = migrator(MockScope::at(5), &[1, 3, 4, 5]);
        let outcome = m.down(&Context::new(), Target::Oldest).unwrap();

        assert_eq!(outcome.target, 1);
        assert_eq!(outcome.version, 1);
        assert_eq!(outcome.applied, vec![5, 4, 3]);
        let ledger = m.scope().ledger();
        assert_eq!(ledger.actions, vec!["down:5", "down:4", "down:3"]);
        assert_eq!(ledger.writes, vec![4, 3, 1]);
        assert!(!ledger.actions.contains(&"down:1".to_string()));
    }

    #[test]
    fn down_to_intermediate_version() {
        let m = migrator(MockScope::at(5), &[1, 3, 4, 5]);
        let outcome = m.down(&Context::new(), 3).unwrap();

        assert_eq!(outcome.version, 3);
        assert_eq!(m.scope().ledger().actions, vec!["down:5", "down:4"]);
    }

    #[test]
    fn down_into_gap_is_not_found() {
        let m = migrator(MockScope::at(5), &[1, 3, 4, 5]);
        let err = m.down(&Context::new(), 2).unwrap_err();

        assert!(matches!(
            err,
            MigrateError::MigrationNotFound {
                target: 2,
                current: 3
            }
        ));
        assert_eq!(m.scope().ledger().version, 3);
    }

    #[test]
    fn down_below_lowest_version_is_not_found() {
        let m = migrator(MockScope::at(3), &[1, 3]);
        let err = m.down(&Context::new(), 0).unwrap_err();

        assert!(err.is_not_found());
        // 3 was reverted, then there was nothing below 1.
        let ledger = m.scope().ledger();
        assert_eq!(ledger.version, 1);
        assert_eq!(ledger.actions, vec!["down:3"]);
    }

    #[test]
    fn down_from_unknown_version_is_not_found() {
        let m = migrator(MockScope::at(2), &[1, 3]);
        let err = m.down(&Context::new(), 1).unwrap_err();

        assert!(err.is_not_found());
        let ledger = m.scope().ledger();
        assert_eq!(ledger.version, 2);
        assert!(ledger.actions.is_empty());
    }

    #[test]
    fn down_latest_depends_on_what_lies_below() {
        let m = migrator(MockScope::at(3), &[1, 3, 5]);
        let err = m.down(&Context::new(), Target::Latest).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(m.scope().ledger().version, 3);

        let m = migrator(MockScope::at(1), &[1, 3, 5]);
        let outcome = m.down(&Context::new(), Target::Latest).unwrap();
        assert!(outcome.is_noop());
        assert_eq!(outcome.version, 1);
        assert!(m.scope().ledger().actions.is_empty());
    }

    #[test]
    fn down_from_scratch_settles() {
        let m = migrator(MockScope::default(), &[1, 3]);
        let outcome = m.down(&Context::new(), Target::Oldest).unwrap();
        assert!(outcome.is_noop());
        assert_eq!(outcome.version, 0);
    }

    #[test]
    fn failing_action_rolls_back_only_its_step() {
        let m = Migrator::new(MockScope::default(), vec![ok(1), ok(2), failing(3), ok(4)]).unwrap();
        let err = m.up(&Context::new(), Target::Latest).unwrap_err();

        match &err {
            MigrateError::Apply { version, source } => {
                assert_eq!(*version, 3);
                assert_eq!(source.to_string(), "up 3 exploded");
            }
            other => panic!("unexpected error: {other}"),
        }
        let ledger = m.scope().ledger();
        assert_eq!(ledger.version, 2);
        assert_eq!(ledger.actions, vec!["up:1", "up:2"]);
        assert_eq!(ledger.commits, 2);
        assert_eq!(ledger.rollbacks, 1);
    }

    #[test]
    fn failing_reverse_action_is_wrapped() {
        let m = Migrator::new(MockScope::at(3), vec![ok(1), ok(2), failing(3)]).unwrap();
        let err = m.down(&Context::new(), 1).unwrap_err();

        assert!(matches!(err, MigrateError::Revert { version: 3, .. }));
        assert_eq!(m.scope().ledger().version, 3);
    }

    #[test]
    fn failed_version_write_rolls_back() {
        let scope = MockScope {
            fail_write_at: Some(2),
            ..MockScope::default()
        };
        let m = migrator(scope, &[1, 2, 3]);
        let err = m.up(&Context::new(), Target::Latest).unwrap_err();

        assert!(matches!(err, MigrateError::WriteVersion { version: 2, .. }));
        let ledger = m.scope().ledger();
        assert_eq!(ledger.version, 1);
        // The action of 2 ran inside the rolled-back transaction only.
        assert_eq!(ledger.actions, vec!["up:1"]);
    }

    #[test]
    fn rerun_resumes_from_committed_version() {
        let m = Migrator::new(MockScope::default(), vec![ok(1), ok(2), failing(3)]).unwrap();
        let ctx = Context::new();
        assert!(m.up(&ctx, Target::Latest).is_err());
        let resumed_at = m.scope().ledger().version;

        let fixed = Migrator::new(MockScope::at(resumed_at), vec![ok(1), ok(2), ok(3)]).unwrap();
        let outcome = fixed.up(&ctx, Target::Latest).unwrap();

        assert_eq!(outcome.from_version, 2);
        assert_eq!(outcome.applied, vec![3]);
        assert_eq!(fixed.scope().ledger().actions, vec!["up:3"]);
    }

    #[test]
    fn cancelled_context_touches_nothing() {
        let m = migrator(MockScope::default(), &[1, 2]);
        let ctx = Context::new();
        ctx.cancel();

        assert!(matches!(
            m.up(&ctx, Target::Latest),
            Err(MigrateError::Cancelled)
        ));
        let ledger = m.scope().ledger();
        assert_eq!(ledger.commits, 0);
        assert_eq!(ledger.version, 0);
    }

    #[test]
    fn current_version_reads_without_writing() {
        let m = migrator(MockScope::at(4), &[4]);
        assert_eq!(m.current_version(&Context::new()).unwrap(), 4);
        let ledger = m.scope().ledger();
        assert!(ledger.writes.is_empty());
        assert_eq!(ledger.commits, 1);
    }

    #[test]
    fn builder_validates_like_new() {
        let m = Migrator::builder(MockScope::default())
            .register(ok(2))
            .register_all(vec![ok(3), ok(1)])
            .build()
            .unwrap();
        assert_eq!(m.versions(), vec![1, 2, 3]);

        let err = Migrator::builder(MockScope::default())
            .register(ok(7))
            .register(ok(7))
            .build()
            .unwrap_err();
        assert!(matches!(err, MigrateError::DuplicateMigrationVersion(7)));
    }

    #[test]
    fn debug_lists_versions() {
        let m = migrator(MockScope::default(), &[2, 1]);
        assert_eq!(format!("{m:?}"), "Migrator { versions: [1, 2], .. }");
    }
}
