use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use strata_migrate::{Context, MigrateError, TransactionScope, Versioner};
use tracing::debug;

use crate::traits::{ScriptExecutor, StateStore};

/// Committed contents of a [`MemoryStore`].
#[derive(Debug, Clone, Default)]
struct MemoryState {
    version: i64,
    data: BTreeMap<(String, String), Vec<u8>>,
    scripts: Vec<String>,
}

/// In-memory transaction scope.
///
/// Each transaction works on a private copy of the committed state. Commit
/// swaps the copy in; an error drops it, so a failed step leaves no trace.
/// Transactions are serialized: the store lock is held for the whole
/// handler, so a handler must not open a nested transaction on the same
/// store.
///
/// # Example
///
/// ```
/// use strata_migrate::{Context, TransactionScope, Versioner};
/// use strata_store::{MemoryStore, StateStore};
///
/// let store = MemoryStore::new();
/// let ctx = Context::new();
///
/// store
///     .transaction(&ctx, |tx| {
///         tx.put("users", "u1", b"alice")?;
///         tx.set_version(&ctx, 1)?;
///         Ok(())
///     })
///     .unwrap();
///
/// assert_eq!(store.version(), 1);
/// assert_eq!(store.get("users", "u1").as_deref(), Some(b"alice".as_slice()));
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store at version 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose version is already `version`.
    pub fn with_version(version: i64) -> Self {
        let store = Self::new();
        store.lock().version = version;
        store
    }

    /// The committed version.
    pub fn version(&self) -> i64 {
        self.lock().version
    }

    /// Read a committed value.
    pub fn get(&self, namespace: &str, key: &str) -> Option<Vec<u8>> {
        self.lock()
            .data
            .get(&(namespace.to_string(), key.to_string()))
            .cloned()
    }

    /// Scripts executed by committed transactions, in order.
    pub fn scripts(&self) -> Vec<String> {
        self.lock().scripts.clone()
    }

    /// Number of committed transactions.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::Relaxed)
    }

    /// Number of rolled-back transactions.
    pub fn rollback_count(&self) -> usize {
        self.rollbacks.load(Ordering::Relaxed)
    }

    // A panicking handler never reaches the swap, so the state behind a
    // poisoned lock is still the last committed one.
    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TransactionScope for MemoryStore {
    type Tx = MemoryTx;

    fn transaction<R, F>(&self, ctx: &Context, handler: F) -> Result<R, MigrateError>
    where
        F: FnOnce(&mut MemoryTx) -> Result<R, MigrateError>,
    {
        ctx.check()?;
        let mut committed = self.lock();
        let mut tx = MemoryTx {
            state: committed.clone(),
        };

        let result = handler(&mut tx).and_then(|r| ctx.check().map(|()| r));
        match result {
            Ok(r) => {
                *committed = tx.state;
                self.commits.fetch_add(1, Ordering::Relaxed);
                debug!(version = committed.version, "memory transaction committed");
                Ok(r)
            }
            Err(e) => {
                self.rollbacks.fetch_add(1, Ordering::Relaxed);
                debug!(error = %e, "memory transaction rolled back");
                Err(e)
            }
        }
    }
}

/// Handle for one [`MemoryStore`] transaction.
#[derive(Debug)]
pub struct MemoryTx {
    state: MemoryState,
}

impl MemoryTx {
    fn key(namespace: &str, key: &str) -> (String, String) {
        (namespace.to_string(), key.to_string())
    }
}

impl Versioner for MemoryTx {
    type Error = Infallible;

    fn current_version(&mut self, _ctx: &Context) -> Result<i64, Infallible> {
        Ok(self.state.version)
    }

    fn set_version(&mut self, _ctx: &Context, version: i64) -> Result<(), Infallible> {
        self.state.version = version;
        Ok(())
    }
}

impl StateStore for MemoryTx {
    type Error = Infallible;

    fn put(&mut self, namespace: &str, key: &str, value: &[u8]) -> Result<(), Infallible> {
        self.state
            .data
            .insert(Self::key(namespace, key), value.to_vec());
        Ok(())
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, Infallible> {
        Ok(self.state.data.get(&Self::key(namespace, key)).cloned())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), Infallible> {
        self.state.data.remove(&Self::key(namespace, key));
        Ok(())
    }

    fn list_keys(&self, namespace: &str) -> Result<Vec<String>, Infallible> {
        let keys = self
            .state
            .data
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, k)| k.clone())
            .collect();
        Ok(keys)
    }

    fn exists(&self, namespace: &str, key: &str) -> Result<bool, Infallible> {
        Ok(self.state.data.contains_key(&Self::key(namespace, key)))
    }
}

/// Scripts are recorded, not interpreted.
impl ScriptExecutor for MemoryTx {
    type Error = Infallible;

    fn execute_script(&mut self, script: &str) -> Result<(), Infallible> {
        self.state.scripts.push(script.to_string());
        Ok(())
    }
}
