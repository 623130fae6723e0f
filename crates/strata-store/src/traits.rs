use core::fmt;

use thiserror::Error;

/// Name of the version table when none is configured.
pub const DEFAULT_VERSION_TABLE: &str = "schema_migrations";

const MAX_TABLE_NAME_LEN: usize = 63;

/// Errors shared by every backend's configuration.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The version table name is not a plain SQL identifier.
    #[error("invalid version table name `{0}`: expected [A-Za-z_][A-Za-z0-9_]* of at most 63 characters")]
    InvalidTableName(String),
}

/// Check that `name` can be spliced into SQL as a bare identifier.
///
/// ```
/// use strata_store::validate_table_name;
///
/// assert!(validate_table_name("schema_migrations").is_ok());
/// assert!(validate_table_name("users; DROP TABLE x").is_err());
/// ```
pub fn validate_table_name(name: &str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let valid_head = matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic());
    let valid_tail = chars.all(|c| c == '_' || c.is_ascii_alphanumeric());

    if valid_head && valid_tail && name.len() <= MAX_TABLE_NAME_LEN {
        Ok(())
    } else {
        Err(StoreError::InvalidTableName(name.to_string()))
    }
}

/// Namespaced key-value access for data migrations.
///
/// Implemented by the memory and redb transaction handles, so a migration
/// that reshapes stored records runs inside the same transaction that
/// records its version.
///
/// Values are opaque bytes; the store does not interpret them.
pub trait StateStore {
    /// Error type for this backend.
    type Error: fmt::Debug + fmt::Display;

    /// Store a value under `(namespace, key)`.
    fn put(&mut self, namespace: &str, key: &str, value: &[u8]) -> Result<(), Self::Error>;

    /// Retrieve a value by `(namespace, key)`.
    /// Returns `None` if the key does not exist.
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Delete a value by `(namespace, key)`.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), Self::Error>;

    /// List all keys in a namespace, sorted.
    fn list_keys(&self, namespace: &str) -> Result<Vec<String>, Self::Error>;

    /// Check if a key exists in a namespace.
    fn exists(&self, namespace: &str, key: &str) -> Result<bool, Self::Error> {
        Ok(self.get(namespace, key)?.is_some())
    }
}

/// Runs raw migration scripts inside an open transaction.
pub trait ScriptExecutor {
    /// Error type for this backend.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Execute `script`, which may hold several statements.
    fn execute_script(&mut self, script: &str) -> Result<(), Self::Error>;
}
