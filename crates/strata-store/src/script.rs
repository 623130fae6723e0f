//! Migrations backed by raw scripts.
//!
//! A directory of migrations looks like this:
//!
//! ```text
//! migrations/
//!   1_create_users.up.sql
//!   1_create_users.down.sql
//!   2_add_email.up.sql
//! ```
//!
//! The down script is optional; without one the reverse action does nothing.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use strata_migrate::{BoxError, BoxedMigration, Context, Migration, Versioner};
use thiserror::Error;
use tracing::debug;

use crate::traits::ScriptExecutor;

const UP_SUFFIX: &str = ".up.sql";
const DOWN_SUFFIX: &str = ".down.sql";

/// Errors raised while building script migrations.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// Script migrations need a version greater than zero.
    #[error("migration version must be greater than 0, got {0}")]
    InvalidVersion(i64),
    /// A file could not be read.
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// A reader failed.
    #[error("reading {which} script: {source}")]
    Read {
        which: &'static str,
        #[source]
        source: io::Error,
    },
    /// A script file name does not start with `<version>_`.
    #[error("cannot parse a version from {0}")]
    InvalidFileName(PathBuf),
    /// Two up (or two down) scripts share a version.
    #[error("more than one script for version {version}: {path}")]
    DuplicateVersion { version: i64, path: PathBuf },
    /// A down script exists without its up script.
    #[error("down script {0} has no matching up script")]
    OrphanDown(PathBuf),
}

/// A migration whose actions execute an up and a down script.
///
/// Works with any transaction handle that is both a [`Versioner`] and a
/// [`ScriptExecutor`]. An empty script is a no-op.
///
/// ```
/// use strata_store::ScriptMigration;
///
/// let m = ScriptMigration::new(1, "CREATE TABLE users (id INTEGER)", "DROP TABLE users")
///     .unwrap()
///     .named("create_users");
/// assert_eq!(m.version(), 1);
/// assert_eq!(m.name(), "create_users");
///
/// assert!(ScriptMigration::new(0, "", "").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptMigration {
    version: i64,
    name: String,
    up: String,
    down: String,
}

impl ScriptMigration {
    /// Build from in-memory scripts.
    pub fn new(
        version: i64,
        up: impl Into<String>,
        down: impl Into<String>,
    ) -> Result<Self, ScriptError> {
        if version <= 0 {
            return Err(ScriptError::InvalidVersion(version));
        }
        Ok(Self {
            version,
            name: String::new(),
            up: up.into(),
            down: down.into(),
        })
    }

    /// Attach a display name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Read both scripts from files.
    pub fn from_files(
        version: i64,
        up: impl AsRef<Path>,
        down: impl AsRef<Path>,
    ) -> Result<Self, ScriptError> {
        if version <= 0 {
            return Err(ScriptError::InvalidVersion(version));
        }
        Self::new(version, read_file(up.as_ref())?, read_file(down.as_ref())?)
    }

    /// Read both scripts from readers. Pass [`io::empty()`] for no down script.
    pub fn from_reader<U: Read, D: Read>(
        version: i64,
        mut up: U,
        mut down: D,
    ) -> Result<Self, ScriptError> {
        if version <= 0 {
            return Err(ScriptError::InvalidVersion(version));
        }
        let mut up_script = String::new();
        up.read_to_string(&mut up_script)
            .map_err(|source| ScriptError::Read { which: "up", source })?;
        let mut down_script = String::new();
        down.read_to_string(&mut down_script)
            .map_err(|source| ScriptError::Read {
                which: "down",
                source,
            })?;
        Self::new(version, up_script, down_script)
    }

    /// Load every `<version>_<name>.up.sql` / `.down.sql` pair in `dir`.
    ///
    /// Other files are ignored. The result is sorted by version.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Vec<Self>, ScriptError> {
        let dir = dir.as_ref();
        let entries = fs::read_dir(dir).map_err(|source| ScriptError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut ups: BTreeMap<i64, (String, PathBuf)> = BTreeMap::new();
        let mut downs: BTreeMap<i64, PathBuf> = BTreeMap::new();

        for entry in entries {
            let path = entry
                .map_err(|source| ScriptError::Io {
                    path: dir.to_path_buf(),
                    source,
                })?
                .path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if let Some(stem) = file_name.strip_suffix(UP_SUFFIX) {
                let (version, name) = parse_stem(stem, &path)?;
                if ups.contains_key(&version) {
                    return Err(ScriptError::DuplicateVersion { version, path });
                }
                ups.insert(version, (name.to_string(), path));
            } else if let Some(stem) = file_name.strip_suffix(DOWN_SUFFIX) {
                let (version, _) = parse_stem(stem, &path)?;
                if downs.contains_key(&version) {
                    return Err(ScriptError::DuplicateVersion { version, path });
                }
                downs.insert(version, path);
            }
        }

        if let Some((_, orphan)) = downs.iter().find(|(v, _)| !ups.contains_key(v)) {
            return Err(ScriptError::OrphanDown(orphan.clone()));
        }

        let mut migrations = Vec::with_capacity(ups.len());
        for (version, (name, up_path)) in ups {
            let down = match downs.get(&version) {
                Some(path) => read_file(path)?,
                None => String::new(),
            };
            debug!(version, name = %name, "loaded script migration");
            migrations.push(Self::new(version, read_file(&up_path)?, down)?.named(name));
        }
        Ok(migrations)
    }

    /// Version this migration brings the store to.
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Display name; empty unless set.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The forward script.
    pub fn up_script(&self) -> &str {
        &self.up
    }

    /// The reverse script.
    pub fn down_script(&self) -> &str {
        &self.down
    }

    /// Box for registration with a `Migrator`.
    pub fn boxed<T>(self) -> BoxedMigration<T>
    where
        T: Versioner + ScriptExecutor,
    {
        Box::new(self)
    }
}

impl<T> Migration<T> for ScriptMigration
where
    T: Versioner + ScriptExecutor,
{
    fn version(&self) -> i64 {
        self.version
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn up(&self, _ctx: &Context, tx: &mut T) -> Result<(), BoxError> {
        run(tx, &self.up)
    }

    fn down(&self, _ctx: &Context, tx: &mut T) -> Result<(), BoxError> {
        run(tx, &self.down)
    }
}

fn run<T: ScriptExecutor>(tx: &mut T, script: &str) -> Result<(), BoxError> {
    if script.trim().is_empty() {
        return Ok(());
    }
    tx.execute_script(script)?;
    Ok(())
}

fn read_file(path: &Path) -> Result<String, ScriptError> {
    fs::read_to_string(path).map_err(|source| ScriptError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Split `12_create_users` into `(12, "create_users")`.
fn parse_stem<'a>(stem: &'a str, path: &Path) -> Result<(i64, &'a str), ScriptError> {
    let (version, name) = stem.split_once('_').unwrap_or((stem, ""));
    let version: i64 = version
        .parse()
        .map_err(|_| ScriptError::InvalidFileName(path.to_path_buf()))?;
    if version <= 0 {
        return Err(ScriptError::InvalidVersion(version));
    }
    Ok((version, name))
}
