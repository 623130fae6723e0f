use core::fmt;

/// The version a [`Migrator`](crate::Migrator) should converge on.
///
/// `Latest` and `Oldest` are markers, not versions: they are resolved
/// against the registered migrations before any transaction is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// The highest registered version.
    Latest,
    /// The lowest registered version.
    Oldest,
    /// A concrete version.
    Version(i64),
}

impl Target {
    /// Resolve against an ascending list of versions.
    ///
    /// Returns `None` for a sentinel when `versions` is empty.
    pub fn resolve(&self, versions: &[i64]) -> Option<i64> {
        match self {
            Self::Latest => versions.last().copied(),
            Self::Oldest => versions.first().copied(),
            Self::Version(v) => Some(*v),
        }
    }
}

impl From<i64> for Target {
    fn from(version: i64) -> Self {
        Self::Version(version)
    }
}

// Unsuffixed integer literals default to i32.
impl From<i32> for Target {
    fn from(version: i32) -> Self {
        Self::Version(i64::from(version))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str("latest"),
            Self::Oldest => f.write_str("oldest"),
            Self::Version(v) => write!(f, "{v}"),
        }
    }
}

/// Which way a migration run moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Direction {
    /// Apply forward actions.
    Up,
    /// Apply reverse actions.
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => f.write_str("up"),
            Self::Down => f.write_str("down"),
        }
    }
}
