mod build;
mod index;
pub mod owner;
pub mod path;

pub use build::{Build, FAILED_MARKER, surrogate_id};
pub use index::BuildIndex;
pub use path::{CanonicalPath, PathResolver, Zone};

use std::path::{Path, PathBuf};

use crate::error::Result;

/// BuildCatalog hands out build indexes to query handlers.
///
/// Implementations decide how fresh an index is; callers only rely on the query
/// semantics of [`BuildIndex`].
pub trait BuildCatalog: Send + Sync {
    fn snapshot(&self) -> Result<BuildIndex>;
}

/// Rescans the whole repository on every request, so answers always match the disk.
pub struct RescanCatalog {
    root: PathBuf,
}

impl RescanCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl BuildCatalog for RescanCatalog {
    fn snapshot(&self) -> Result<BuildIndex> {
        Ok(BuildIndex::scan(&self.root))
    }
}
