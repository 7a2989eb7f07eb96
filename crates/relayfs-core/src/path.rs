//! Virtual paths inside a backend namespace.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// A normalized location inside a backend's namespace.
///
/// Paths are stored as a list of components relative to the backend root.
/// `.` is dropped and `..` is resolved lexically; it never climbs above the
/// root. The empty path is the root itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileSystemPath {
    components: Vec<CompactString>,
}

impl FileSystemPath {
    /// Create a path from a string or native path.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let mut components: Vec<CompactString> = Vec::new();
        for component in path.as_ref().components() {
            match component {
                Component::Normal(name) => {
                    components.push(CompactString::from(name.to_string_lossy()));
                }
                Component::ParentDir => {
                    components.pop();
                }
                Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            }
        }
        Self { components }
    }

    /// The root of the namespace.
    pub fn root() -> Self {
        Self::default()
    }

    /// Check whether this is the root.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Append a child name.
    pub fn join(&self, name: impl AsRef<Path>) -> Self {
        let mut joined = self.to_path_buf();
        joined.push(name.as_ref());
        Self::new(joined)
    }

    /// The parent path, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            components: self.components[..self.components.len() - 1].to_vec(),
        })
    }

    /// The last component, or `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.components.last().map(|c| c.as_str())
    }

    /// Iterate over the components from the root down.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(|c| c.as_str())
    }

    /// Number of components below the root.
    pub fn depth(&self) -> usize {
        self.components.len()
    }

    /// Check whether `self` is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &FileSystemPath) -> bool {
        other.components.len() > self.components.len()
            && other.components[..self.components.len()] == self.components[..]
    }

    /// Relative native path (no leading separator), suitable for joining
    /// onto a backend root.
    pub fn to_path_buf(&self) -> PathBuf {
        self.components.iter().map(|c| c.as_str()).collect()
    }
}

impl fmt::Display for FileSystemPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return write!(f, "/");
        }
        for component in &self.components {
            write!(f, "/{component}")?;
        }
        Ok(())
    }
}

impl From<&str> for FileSystemPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<&Path> for FileSystemPath {
    fn from(path: &Path) -> Self {
        Self::new(path)
    }
}

impl From<PathBuf> for FileSystemPath {
    fn from(path: PathBuf) -> Self {
        Self::new(path)
    }
}
