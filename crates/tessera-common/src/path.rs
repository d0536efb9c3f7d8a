//! Namespace paths
//!
//! `FsPath` is an absolute, normalized path: it starts with `/`, has no
//! trailing or duplicate separators, and no `.` or `..` components.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const SEPARATOR: char = '/';

/// Absolute namespace path
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct FsPath(String);

impl FsPath {
    /// Parse and normalize a path
    pub fn new(path: impl AsRef<str>) -> Result<Self, PathError> {
        let raw = path.as_ref();
        if raw.is_empty() {
            return Err(PathError::Empty);
        }
        if !raw.starts_with(SEPARATOR) {
            return Err(PathError::NotAbsolute(raw.to_string()));
        }

        let mut normalized = String::with_capacity(raw.len());
        for component in raw.split(SEPARATOR).filter(|c| !c.is_empty()) {
            if component == "." || component == ".." {
                return Err(PathError::InvalidComponent {
                    path: raw.to_string(),
                    component: component.to_string(),
                });
            }
            normalized.push(SEPARATOR);
            normalized.push_str(component);
        }
        if normalized.is_empty() {
            normalized.push(SEPARATOR);
        }
        Ok(Self(normalized))
    }

    /// The root path `/`
    #[must_use]
    pub fn root() -> Self {
        Self(SEPARATOR.to_string())
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.len() == 1
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path components below the root, in order
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATOR).filter(|c| !c.is_empty())
    }

    /// Number of components below the root
    #[must_use]
    pub fn depth(&self) -> usize {
        self.components().count()
    }

    /// Last component, empty for the root
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.rsplit(SEPARATOR).next().unwrap_or_default()
    }

    /// Parent path, `None` for the root
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind(SEPARATOR) {
            Some(0) | None => Some(Self::root()),
            Some(pos) => Some(Self(self.0[..pos].to_string())),
        }
    }

    /// Append a single component
    pub fn join(&self, name: &str) -> Result<Self, PathError> {
        if name.is_empty() || name.contains(SEPARATOR) || name == "." || name == ".." {
            return Err(PathError::InvalidComponent {
                path: self.0.clone(),
                component: name.to_string(),
            });
        }
        if self.is_root() {
            Ok(Self(format!("/{name}")))
        } else {
            Ok(Self(format!("{}/{name}", self.0)))
        }
    }

    /// The root, every intermediate ancestor, and the path itself, root first
    #[must_use]
    pub fn lineage(&self) -> Vec<Self> {
        let mut lineage = vec![Self::root()];
        let mut current = Self::root();
        for component in self.components() {
            current = Self(if current.is_root() {
                format!("/{component}")
            } else {
                format!("{}/{component}", current.0)
            });
            lineage.push(current.clone());
        }
        lineage
    }

    /// Whether `self` is a strict ancestor of `other`
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        if self.is_root() {
            return !other.is_root();
        }
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == b'/'
    }

    /// Path of `self` relative to `ancestor`, without a leading separator
    #[must_use]
    pub fn relative_to(&self, ancestor: &Self) -> Option<&str> {
        if self == ancestor {
            return Some("");
        }
        if !ancestor.is_ancestor_of(self) {
            return None;
        }
        let skip = if ancestor.is_root() { 1 } else { ancestor.0.len() + 1 };
        Some(&self.0[skip..])
    }
}

impl fmt::Debug for FsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FsPath({:?})", self.0)
    }
}

impl AsRef<str> for FsPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for FsPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Errors that can occur when parsing a path
#[derive(Debug, Clone, thiserror::Error)]
pub enum PathError {
    #[error("Path cannot be empty")]
    Empty,
    #[error("Path {0} is not absolute")]
    NotAbsolute(String),
    #[error("Path {path} has an invalid component {component:?}")]
    InvalidComponent { path: String, component: String },
}

impl PathError {
    /// The path that failed to parse
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Empty => "",
            Self::NotAbsolute(path) | Self::InvalidComponent { path, .. } => path,
        }
    }
}
