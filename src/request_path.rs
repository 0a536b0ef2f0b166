//! Normalized request paths.
//!
//! A [`RequestPath`] keeps the spelling a caller used alongside a normalized
//! absolute form. Two paths are equal when their absolute forms are equal, so
//! `data/./textures/../mesh.bin` and `data/mesh.bin` address the same file and
//! can be used interchangeably as cache keys.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::{Error, Result};

/// Maximum length for request paths (in bytes).
const MAX_PATH_LENGTH: usize = 32768;

/// An immutable, cheaply cloneable file path used to address requests.
///
/// # Examples
///
/// ```
/// use stackio::RequestPath;
///
/// let a = RequestPath::from_root("/game", "data/./mesh.bin").unwrap();
/// let b = RequestPath::from_root("/game/data", "../data/mesh.bin").unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.relative_path(), "data/./mesh.bin");
/// ```
#[derive(Clone)]
pub struct RequestPath {
    relative: Arc<str>,
    absolute: Arc<Path>,
}

impl RequestPath {
    /// Creates a path from a string. Relative paths are resolved against the
    /// current working directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is empty, contains NUL bytes, exceeds the
    /// maximum length, or the working directory cannot be determined.
    pub fn new(path: impl AsRef<str>) -> Result<Self> {
        let path = path.as_ref();
        Self::validate(path)?;

        let as_path = Path::new(path);
        let absolute = if as_path.is_absolute() {
            normalize(as_path)
        } else {
            normalize(&std::env::current_dir()?.join(as_path))
        };

        Ok(Self {
            relative: Arc::from(path),
            absolute: Arc::from(absolute.as_path()),
        })
    }

    /// Creates a path from a root directory and a path relative to it.
    ///
    /// The relative spelling is kept as given; the absolute form is the
    /// normalized join of both.
    pub fn from_root(root: impl AsRef<Path>, relative: impl AsRef<str>) -> Result<Self> {
        let relative = relative.as_ref();
        Self::validate(relative)?;

        let absolute = normalize(&root.as_ref().join(relative));
        Ok(Self {
            relative: Arc::from(relative),
            absolute: Arc::from(absolute.as_path()),
        })
    }

    /// Creates a path from an already absolute [`Path`].
    pub fn from_absolute(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let display = path.to_string_lossy();
        Self::validate(&display)?;
        if !path.is_absolute() {
            return Err(Error::InvalidPath(format!("'{}' is not absolute", display)));
        }

        Ok(Self {
            relative: Arc::from(display.as_ref()),
            absolute: Arc::from(normalize(path).as_path()),
        })
    }

    fn validate(s: &str) -> Result<()> {
        if s.is_empty() {
            return Err(Error::InvalidPath("empty path".into()));
        }
        if s.contains('\0') {
            return Err(Error::InvalidPath("contains NUL byte".into()));
        }
        if s.len() > MAX_PATH_LENGTH {
            return Err(Error::InvalidPath(format!(
                "path exceeds maximum length of {} bytes",
                MAX_PATH_LENGTH
            )));
        }
        Ok(())
    }

    /// Returns the path as originally spelled by the caller.
    #[inline]
    pub fn relative_path(&self) -> &str {
        &self.relative
    }

    /// Returns the normalized absolute path.
    #[inline]
    pub fn absolute_path(&self) -> &Path {
        &self.absolute
    }

    /// Returns true if this path lives under `root`.
    pub fn is_under(&self, root: &Path) -> bool {
        self.absolute.starts_with(root)
    }

    /// Returns the file name (last component), if any.
    pub fn file_name(&self) -> Option<&str> {
        self.absolute.file_name().and_then(|name| name.to_str())
    }
}

/// Collapses `.` and `..` components without touching the file system.
///
/// `..` never climbs above the root.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
            Component::RootDir => normalized.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if normalized.file_name().is_some() {
                    normalized.pop();
                } else if !normalized.has_root() {
                    normalized.push("..");
                }
            }
            Component::Normal(part) => normalized.push(part),
        }
    }
    normalized
}

impl PartialEq for RequestPath {
    fn eq(&self, other: &Self) -> bool {
        self.absolute == other.absolute
    }
}

impl Eq for RequestPath {}

impl Hash for RequestPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.absolute.hash(state);
    }
}

impl fmt::Debug for RequestPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestPath({:?})", self.absolute)
    }
}

impl fmt::Display for RequestPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.relative)
    }
}

impl AsRef<Path> for RequestPath {
    fn as_ref(&self) -> &Path {
        &self.absolute
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_normalize_collapses_dots() {
        let path = normalize(Path::new("/a/./b/../c"));
        assert_eq!(path, PathBuf::from("/a/c"));
    }

    #[test]
    fn test_normalize_parent_at_root() {
        let path = normalize(Path::new("/../a"));
        assert_eq!(path, PathBuf::from("/a"));
    }

    #[test]
    fn test_from_root_equality() {
        let a = RequestPath::from_root("/root", "x/y.bin").unwrap();
        let b = RequestPath::from_root("/root/x", "./y.bin").unwrap();
        assert_eq!(a, b);
        assert_ne!(a.relative_path(), b.relative_path());
    }

    #[test]
    fn test_hash_uses_absolute_form() {
        let mut set = HashSet::new();
        set.insert(RequestPath::from_root("/root", "x/../y").unwrap());
        assert!(set.contains(&RequestPath::from_root("/root", "y").unwrap()));
    }

    #[test]
    fn test_empty_rejected() {
        assert!(matches!(RequestPath::new(""), Err(Error::InvalidPath(_))));
        assert!(RequestPath::from_root("/root", "").is_err());
    }

    #[test]
    fn test_nul_rejected() {
        assert!(RequestPath::new("a\0b").is_err());
    }

    #[test]
    fn test_relative_resolves_against_cwd() {
        let path = RequestPath::new("some/file.txt").unwrap();
        assert!(path.absolute_path().is_absolute());
        assert_eq!(path.file_name(), Some("file.txt"));
        assert_eq!(path.to_string(), "some/file.txt");
    }

    #[test]
    fn test_is_under() {
        let path = RequestPath::from_root("/drive/a", "b.txt").unwrap();
        assert!(path.is_under(Path::new("/drive")));
        assert!(!path.is_under(Path::new("/other")));
    }

    #[test]
    fn test_from_absolute_requires_absolute() {
        assert!(RequestPath::from_absolute("relative/path").is_err());
        assert!(RequestPath::from_absolute("/abs/path").is_ok());
    }
}
