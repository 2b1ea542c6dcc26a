//! Source-to-destination path arithmetic.
//!
//! Everything here is purely lexical: paths are made absolute against the
//! current directory and `.`/`..` segments are folded away, but symlinks are
//! never resolved and the filesystem is never touched.

use std::path::{Path, PathBuf};

use path_absolutize::Absolutize;

use crate::error::{MirrorError, Result};

/// Normalize a path to an absolute, cleaned form.
pub fn normalize(path: &Path) -> Result<PathBuf> {
    Ok(path.absolutize()?.into_owned())
}

/// Map `path` under `source_root` to the same relative location under
/// `dest_root`.
///
/// Fails with [`MirrorError::InvalidPath`] when `path` does not lie under
/// `source_root` once both are normalized.
pub fn map_path(source_root: &Path, dest_root: &Path, path: &Path) -> Result<PathBuf> {
    let source_root = normalize(source_root)?;
    let dest_root = normalize(dest_root)?;
    let path = normalize(path)?;

    let relative = path
        .strip_prefix(&source_root)
        .map_err(|_| MirrorError::InvalidPath {
            path: path.clone(),
            root: source_root.clone(),
        })?;

    if relative.as_os_str().is_empty() {
        return Ok(dest_root);
    }
    Ok(dest_root.join(relative))
}

/// A source path paired with its mirrored destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapping {
    /// Absolute path under the source root.
    pub source: PathBuf,

    /// Absolute path under the destination root.
    pub dest: PathBuf,
}

impl PathMapping {
    /// Resolve the mapping for `path`.
    pub fn resolve(source_root: &Path, dest_root: &Path, path: &Path) -> Result<Self> {
        let dest = map_path(source_root, dest_root, path)?;
        Ok(Self {
            source: normalize(path)?,
            dest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_maps_nested_file() {
        let dest = map_path(
            Path::new("/src"),
            Path::new("/dst"),
            Path::new("/src/a/b.txt"),
        )
        .unwrap();
        assert_eq!(dest, PathBuf::from("/dst/a/b.txt"));
    }

    #[test]
    fn test_cleans_dot_segments() {
        let dest = map_path(
            Path::new("/src/./"),
            Path::new("/dst/x/.."),
            Path::new("/src/a/../c/./d.txt"),
        )
        .unwrap();
        assert_eq!(dest, PathBuf::from("/dst/c/d.txt"));
    }

    #[test]
    fn test_rejects_path_outside_root() {
        let err = map_path(
            Path::new("/src"),
            Path::new("/dst"),
            Path::new("/other/b.txt"),
        )
        .unwrap_err();
        assert!(matches!(err, MirrorError::InvalidPath { .. }));
    }

    #[test]
    fn test_rejects_escape_through_parent_segments() {
        let err = map_path(
            Path::new("/src"),
            Path::new("/dst"),
            Path::new("/src/../etc/passwd"),
        )
        .unwrap_err();
        assert!(matches!(err, MirrorError::InvalidPath { .. }));
    }

    #[test]
    fn test_sibling_with_shared_prefix_is_not_under_root() {
        // Component-wise comparison: "/srcfoo" is not inside "/src".
        let err = map_path(
            Path::new("/src"),
            Path::new("/dst"),
            Path::new("/srcfoo/a.txt"),
        )
        .unwrap_err();
        assert!(matches!(err, MirrorError::InvalidPath { .. }));
    }

    #[test]
    fn test_relative_inputs_resolve_against_cwd() {
        let cwd = std::env::current_dir().unwrap();
        let dest = map_path(
            Path::new("raw"),
            Path::new("processed"),
            Path::new("raw/x/y.bin"),
        )
        .unwrap();
        assert_eq!(dest, cwd.join("processed/x/y.bin"));
    }

    #[test]
    fn test_mapping_is_deterministic() {
        let a = PathMapping::resolve(
            Path::new("/src"),
            Path::new("/dst"),
            Path::new("/src/a/b.txt"),
        )
        .unwrap();
        let b = PathMapping::resolve(
            Path::new("/src"),
            Path::new("/dst"),
            Path::new("/src/a/b.txt"),
        )
        .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.source, PathBuf::from("/src/a/b.txt"));
    }
}
