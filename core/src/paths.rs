//! Allowed-root policy and lexical path handling.
//!
//! The allowed-root list is the only access-control mechanism in the server:
//! a path argument is admissible iff it is lexically contained in one of the
//! roots after normalisation. The list is immutable after startup, so it can
//! be shared freely without a lock.

use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use crate::error::LibrarianError;
use crate::error::Result;

/// Immutable list of absolute directory paths the process may touch.
#[derive(Debug, Clone, Default)]
pub struct AllowedRoots {
    roots: Vec<PathBuf>,
}

impl AllowedRoots {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots: roots.into_iter().map(|r| normalize(&r)).collect(),
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Lexical containment check after normalisation. No file-system access.
    pub fn is_allowed(&self, path: &Path) -> bool {
        let normalized = normalize(path);
        self.roots.iter().any(|root| normalized.starts_with(root))
    }

    /// Validate a path argument, returning its normalised form.
    pub fn check(&self, path: &Path) -> Result<PathBuf> {
        let normalized = normalize(path);
        if self.roots.iter().any(|root| normalized.starts_with(root)) {
            Ok(normalized)
        } else {
            Err(LibrarianError::AccessDenied(normalized))
        }
    }
}

/// Absolutize against the current directory and resolve `.`/`..` lexically,
/// without touching the file system (symlinks are not followed on purpose:
/// containment is a lexical property).
pub fn normalize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(path)
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Project-relative path with forward slashes, as stored inside JSON
/// documents regardless of host OS.
pub fn to_rel_slash(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_resolves_dot_segments() {
        let p = normalize(Path::new("/a/b/../c/./d"));
        assert_eq!(p, PathBuf::from("/a/c/d"));
    }

    #[test]
    fn containment_is_lexical() {
        let roots = AllowedRoots::new(vec![PathBuf::from("/tmp/projects")]);
        assert!(roots.is_allowed(Path::new("/tmp/projects/p1/src")));
        assert!(roots.is_allowed(Path::new("/tmp/projects")));
        assert!(!roots.is_allowed(Path::new("/tmp/other")));
        // An escape through `..` is resolved before the check.
        assert!(!roots.is_allowed(Path::new("/tmp/projects/../secrets")));
    }

    #[test]
    fn check_returns_access_denied() {
        let roots = AllowedRoots::new(vec![PathBuf::from("/tmp/projects")]);
        let err = roots.check(Path::new("/etc/passwd")).unwrap_err();
        assert_eq!(err.kind(), "access_denied");
    }

    #[test]
    fn rel_slash_strips_root() {
        let root = Path::new("/tmp/p1");
        assert_eq!(to_rel_slash(root, Path::new("/tmp/p1/pkg/a.py")), "pkg/a.py");
    }
}
