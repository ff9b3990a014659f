//! Project scanner: enumerate in-scope source files with modification times.

use std::path::Path;
use std::path::PathBuf;
use std::time::SystemTime;

use walkdir::WalkDir;

/// Directory names that are never descended into, in addition to any
/// path segment starting with `.`.
pub const EXCLUDED_DIRS: &[&str] = &["venv", "env", "__pycache__", "node_modules", ".git"];

/// Extensions indexed by the librarian proper.
pub const SOURCE_EXTENSIONS: &[&str] = &["py"];

/// One file emitted by a scan.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub modified: SystemTime,
}

pub fn is_excluded_dir(name: &str) -> bool {
    name.starts_with('.') || EXCLUDED_DIRS.contains(&name)
}

/// Walk `root` recursively and emit every file whose extension is in `exts`.
/// Output order is file-system order; callers sort where ordering matters.
pub fn scan_files(root: &Path, exts: &[&str]) -> Vec<ScannedFile> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        !is_excluded_dir(&name)
    });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::debug!("scan skipped unreadable entry: {err}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| exts.contains(&e));
        if !matches {
            continue;
        }
        let Some(modified) = entry.metadata().ok().and_then(|m| m.modified().ok()) else {
            tracing::debug!("scan skipped {}: no modification time", path.display());
            continue;
        };
        files.push(ScannedFile {
            path: path.to_path_buf(),
            modified,
        });
    }

    files
}

/// Scan with the librarian's own extension set.
pub fn scan_project(root: &Path) -> Vec<ScannedFile> {
    scan_files(root, SOURCE_EXTENSIONS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn scans_python_files_only() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        fs::write(dir.path().join("b.txt"), "not code\n").unwrap();
        fs::create_dir(dir.path().join("pkg")).unwrap();
        fs::write(dir.path().join("pkg/c.py"), "y = 2\n").unwrap();

        let mut names: Vec<String> = scan_project(dir.path())
            .into_iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.py", "c.py"]);
    }

    #[test]
    fn skips_excluded_and_hidden_directories() {
        let dir = tempdir().unwrap();
        for sub in ["venv", "__pycache__", "node_modules", ".hidden"] {
            fs::create_dir(dir.path().join(sub)).unwrap();
            fs::write(dir.path().join(sub).join("mod.py"), "pass\n").unwrap();
        }
        fs::write(dir.path().join("keep.py"), "pass\n").unwrap();

        let files = scan_project(dir.path());
        assert_eq!(files.len(), 1);
        assert!(files[0].path.ends_with("keep.py"));
    }
}
