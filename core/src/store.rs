//! On-disk AI reference store: component registry, script index and
//! per-file mini records under `<project>/.ai_reference/`.
//!
//! Writes are per-file and serialised by the owning engine's per-project
//! write lock. Readers tolerate a missing or half-written mini record (cache
//! miss); top-level documents are retried once before reporting a stale
//! snapshot. Persisted maps are `BTreeMap`s so that re-serialising an
//! unchanged index reproduces identical bytes.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::LibrarianError;
use crate::error::Result;

pub const AI_REF_DIR: &str = ".ai_reference";
pub const INDEX_VERSION: &str = "0.1.0";

const README: &str = "# AI Librarian

This directory contains the librarian reference system for this project.
It helps AI assistants understand and navigate the codebase.

## Structure

- `component_registry.json` - Registry of all code components
- `script_index.json` - Index of all script files
- `scripts/` - Mini records for individual scripts
- `diagnostics/` - Diagnostic reports and the execution trace

The index is maintained automatically by the librarian server; changes to
the codebase are tracked in the background.
";

const DIAGNOSTICS_README: &str = "# Diagnostics

Diagnostic reports and the execution trace for the librarian index.
";

/// A class or function known to the index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Component {
    #[serde(rename = "type")]
    pub kind: ComponentKind,
    /// Project-relative defining file, forward slashes.
    pub file: String,
    #[serde(default)]
    pub references: Vec<String>,
    /// Cross-reference edges written by the reference builder. Kept opaque
    /// here: the edge schema is owned by the builder, this store only
    /// persists it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_references: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_references_summary: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Class,
    Function,
}

impl ComponentKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Function => "function",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentRegistry {
    pub version: String,
    pub components: BTreeMap<String, Component>,
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION.to_string(),
            components: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScriptIndexEntry {
    pub path: String,
    pub classes: Vec<String>,
    pub functions: Vec<String>,
    /// Location of this file's mini record, relative to `scripts/`.
    pub mini_librarian: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScriptIndex {
    pub version: String,
    pub files: BTreeMap<String, ScriptIndexEntry>,
}

impl Default for ScriptIndex {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION.to_string(),
            files: BTreeMap::new(),
        }
    }
}

/// Per-file extracted index document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MiniRecord {
    pub file_path: String,
    pub classes: Vec<String>,
    pub functions: Vec<String>,
    pub imports: Vec<String>,
    pub description: String,
}

/// Handle on one project's `.ai_reference/` directory.
#[derive(Debug, Clone)]
pub struct IndexStore {
    project_root: PathBuf,
}

impl IndexStore {
    pub fn new(project_root: &Path) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
        }
    }

    pub fn ai_ref_path(&self) -> PathBuf {
        self.project_root.join(AI_REF_DIR)
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.ai_ref_path().join("scripts")
    }

    pub fn diagnostics_dir(&self) -> PathBuf {
        self.ai_ref_path().join("diagnostics")
    }

    pub fn is_initialized(&self) -> bool {
        self.ai_ref_path().is_dir()
    }

    /// Create the reference skeleton. Idempotent; failing to create the
    /// top-level directory is fatal.
    pub fn ensure_layout(&self) -> Result<()> {
        let ai_ref = self.ai_ref_path();
        fs::create_dir_all(&ai_ref)
            .map_err(|e| LibrarianError::Fatal(format!("creating {}: {e}", ai_ref.display())))?;
        for sub in ["scripts", "diagnostics", "edit_bookmarks", "tool_references"] {
            fs::create_dir_all(ai_ref.join(sub))?;
        }
        let readme = ai_ref.join("README.md");
        if !readme.exists() {
            fs::write(readme, README)?;
        }
        let diag_readme = self.diagnostics_dir().join("README.md");
        if !diag_readme.exists() {
            fs::write(diag_readme, DIAGNOSTICS_README)?;
        }
        if !ai_ref.join("component_registry.json").exists() {
            self.save_registry(&ComponentRegistry::default())?;
        }
        if !ai_ref.join("script_index.json").exists() {
            self.save_script_index(&ScriptIndex::default())?;
        }
        Ok(())
    }

    pub fn load_registry(&self) -> Result<ComponentRegistry> {
        let doc: ComponentRegistry =
            read_json_retry(&self.ai_ref_path().join("component_registry.json"))?;
        check_version(&doc.version, "component_registry.json")?;
        Ok(doc)
    }

    pub fn save_registry(&self, registry: &ComponentRegistry) -> Result<()> {
        write_json(
            &self.ai_ref_path().join("component_registry.json"),
            registry,
        )
    }

    pub fn load_script_index(&self) -> Result<ScriptIndex> {
        let doc: ScriptIndex = read_json_retry(&self.ai_ref_path().join("script_index.json"))?;
        check_version(&doc.version, "script_index.json")?;
        Ok(doc)
    }

    pub fn save_script_index(&self, index: &ScriptIndex) -> Result<()> {
        write_json(&self.ai_ref_path().join("script_index.json"), index)
    }

    /// Mini-record file name for a project-relative path: `/` and `.` are
    /// flattened to `_`, so `pkg/a.py` becomes `pkg_a_py.json`.
    pub fn mini_record_name(rel_path: &str) -> String {
        format!("{}.json", rel_path.replace(['/', '.'], "_"))
    }

    pub fn write_mini_record(&self, record: &MiniRecord) -> Result<String> {
        let name = Self::mini_record_name(&record.file_path);
        let path = self.scripts_dir().join(&name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_json(&path, record)?;
        Ok(format!("scripts/{name}"))
    }

    /// Missing or half-written mini records are a cache miss, not an error.
    pub fn read_mini_record(&self, rel_path: &str) -> Option<MiniRecord> {
        let path = self.scripts_dir().join(Self::mini_record_name(rel_path));
        let content = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::warn!("discarding unreadable mini record {}: {err}", path.display());
                None
            }
        }
    }

    pub fn remove_mini_record(&self, rel_path: &str) {
        let path = self.scripts_dir().join(Self::mini_record_name(rel_path));
        if let Err(err) = fs::remove_file(&path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("removing mini record {}: {err}", path.display());
            }
        }
    }

    /// Persist a diagnostic report under `diagnostics/` and return its path.
    pub fn write_diagnostic_report(&self, report: &str) -> Result<PathBuf> {
        fs::create_dir_all(self.diagnostics_dir())?;
        let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
        let path = self
            .diagnostics_dir()
            .join(format!("diagnostic-report-{stamp}.txt"));
        fs::write(&path, report)?;
        Ok(path)
    }
}

/// Major-version gate: documents from an unknown major version are refused.
pub fn check_version(version: &str, what: &str) -> Result<()> {
    let major = version.split('.').next().unwrap_or("");
    let expected = INDEX_VERSION.split('.').next().unwrap_or("");
    if major == expected {
        Ok(())
    } else {
        tracing::error!("{what}: unsupported version {version}");
        Err(LibrarianError::InvalidState(format!(
            "{what} has unsupported version {version}"
        )))
    }
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_string_pretty(value)?;
    fs::write(path, body)?;
    Ok(())
}

/// Read a JSON document, retrying once on a malformed body (an in-progress
/// write by another process). A second failure is a stale snapshot.
pub fn read_json_retry<T: DeserializeOwned>(path: &Path) -> Result<T> {
    for attempt in 0..2 {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LibrarianError::NotFound(format!("{}", path.display()))
            } else {
                LibrarianError::Io(e)
            }
        })?;
        match serde_json::from_str(&content) {
            Ok(value) => return Ok(value),
            Err(err) if attempt == 0 => {
                tracing::warn!("retrying inconsistent read of {}: {err}", path.display());
                thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                return Err(LibrarianError::StaleSnapshot(format!(
                    "{}: {err}",
                    path.display()
                )));
            }
        }
    }
    unreachable!("read_json_retry loop always returns")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn layout_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store.ensure_layout().unwrap();
        store.ensure_layout().unwrap();

        assert!(store.ai_ref_path().join("README.md").exists());
        assert!(store.ai_ref_path().join("component_registry.json").exists());
        assert!(store.ai_ref_path().join("script_index.json").exists());
        assert!(store.scripts_dir().is_dir());
        assert!(store.diagnostics_dir().is_dir());
    }

    #[test]
    fn mini_record_round_trip() {
        let dir = tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store.ensure_layout().unwrap();

        let record = MiniRecord {
            file_path: "pkg/a.py".to_string(),
            classes: vec!["Foo".to_string()],
            functions: vec!["bar".to_string()],
            imports: vec!["os".to_string()],
            description: "Mini record for pkg/a.py".to_string(),
        };
        let rel = store.write_mini_record(&record).unwrap();
        assert_eq!(rel, "scripts/pkg_a_py.json");

        let loaded = store.read_mini_record("pkg/a.py").unwrap();
        assert_eq!(loaded, record);

        store.remove_mini_record("pkg/a.py");
        assert!(store.read_mini_record("pkg/a.py").is_none());
    }

    #[test]
    fn half_written_mini_record_is_a_cache_miss() {
        let dir = tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store.ensure_layout().unwrap();
        fs::write(store.scripts_dir().join("a_py.json"), "{\"file_path\": \"a").unwrap();
        assert!(store.read_mini_record("a.py").is_none());
    }

    #[test]
    fn unknown_major_version_is_refused() {
        let dir = tempdir().unwrap();
        let store = IndexStore::new(dir.path());
        store.ensure_layout().unwrap();
        fs::write(
            store.ai_ref_path().join("script_index.json"),
            "{\"version\": \"9.0.0\", \"files\": {}}",
        )
        .unwrap();
        let err = store.load_script_index().unwrap_err();
        assert_eq!(err.kind(), "invalid_state");
    }

    #[test]
    fn registry_serialisation_is_stable() {
        let mut registry = ComponentRegistry::default();
        registry.components.insert(
            "Foo".to_string(),
            Component {
                kind: ComponentKind::Class,
                file: "a.py".to_string(),
                references: Vec::new(),
                tool_references: Vec::new(),
                tool_references_summary: None,
            },
        );
        let first = serde_json::to_string_pretty(&registry).unwrap();
        let second = serde_json::to_string_pretty(&registry).unwrap();
        assert_eq!(first, second);
    }
}
