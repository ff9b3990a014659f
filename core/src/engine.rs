//! Index engine: owns the in-memory per-project state and orchestrates the
//! scanner, parser and index store to build and query the AI reference.
//!
//! All mutating operations take the coarse state lock in write mode, so
//! within a project they are totally ordered; readers clone a snapshot.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::LibrarianError;
use crate::error::Result;
use crate::parser::SourceParser;
use crate::paths::AllowedRoots;
use crate::paths::to_rel_slash;
use crate::scanner;
use crate::store::Component;
use crate::store::ComponentKind;
use crate::store::ComponentRegistry;
use crate::store::IndexStore;
use crate::store::MiniRecord;
use crate::store::ScriptIndex;
use crate::store::ScriptIndexEntry;

/// Extensions searched by `find_implementation` when no file pattern is given.
const DEFAULT_SEARCH_EXTENSIONS: &[&str] =
    &["py", "js", "ts", "java", "c", "cpp", "cs", "go", "rb", "php"];

/// Lines of context either side of a match in `find_implementation`.
const SEARCH_CONTEXT_LINES: usize = 3;

/// In-memory state for one active project.
#[derive(Debug, Clone, Default)]
pub struct ProjectState {
    pub script_index: ScriptIndex,
    pub registry: ComponentRegistry,
    pub indexed_files: HashMap<PathBuf, SystemTime>,
    /// Seconds since the epoch of the last monitor check.
    pub last_check: f64,
}

#[derive(Debug)]
struct EngineState {
    allowed_roots: AllowedRoots,
    projects: RwLock<HashMap<PathBuf, ProjectState>>,
    paused: AtomicBool,
}

/// Cheaply cloneable handle on the engine state.
#[derive(Debug, Clone)]
pub struct IndexEngine {
    state: Arc<EngineState>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RefreshSummary {
    pub files_indexed: usize,
    pub components_identified: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHit {
    pub file_path: String,
    pub component_type: String,
    pub line_range: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchMatch {
    pub file: String,
    pub matches: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelatedFile {
    pub path: String,
    pub relationship: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub import_statement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
}

impl RelatedFile {
    fn plain(path: &str, relationship: &str) -> Self {
        Self {
            path: path.to_string(),
            relationship: relationship.to_string(),
            import_statement: None,
            class_name: None,
            function_name: None,
        }
    }
}

/// Related files grouped by relationship category.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RelatedFiles {
    pub imports: Vec<RelatedFile>,
    pub imported_by: Vec<RelatedFile>,
    pub name_related: Vec<RelatedFile>,
    pub package_related: Vec<RelatedFile>,
    pub class_references: Vec<RelatedFile>,
    pub function_calls: Vec<RelatedFile>,
}

impl RelatedFiles {
    pub fn total(&self) -> usize {
        self.imports.len()
            + self.imported_by.len()
            + self.name_related.len()
            + self.package_related.len()
            + self.class_references.len()
            + self.function_calls.len()
    }

    pub fn unique_paths(&self) -> usize {
        let mut seen = std::collections::BTreeSet::new();
        for group in [
            &self.imports,
            &self.imported_by,
            &self.name_related,
            &self.package_related,
            &self.class_references,
            &self.function_calls,
        ] {
            for item in group {
                seen.insert(item.path.clone());
            }
        }
        seen.len()
    }
}

fn epoch_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn new_component(kind: ComponentKind, file: &str) -> Component {
    Component {
        kind,
        file: file.to_string(),
        references: Vec::new(),
        tool_references: Vec::new(),
        tool_references_summary: None,
    }
}

impl IndexEngine {
    pub fn new(allowed_roots: AllowedRoots) -> Self {
        Self {
            state: Arc::new(EngineState {
                allowed_roots,
                projects: RwLock::new(HashMap::new()),
                paused: AtomicBool::new(false),
            }),
        }
    }

    pub fn allowed_roots(&self) -> &AllowedRoots {
        &self.state.allowed_roots
    }

    pub fn pause_monitoring(&self) {
        self.state.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume_monitoring(&self) {
        self.state.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused.load(Ordering::SeqCst)
    }

    pub async fn active_projects(&self) -> Vec<PathBuf> {
        self.state.projects.read().await.keys().cloned().collect()
    }

    pub async fn is_active(&self, root: &Path) -> bool {
        self.state.projects.read().await.contains_key(root)
    }

    pub async fn remove_project(&self, root: &Path) {
        self.state.projects.write().await.remove(root);
    }

    pub async fn project_counts(&self, root: &Path) -> Option<(usize, usize)> {
        self.state
            .projects
            .read()
            .await
            .get(root)
            .map(|p| (p.indexed_files.len(), p.registry.components.len()))
    }

    /// Monitor throttle: has it been at least `interval` seconds since the
    /// last check of this project?
    pub async fn needs_check(&self, root: &Path, interval: f64) -> bool {
        let projects = self.state.projects.read().await;
        match projects.get(root) {
            Some(state) => epoch_now() - state.last_check >= interval,
            None => false,
        }
    }

    pub async fn touch_last_check(&self, root: &Path) {
        if let Some(state) = self.state.projects.write().await.get_mut(root) {
            state.last_check = epoch_now();
        }
    }

    pub async fn last_update_epochs(&self) -> BTreeMap<String, f64> {
        self.state
            .projects
            .read()
            .await
            .iter()
            .map(|(path, state)| (path.to_string_lossy().into_owned(), state.last_check))
            .collect()
    }

    /// Create the reference skeleton, run a full reindex, register the
    /// project for monitoring and return a diagnostic summary.
    pub async fn initialize(&self, root: &Path) -> Result<String> {
        if !root.is_dir() {
            return Err(LibrarianError::NotFound(format!(
                "directory does not exist: {}",
                root.display()
            )));
        }
        let store = IndexStore::new(root);
        store.ensure_layout()?;
        let summary = self.reindex(root).await?;
        let report = self.diagnostics(root).await?;
        Ok(format!(
            "Successfully initialized librarian index at {}\n\n\
             - {} files indexed\n\
             - {} components identified\n\n\
             Project is now being monitored for changes.\n\n{}",
            store.ai_ref_path().display(),
            summary.files_indexed,
            summary.components_identified,
            report
        ))
    }

    /// Refresh an already-initialized project and return a summary message.
    pub async fn generate(&self, root: &Path) -> Result<String> {
        let summary = self.reindex(root).await?;
        let report = self.diagnostics(root).await?;
        Ok(format!(
            "Successfully generated librarian index for {}:\n\
             - {} files indexed\n\
             - {} components identified\n\n{}",
            root.display(),
            summary.files_indexed,
            summary.components_identified,
            report
        ))
    }

    /// Rescan the project, reparse changed files, purge vanished ones and
    /// rebuild the component registry from the union of all mini records.
    pub async fn reindex(&self, root: &Path) -> Result<RefreshSummary> {
        let store = IndexStore::new(root);
        if !store.is_initialized() {
            return Err(LibrarianError::InvalidState(format!(
                "librarian index not initialized at {}; run initialize_librarian first",
                root.display()
            )));
        }

        let mut projects = self.state.projects.write().await;
        let previous = projects.remove(root).unwrap_or_default();

        let scanned = scanner::scan_project(root);
        let mut parser = SourceParser::new()?;
        let mut script_index = ScriptIndex::default();
        let mut indexed_files = HashMap::with_capacity(scanned.len());

        for file in &scanned {
            let rel = to_rel_slash(root, &file.path);
            indexed_files.insert(file.path.clone(), file.modified);

            let unchanged = previous.indexed_files.get(&file.path) == Some(&file.modified);
            if unchanged {
                if let Some(entry) = previous.script_index.files.get(&rel) {
                    script_index.files.insert(rel, entry.clone());
                    continue;
                }
            }

            let content = match fs::read_to_string(&file.path) {
                Ok(content) => content,
                Err(err) => {
                    tracing::warn!("skipping unreadable file {}: {err}", file.path.display());
                    String::new()
                }
            };
            let outline = parser.parse_outline(&content);
            let record = MiniRecord {
                file_path: rel.clone(),
                classes: outline.classes.clone(),
                functions: outline.functions.clone(),
                imports: outline.imports,
                description: format!("Mini record for {rel}"),
            };
            let mini_librarian = match store.write_mini_record(&record) {
                Ok(location) => location,
                Err(err) => {
                    tracing::warn!("failed to write mini record for {rel}: {err}");
                    continue;
                }
            };
            script_index.files.insert(
                rel.clone(),
                ScriptIndexEntry {
                    path: rel,
                    classes: outline.classes,
                    functions: outline.functions,
                    mini_librarian,
                },
            );
        }

        // One logical deletion pass for files the scanner no longer sees.
        for rel in previous.script_index.files.keys() {
            if !script_index.files.contains_key(rel) {
                store.remove_mini_record(rel);
            }
        }

        let mut registry = ComponentRegistry::default();
        for (rel, entry) in &script_index.files {
            for class in &entry.classes {
                registry
                    .components
                    .insert(class.clone(), new_component(ComponentKind::Class, rel));
            }
            for function in &entry.functions {
                registry
                    .components
                    .insert(function.clone(), new_component(ComponentKind::Function, rel));
            }
        }

        store.save_script_index(&script_index)?;
        store.save_registry(&registry)?;

        let summary = RefreshSummary {
            files_indexed: script_index.files.len(),
            components_identified: registry.components.len(),
        };
        projects.insert(
            root.to_path_buf(),
            ProjectState {
                script_index,
                registry,
                indexed_files,
                last_check: epoch_now(),
            },
        );
        Ok(summary)
    }

    /// A consistent snapshot of the script index: the in-memory copy when
    /// the project is active, the on-disk document otherwise.
    async fn script_index_snapshot(&self, root: &Path) -> Result<ScriptIndex> {
        if let Some(state) = self.state.projects.read().await.get(root) {
            return Ok(state.script_index.clone());
        }
        let store = IndexStore::new(root);
        if !store.is_initialized() {
            return Err(LibrarianError::InvalidState(format!(
                "librarian index not initialized at {}; run initialize_librarian first",
                root.display()
            )));
        }
        store.load_script_index()
    }

    /// Locate every definition of `name`, re-parse each defining file for
    /// the exact line range and return the source slices.
    pub async fn query_component(&self, root: &Path, name: &str) -> Result<Vec<ComponentHit>> {
        let script_index = self.script_index_snapshot(root).await?;
        let mut parser = SourceParser::new()?;
        let mut hits = Vec::new();

        for (rel, entry) in &script_index.files {
            let declares = entry.classes.iter().any(|c| c == name)
                || entry.functions.iter().any(|f| f == name);
            if !declares {
                continue;
            }
            let full_path = root.join(rel);
            let content = match fs::read_to_string(&full_path) {
                Ok(content) => content,
                Err(err) => {
                    tracing::warn!("cannot read {}: {err}", full_path.display());
                    continue;
                }
            };
            let Some(span) = parser.definition_span(&content, name) else {
                continue;
            };
            let lines: Vec<&str> = content.lines().collect();
            let end = span.end_line.min(lines.len());
            let code = lines[span.start_line - 1..end].join("\n");
            hits.push(ComponentHit {
                file_path: rel.clone(),
                component_type: span.kind.as_str().to_string(),
                line_range: format!("{}-{}", span.start_line, span.end_line),
                code,
            });
        }

        if hits.is_empty() {
            return Err(LibrarianError::NotFound(format!(
                "component '{name}' not found in the project"
            )));
        }
        Ok(hits)
    }

    /// Case-insensitive substring search over in-scope files, with three
    /// lines of context either side and the matching line marked.
    pub async fn find_implementation(
        &self,
        root: &Path,
        search_text: &str,
        file_pattern: Option<&str>,
    ) -> Result<Vec<SearchMatch>> {
        let extensions = match file_pattern {
            Some(pattern) => vec![extension_of_pattern(pattern)],
            None => DEFAULT_SEARCH_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };
        let ext_refs: Vec<&str> = extensions.iter().map(String::as_str).collect();
        let needle = search_text.to_lowercase();
        let mut results = Vec::new();

        for file in scanner::scan_files(root, &ext_refs) {
            let Ok(content) = fs::read_to_string(&file.path) else {
                continue; // binary or unreadable
            };
            if !content.to_lowercase().contains(&needle) {
                continue;
            }
            let lines: Vec<&str> = content.lines().collect();
            let mut matches = Vec::new();
            for (i, line) in lines.iter().enumerate() {
                if !line.to_lowercase().contains(&needle) {
                    continue;
                }
                let start = i.saturating_sub(SEARCH_CONTEXT_LINES);
                let end = (i + SEARCH_CONTEXT_LINES + 1).min(lines.len());
                let mut context = Vec::with_capacity(end - start);
                for (j, text) in lines.iter().enumerate().take(end).skip(start) {
                    let marker = if j == i { '*' } else { ' ' };
                    context.push(format!("{:4}{} {}", j + 1, marker, text));
                }
                matches.push(context.join("\n"));
            }
            if !matches.is_empty() {
                results.push(SearchMatch {
                    file: to_rel_slash(root, &file.path),
                    matches,
                });
            }
        }
        Ok(results)
    }

    /// Find files related to `file_path` through imports, naming, package
    /// membership and class/function references in either direction.
    pub async fn find_related_files(&self, root: &Path, file_path: &Path) -> Result<RelatedFiles> {
        let full_path = if file_path.is_absolute() {
            file_path.to_path_buf()
        } else {
            root.join(file_path)
        };
        if !full_path.is_file() {
            return Err(LibrarianError::NotFound(format!(
                "file not found: {}",
                full_path.display()
            )));
        }

        let script_index = self.script_index_snapshot(root).await?;
        let store = IndexStore::new(root);
        let target_rel = to_rel_slash(root, &full_path);
        let mut parser = SourceParser::new()?;

        // Target structure: from the index when present, parsed directly
        // otherwise (the file may be new and not yet indexed).
        let (target_classes, target_functions, target_imports) =
            match script_index.files.get(&target_rel) {
                Some(entry) => {
                    let imports = store
                        .read_mini_record(&target_rel)
                        .map(|r| r.imports)
                        .unwrap_or_default();
                    (entry.classes.clone(), entry.functions.clone(), imports)
                }
                None => {
                    let content = fs::read_to_string(&full_path).unwrap_or_default();
                    let outline = parser.parse_outline(&content);
                    (outline.classes, outline.functions, outline.imports)
                }
            };
        let target_content = fs::read_to_string(&full_path).unwrap_or_default();
        let target_module = module_name(&target_rel);
        let target_stem = file_stem(&target_rel);

        let mut related = RelatedFiles::default();

        for (rel, entry) in &script_index.files {
            if rel == &target_rel {
                continue;
            }

            if dir_of(rel) == dir_of(&target_rel) {
                related
                    .package_related
                    .push(RelatedFile::plain(rel, "same_package"));
            }

            let stem = file_stem(rel);
            if stem.contains(&target_stem) || target_stem.contains(&stem) {
                related
                    .name_related
                    .push(RelatedFile::plain(rel, "similar_name"));
            }

            let other_imports = store
                .read_mini_record(rel)
                .map(|r| r.imports)
                .unwrap_or_default();

            if let Some(stmt) = import_matching(&other_imports, &target_module) {
                related.imports.push(RelatedFile {
                    import_statement: Some(stmt),
                    ..RelatedFile::plain(rel, "imports_target")
                });
            }
            let other_module = module_name(rel);
            if let Some(stmt) = import_matching(&target_imports, &other_module) {
                related.imported_by.push(RelatedFile {
                    import_statement: Some(stmt),
                    ..RelatedFile::plain(rel, "imported_by_target")
                });
            }

            let other_content = fs::read_to_string(root.join(rel)).unwrap_or_default();

            // References to the target's symbols from this file.
            for class in &target_classes {
                if symbol_referenced(&other_content, class, false) {
                    related.class_references.push(RelatedFile {
                        class_name: Some(class.clone()),
                        ..RelatedFile::plain(rel, "references_class")
                    });
                    break;
                }
            }
            for function in &target_functions {
                if symbol_referenced(&other_content, function, true) {
                    related.function_calls.push(RelatedFile {
                        function_name: Some(function.clone()),
                        ..RelatedFile::plain(rel, "calls_function")
                    });
                    break;
                }
            }

            // And the inverse: symbols this file defines that the target uses.
            if !related.class_references.iter().any(|r| &r.path == rel) {
                for class in &entry.classes {
                    if symbol_referenced(&target_content, class, false) {
                        related.class_references.push(RelatedFile {
                            class_name: Some(class.clone()),
                            ..RelatedFile::plain(rel, "references_class")
                        });
                        break;
                    }
                }
            }
            if !related.function_calls.iter().any(|r| &r.path == rel) {
                for function in &entry.functions {
                    if symbol_referenced(&target_content, function, true) {
                        related.function_calls.push(RelatedFile {
                            function_name: Some(function.clone()),
                            ..RelatedFile::plain(rel, "calls_function")
                        });
                        break;
                    }
                }
            }
        }

        Ok(related)
    }

    /// Compare the current scanner output with the recorded file set.
    pub async fn check_for_changes(&self, root: &Path) -> bool {
        let recorded = match self.state.projects.read().await.get(root) {
            Some(state) => state.indexed_files.clone(),
            None => return false,
        };
        let current = scanner::scan_project(root);
        if current.len() != recorded.len() {
            return true;
        }
        current
            .iter()
            .any(|f| recorded.get(&f.path) != Some(&f.modified))
    }

    /// Validate the on-disk invariants, persist a report under
    /// `diagnostics/` and return the report text.
    pub async fn diagnostics(&self, root: &Path) -> Result<String> {
        let store = IndexStore::new(root);
        let mut results = vec!["Librarian Diagnostic Report:".to_string()];

        if store.is_initialized() {
            results.push("[ok] .ai_reference directory exists".to_string());
        } else {
            results.push("[fail] .ai_reference directory not found".to_string());
            return Ok(results.join("\n"));
        }

        let script_index = match store.load_script_index() {
            Ok(index) => {
                results.push(format!(
                    "[ok] script index found with {} files",
                    index.files.len()
                ));
                Some(index)
            }
            Err(err) => {
                results.push(format!("[fail] error reading script index: {err}"));
                None
            }
        };

        let registry = match store.load_registry() {
            Ok(registry) => {
                results.push(format!(
                    "[ok] component registry found with {} components",
                    registry.components.len()
                ));
                Some(registry)
            }
            Err(err) => {
                results.push(format!("[fail] error reading component registry: {err}"));
                None
            }
        };

        if let (Some(index), Some(registry)) = (&script_index, &registry) {
            let mut broken = 0usize;
            for (name, component) in &registry.components {
                let consistent = index.files.get(&component.file).is_some_and(|entry| {
                    entry.classes.iter().any(|c| c == name)
                        || entry.functions.iter().any(|f| f == name)
                });
                if !consistent {
                    broken += 1;
                }
            }
            if broken == 0 {
                results.push("[ok] registry and script index are consistent".to_string());
            } else {
                results.push(format!(
                    "[fail] {broken} components missing from the script index"
                ));
            }

            let mut missing_records = 0usize;
            for rel in index.files.keys() {
                if store.read_mini_record(rel).is_none() {
                    missing_records += 1;
                }
            }
            if missing_records == 0 {
                results.push(format!(
                    "[ok] mini records cover all {} indexed files",
                    index.files.len()
                ));
            } else {
                results.push(format!("[fail] {missing_records} mini records missing"));
            }
        }

        if self.is_active(root).await {
            results.push("[ok] project is actively monitored for changes".to_string());
        } else {
            results.push("[warn] project is not in the active monitoring set".to_string());
        }

        let passed = results.iter().filter(|l| l.starts_with("[ok]")).count();
        let warnings = results.iter().filter(|l| l.starts_with("[warn]")).count();
        let errors = results.iter().filter(|l| l.starts_with("[fail]")).count();
        results.push(format!(
            "\nDiagnostic Summary: {passed} checks passed, {warnings} warnings, {errors} errors"
        ));

        let report = results.join("\n");
        if let Err(err) = store.write_diagnostic_report(&report) {
            tracing::warn!("failed to persist diagnostic report: {err}");
        }
        Ok(report)
    }
}

fn extension_of_pattern(pattern: &str) -> String {
    if let Some(ext) = pattern.rsplit("*.").next().filter(|_| pattern.contains("*.")) {
        ext.to_string()
    } else {
        pattern.trim_start_matches('.').to_string()
    }
}

fn dir_of(rel: &str) -> &str {
    rel.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

fn file_stem(rel: &str) -> String {
    let name = rel.rsplit('/').next().unwrap_or(rel);
    name.rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(name)
        .to_string()
}

fn module_name(rel: &str) -> String {
    rel.rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(rel)
        .replace('/', ".")
}

/// Does any import statement target the given module: exactly, by importing
/// a symbol out of it (`module.symbol`), or by its trailing segment
/// (`pkg.module`)?
fn import_matching(imports: &[String], module: &str) -> Option<String> {
    if module.is_empty() {
        return None;
    }
    let basename = module.rsplit('.').next().unwrap_or(module);
    let suffix = format!(".{basename}");
    let prefix = format!("{module}.");
    imports
        .iter()
        .find(|imp| imp.as_str() == module || imp.starts_with(&prefix) || imp.ends_with(&suffix))
        .cloned()
}

/// Textual reference check: the symbol appears in a call/use position, not
/// just as a substring of a longer identifier.
fn symbol_referenced(content: &str, symbol: &str, call_only: bool) -> bool {
    if !content.contains(symbol) {
        return false;
    }
    let escaped = regex::escape(symbol);
    let pattern = if call_only {
        format!(r#"[(\s=."']{escaped}\s*\("#)
    } else {
        format!(r#"[(\s=."']{escaped}[\s(."']"#)
    };
    regex::Regex::new(&pattern)
        .map(|re| re.is_match(content))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn engine_for(dir: &Path) -> IndexEngine {
        IndexEngine::new(AllowedRoots::new(vec![dir.to_path_buf()]))
    }

    #[tokio::test]
    async fn initialize_reports_counts() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "class Foo: pass\ndef bar(): pass\n").unwrap();

        let engine = engine_for(dir.path());
        let report = engine.initialize(dir.path()).await.unwrap();
        assert!(report.contains("2 components identified"));
        assert!(report.contains("1 files indexed"));
    }

    #[tokio::test]
    async fn query_component_returns_line_range_and_code() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "class Foo: pass\ndef bar(): pass\n").unwrap();

        let engine = engine_for(dir.path());
        engine.initialize(dir.path()).await.unwrap();

        let hits = engine.query_component(dir.path(), "Foo").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_path, "a.py");
        assert_eq!(hits[0].component_type, "class");
        assert_eq!(hits[0].line_range, "1-1");
        assert_eq!(hits[0].code, "class Foo: pass");

        let err = engine
            .query_component(dir.path(), "Missing")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn reindex_is_idempotent_on_disk() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "def one(): pass\n").unwrap();
        fs::write(dir.path().join("b.py"), "class Two: pass\n").unwrap();

        let engine = engine_for(dir.path());
        engine.initialize(dir.path()).await.unwrap();

        let store = IndexStore::new(dir.path());
        let registry_1 = fs::read(store.ai_ref_path().join("component_registry.json")).unwrap();
        let index_1 = fs::read(store.ai_ref_path().join("script_index.json")).unwrap();

        engine.reindex(dir.path()).await.unwrap();
        let registry_2 = fs::read(store.ai_ref_path().join("component_registry.json")).unwrap();
        let index_2 = fs::read(store.ai_ref_path().join("script_index.json")).unwrap();

        assert_eq!(registry_1, registry_2);
        assert_eq!(index_1, index_2);
    }

    #[tokio::test]
    async fn reindex_purges_deleted_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "def gone(): pass\n").unwrap();
        fs::write(dir.path().join("b.py"), "def kept(): pass\n").unwrap();

        let engine = engine_for(dir.path());
        engine.initialize(dir.path()).await.unwrap();

        fs::remove_file(dir.path().join("a.py")).unwrap();
        engine.reindex(dir.path()).await.unwrap();

        let store = IndexStore::new(dir.path());
        let index = store.load_script_index().unwrap();
        assert!(!index.files.contains_key("a.py"));
        assert!(store.read_mini_record("a.py").is_none());

        let registry = store.load_registry().unwrap();
        assert!(!registry.components.contains_key("gone"));
        assert!(registry.components.contains_key("kept"));
    }

    #[tokio::test]
    async fn find_implementation_marks_matching_lines() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "def greet():\n    pass\n").unwrap();
        fs::write(dir.path().join("b.py"), "x = \"greet(\"\n").unwrap();

        let engine = engine_for(dir.path());
        engine.initialize(dir.path()).await.unwrap();

        let results = engine
            .find_implementation(dir.path(), "greet", None)
            .await
            .unwrap();
        let mut files: Vec<&str> = results.iter().map(|r| r.file.as_str()).collect();
        files.sort();
        assert_eq!(files, vec!["a.py", "b.py"]);
        assert!(results.iter().all(|r| r.matches[0].contains("* ")));
    }

    #[tokio::test]
    async fn related_files_sees_function_calls_both_ways() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "def greet():\n    pass\n").unwrap();
        fs::write(dir.path().join("b.py"), "from a import greet\n\ngreet()\n").unwrap();

        let engine = engine_for(dir.path());
        engine.initialize(dir.path()).await.unwrap();

        // From the caller's side the defining file shows up as a call edge.
        let related = engine
            .find_related_files(dir.path(), Path::new("b.py"))
            .await
            .unwrap();
        let call = related
            .function_calls
            .iter()
            .find(|r| r.path == "a.py")
            .expect("a.py should be related through the greet call");
        assert_eq!(call.function_name.as_deref(), Some("greet"));

        // And the callee sees its caller.
        let related = engine
            .find_related_files(dir.path(), Path::new("a.py"))
            .await
            .unwrap();
        assert!(related.function_calls.iter().any(|r| r.path == "b.py"));
        assert!(related.imports.iter().any(|r| r.path == "b.py"));
    }

    #[tokio::test]
    async fn change_detection_notices_modified_files() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.py");
        fs::write(&file, "def first(): pass\n").unwrap();

        let engine = engine_for(dir.path());
        engine.initialize(dir.path()).await.unwrap();
        assert!(!engine.check_for_changes(dir.path()).await);

        fs::write(dir.path().join("new.py"), "def second(): pass\n").unwrap();
        assert!(engine.check_for_changes(dir.path()).await);
    }
}
