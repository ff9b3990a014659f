//! Tool registry store: reads and writes `<project>/.tool_reference/`.
//!
//! The registry is built by introspecting the in-process tool catalog. A
//! plural-named alias directory (`.tools_reference`) also exists for hosts
//! that look it up under that name: it is created alongside a fresh
//! canonical directory, every write is mirrored into it, and when only the
//! alias survives it is treated as authoritative and copied back into the
//! canonical form.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use librarian_core::store::read_json_retry;
use librarian_core::store::write_json;

use crate::catalog::ToolSpec;
use crate::error::Result;
use crate::error::ToolRefError;
use crate::types::CategoriesDoc;
use crate::types::CategoryEntry;
use crate::types::DecisionBranch;
use crate::types::DecisionNode;
use crate::types::DecisionTree;
use crate::types::RelationshipGroup;
use crate::types::TOOLREF_VERSION;
use crate::types::TaskboardIntegration;
use crate::types::ToolProfile;
use crate::types::ToolRecord;
use crate::types::ToolRegistryDoc;

pub const TOOL_REF_DIR: &str = ".tool_reference";
pub const TOOL_REF_ALIAS_DIR: &str = ".tools_reference";

const README: &str = "# Tool Reference Catalog

Reference catalog of the tool surface exposed by the librarian server.

## Structure
- `registry.json` - Master index of all tools
- `categories.json` - Categorization of tools by purpose
- `tool_profiles/` - Detailed metadata for each tool
- `decision_trees/` - Node graphs for tool selection
- `ai_references/` - Cross-reference payloads written by the reference builder
";

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct InitSummary {
    pub tool_count: usize,
    pub profile_count: usize,
    pub relationship_count: usize,
    pub decision_tree_count: usize,
    pub category_count: usize,
}

#[derive(Debug, Clone)]
pub struct ToolReferenceStore {
    project_root: PathBuf,
}

impl ToolReferenceStore {
    pub fn new(project_root: &Path) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
        }
    }

    /// Canonical reference directory, adopting the plural alias when only
    /// the alias exists.
    pub fn dir(&self) -> PathBuf {
        let canonical = self.project_root.join(TOOL_REF_DIR);
        if canonical.is_dir() {
            return canonical;
        }
        let alias = self.alias_dir();
        if alias.is_dir() {
            tracing::info!(
                "adopting alias tool reference directory {}",
                alias.display()
            );
            if let Err(err) = copy_dir_recursive(&alias, &canonical) {
                tracing::warn!("failed to mirror alias directory: {err}");
            }
        }
        canonical
    }

    /// The plural-named mirror directory some hosts look up instead of the
    /// canonical singular form.
    pub fn alias_dir(&self) -> PathBuf {
        self.project_root.join(TOOL_REF_ALIAS_DIR)
    }

    /// Copy one just-written canonical file into the alias directory so the
    /// mirror never goes stale. A no-op when the alias does not exist or
    /// the path is outside the canonical tree.
    pub fn mirror_to_alias(&self, path: &Path) {
        let alias = self.alias_dir();
        if !alias.is_dir() {
            return;
        }
        let canonical = self.project_root.join(TOOL_REF_DIR);
        let Ok(rel) = path.strip_prefix(&canonical) else {
            return;
        };
        let target = alias.join(rel);
        if let Some(parent) = target.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                tracing::warn!("cannot create alias subdirectory: {err}");
                return;
            }
        }
        if let Err(err) = fs::copy(path, &target) {
            tracing::warn!("failed to mirror {} into alias: {err}", path.display());
        }
    }

    /// Re-copy the whole canonical tree into the alias, creating the alias
    /// if needed. Run on every initialize/update pass.
    fn sync_alias(&self) {
        let canonical = self.project_root.join(TOOL_REF_DIR);
        if !canonical.is_dir() {
            return;
        }
        if let Err(err) = copy_dir_recursive(&canonical, &self.alias_dir()) {
            tracing::warn!("failed to sync alias tool reference directory: {err}");
        }
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.dir().join("tool_profiles")
    }

    pub fn decision_trees_dir(&self) -> PathBuf {
        self.dir().join("decision_trees")
    }

    /// Cross-reference payload area owned by the reference builder.
    pub fn ai_references_dir(&self) -> PathBuf {
        self.dir().join("ai_references")
    }

    pub fn is_initialized(&self) -> bool {
        self.dir().join("registry.json").is_file()
    }

    /// Build the full on-disk layout from the in-process tool catalog.
    pub fn initialize(&self, catalog: &[ToolSpec]) -> Result<InitSummary> {
        let dir = self.dir();
        fs::create_dir_all(&dir)?;
        fs::create_dir_all(self.profiles_dir())?;
        fs::create_dir_all(self.decision_trees_dir())?;
        fs::create_dir_all(self.ai_references_dir())?;

        let mut tools = BTreeMap::new();
        let mut by_category: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for spec in catalog {
            tools.insert(
                spec.id.clone(),
                ToolRecord {
                    id: spec.id.clone(),
                    description: spec.description.clone(),
                    category: spec.category.clone(),
                    profile_path: format!("tool_profiles/{}.json", spec.id),
                    parameters_count: spec.parameters.len(),
                    has_profile: true,
                },
            );
            by_category
                .entry(spec.category.clone())
                .or_default()
                .push(spec.id.clone());
        }

        let registry = ToolRegistryDoc {
            version: TOOLREF_VERSION.to_string(),
            description: "Tool reference catalog for the librarian server".to_string(),
            last_updated: chrono::Utc::now().to_rfc3339(),
            tools,
            taskboard_integration: Some(default_taskboard_integration()),
        };
        write_json(&dir.join("registry.json"), &registry)?;

        let categories = CategoriesDoc {
            version: TOOLREF_VERSION.to_string(),
            description: "Tool categorization by purpose".to_string(),
            categories: by_category
                .iter()
                .map(|(category, tools)| {
                    (
                        category.clone(),
                        CategoryEntry {
                            name: category.clone(),
                            description: format!("Tools related to {category} operations"),
                            tools: tools.clone(),
                        },
                    )
                })
                .collect(),
        };
        write_json(&dir.join("categories.json"), &categories)?;

        let mut profile_count = 0usize;
        for spec in catalog {
            let profile = ToolProfile {
                tool_id: spec.id.clone(),
                category: spec.category.clone(),
                primary_purpose: spec.description.clone(),
                parameters: spec.parameters.clone(),
                return_type: spec.return_type.clone(),
                usage_examples: spec.usage_examples.clone(),
                always_use_when: Vec::new(),
                never_use_when: Vec::new(),
                component_references: Vec::new(),
                component_references_summary: None,
                fallback_profile: false,
            };
            self.save_profile(&profile)?;
            profile_count += 1;
        }

        let mut relationship_count = 0usize;
        for (category, tools) in &by_category {
            let group = RelationshipGroup {
                group_name: category.clone(),
                description: format!("Tools related to {category} operations"),
                tools: tools.clone(),
                common_sequences: if tools.len() > 1 {
                    vec![tools.clone()]
                } else {
                    Vec::new()
                },
            };
            write_json(&dir.join(format!("relationship_{category}.json")), &group)?;
            relationship_count += 1;
        }

        let tree = selection_tree(&by_category);
        write_json(
            &self.decision_trees_dir().join(format!("{}.json", tree.tree_id)),
            &tree,
        )?;

        let readme = dir.join("README.md");
        if !readme.exists() {
            fs::write(readme, README)?;
        }

        // The plural mirror tracks every initialize/update pass.
        self.sync_alias();

        Ok(InitSummary {
            tool_count: catalog.len(),
            profile_count,
            relationship_count,
            decision_tree_count: 1,
            category_count: by_category.len(),
        })
    }

    pub fn load_registry(&self) -> Result<ToolRegistryDoc> {
        let path = self.dir().join("registry.json");
        if !path.is_file() {
            return Err(ToolRefError::NotInitialized(format!(
                "no registry at {}; run initialize_tool_index first",
                path.display()
            )));
        }
        let doc: ToolRegistryDoc = read_json_retry(&path)?;
        let major = doc.version.split('.').next().unwrap_or("");
        let expected = TOOLREF_VERSION.split('.').next().unwrap_or("");
        if major != expected {
            tracing::error!("registry.json: unsupported version {}", doc.version);
            return Err(ToolRefError::UnsupportedVersion(doc.version));
        }
        Ok(doc)
    }

    pub fn save_registry(&self, registry: &ToolRegistryDoc) -> Result<()> {
        let path = self.dir().join("registry.json");
        write_json(&path, registry)?;
        self.mirror_to_alias(&path);
        Ok(())
    }

    pub fn profile_path(&self, tool_id: &str) -> PathBuf {
        self.profiles_dir().join(format!("{tool_id}.json"))
    }

    /// Load a tool's profile, synthesising a fallback when the registry
    /// knows the tool but its profile file is missing.
    pub fn load_profile(&self, tool_id: &str) -> Result<ToolProfile> {
        let registry = self.load_registry()?;
        if !registry.tools.contains_key(tool_id) {
            return Err(ToolRefError::NotFound(format!("tool: {tool_id}")));
        }
        let path = self.profile_path(tool_id);
        if !path.is_file() {
            tracing::info!("profile missing for {tool_id}, using fallback");
            return Ok(ToolProfile::fallback(tool_id));
        }
        Ok(read_json_retry(&path)?)
    }

    pub fn save_profile(&self, profile: &ToolProfile) -> Result<()> {
        fs::create_dir_all(self.profiles_dir())?;
        let path = self.profile_path(&profile.tool_id);
        write_json(&path, profile)?;
        self.mirror_to_alias(&path);
        Ok(())
    }

    pub fn load_categories(&self) -> Result<CategoriesDoc> {
        Ok(read_json_retry(&self.dir().join("categories.json"))?)
    }

    pub fn load_relationship_groups(&self) -> Vec<RelationshipGroup> {
        let mut groups = Vec::new();
        let Ok(entries) = fs::read_dir(self.dir()) else {
            return groups;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with("relationship_") || !name.ends_with(".json") {
                continue;
            }
            match read_json_retry::<RelationshipGroup>(&entry.path()) {
                Ok(group) => groups.push(group),
                Err(err) => tracing::warn!("skipping malformed {name}: {err}"),
            }
        }
        groups.sort_by(|a, b| a.group_name.cmp(&b.group_name));
        groups
    }

    pub fn load_decision_trees(&self) -> Vec<DecisionTree> {
        let mut trees = Vec::new();
        let Ok(entries) = fs::read_dir(self.decision_trees_dir()) else {
            return trees;
        };
        for entry in entries.flatten() {
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_json_retry::<DecisionTree>(&entry.path()) {
                Ok(tree) => trees.push(tree),
                Err(err) => {
                    tracing::warn!("skipping malformed tree {}: {err}", entry.path().display());
                }
            }
        }
        trees.sort_by(|a, b| a.tree_id.cmp(&b.tree_id));
        trees
    }

    /// Task-type routing table from the registry, if any. Errors collapse
    /// to `None`: the resolver has its own fallbacks.
    pub fn taskboard_mapping(&self) -> Option<BTreeMap<String, Vec<String>>> {
        match self.load_registry() {
            Ok(registry) => registry
                .taskboard_integration
                .map(|t| t.task_type_to_mini_librarian_mapping),
            Err(err) => {
                tracing::debug!("no taskboard mapping available: {err}");
                None
            }
        }
    }
}

/// Routing table seeded into every fresh registry.
pub fn default_taskboard_integration() -> TaskboardIntegration {
    let mut mapping = BTreeMap::new();
    mapping.insert(
        "component_analysis".to_string(),
        vec!["component-analyzer".to_string()],
    );
    mapping.insert(
        "find_usages".to_string(),
        vec!["file-indexer".to_string(), "component-analyzer".to_string()],
    );
    mapping.insert(
        "code_modification".to_string(),
        vec![
            "file-indexer".to_string(),
            "component-analyzer".to_string(),
            "code-modifier".to_string(),
        ],
    );
    mapping.insert("file_search".to_string(), vec!["file-indexer".to_string()]);
    mapping.insert(
        "todo_management".to_string(),
        vec!["todo-manager".to_string()],
    );
    mapping.insert(
        "diagnostics".to_string(),
        vec!["diagnostics-runner".to_string()],
    );
    mapping.insert(
        "tool_reference".to_string(),
        vec!["tool-indexer".to_string(), "reference-linker".to_string()],
    );
    mapping.insert(
        "deep_analysis".to_string(),
        vec!["component-analyzer".to_string()],
    );
    TaskboardIntegration {
        task_type_to_mini_librarian_mapping: mapping,
    }
}

fn selection_tree(by_category: &BTreeMap<String, Vec<String>>) -> DecisionTree {
    let mut nodes = Vec::new();
    let root_branches = by_category
        .keys()
        .map(|category| DecisionBranch {
            answer: category.clone(),
            tool: None,
            next: Some(format!("category_{category}")),
        })
        .collect();
    nodes.push(DecisionNode {
        id: "root".to_string(),
        question: "Which area does the task concern?".to_string(),
        branches: root_branches,
    });
    for (category, tools) in by_category {
        nodes.push(DecisionNode {
            id: format!("category_{category}"),
            question: format!("Which {category} operation is needed?"),
            branches: tools
                .iter()
                .map(|tool| DecisionBranch {
                    answer: tool.clone(),
                    tool: Some(tool.clone()),
                    next: None,
                })
                .collect(),
        });
    }
    DecisionTree {
        tree_id: "tool_selection".to_string(),
        description: "Decision tree for selecting the right tool".to_string(),
        decision_nodes: nodes,
    }
}

fn copy_dir_recursive(from: &Path, to: &Path) -> std::io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ToolParam;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn sample_catalog() -> Vec<ToolSpec> {
        vec![
            ToolSpec::new("query_component", "librarian", "Query a component")
                .param(ToolParam::required("project_path", "string"))
                .param(ToolParam::required("component_name", "string")),
            ToolSpec::new("find_implementation", "librarian", "Search source text")
                .param(ToolParam::required("project_path", "string")),
            ToolSpec::new("submit_background_task", "taskboard", "Submit an async task"),
        ]
    }

    #[test]
    fn initialize_writes_full_layout() {
        let dir = tempdir().unwrap();
        let store = ToolReferenceStore::new(dir.path());
        let summary = store.initialize(&sample_catalog()).unwrap();

        assert_eq!(summary.tool_count, 3);
        assert_eq!(summary.profile_count, 3);
        assert_eq!(summary.relationship_count, 2);
        assert_eq!(summary.decision_tree_count, 1);

        let registry = store.load_registry().unwrap();
        assert!(registry.tools.contains_key("query_component"));
        assert!(registry.taskboard_integration.is_some());

        let categories = store.load_categories().unwrap();
        assert_eq!(categories.categories["librarian"].tools.len(), 2);

        assert_eq!(store.load_relationship_groups().len(), 2);
        assert_eq!(store.load_decision_trees().len(), 1);

        // A fresh initialize also creates the plural mirror.
        let alias = dir.path().join(TOOL_REF_ALIAS_DIR);
        assert!(alias.join("registry.json").is_file());
        assert!(alias.join("tool_profiles/query_component.json").is_file());
    }

    #[test]
    fn alias_mirror_tracks_later_writes() {
        let dir = tempdir().unwrap();
        let store = ToolReferenceStore::new(dir.path());
        store.initialize(&sample_catalog()).unwrap();

        let mut profile = store.load_profile("query_component").unwrap();
        profile.primary_purpose = "Updated purpose".to_string();
        store.save_profile(&profile).unwrap();

        let alias_profile = dir
            .path()
            .join(TOOL_REF_ALIAS_DIR)
            .join("tool_profiles/query_component.json");
        let canonical_profile = store.profile_path("query_component");
        assert_eq!(
            fs::read(&canonical_profile).unwrap(),
            fs::read(&alias_profile).unwrap()
        );

        let mut registry = store.load_registry().unwrap();
        registry.description = "refreshed".to_string();
        store.save_registry(&registry).unwrap();
        assert_eq!(
            fs::read(store.dir().join("registry.json")).unwrap(),
            fs::read(dir.path().join(TOOL_REF_ALIAS_DIR).join("registry.json")).unwrap()
        );
    }

    #[test]
    fn missing_profile_falls_back() {
        let dir = tempdir().unwrap();
        let store = ToolReferenceStore::new(dir.path());
        store.initialize(&sample_catalog()).unwrap();

        fs::remove_file(store.profile_path("query_component")).unwrap();
        let profile = store.load_profile("query_component").unwrap();
        assert!(profile.fallback_profile);
        assert!(profile.primary_purpose.contains("query_component"));

        let err = store.load_profile("no_such_tool").unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn plural_alias_directory_is_adopted() {
        let dir = tempdir().unwrap();
        let store = ToolReferenceStore::new(dir.path());
        store.initialize(&sample_catalog()).unwrap();

        // Simulate an old deployment where only the plural mirror survived.
        fs::remove_dir_all(dir.path().join(TOOL_REF_DIR)).unwrap();
        assert!(dir.path().join(TOOL_REF_ALIAS_DIR).is_dir());

        let store = ToolReferenceStore::new(dir.path());
        assert!(store.is_initialized());
        assert!(dir.path().join(TOOL_REF_DIR).join("registry.json").is_file());
        let registry = store.load_registry().unwrap();
        assert_eq!(registry.tools.len(), 3);
    }

    #[test]
    fn unknown_major_version_is_refused() {
        let dir = tempdir().unwrap();
        let store = ToolReferenceStore::new(dir.path());
        store.initialize(&sample_catalog()).unwrap();

        let path = store.dir().join("registry.json");
        let body = fs::read_to_string(&path)
            .unwrap()
            .replace("\"version\": \"1.0.0\"", "\"version\": \"9.0.0\"");
        fs::write(&path, body).unwrap();

        let err = store.load_registry().unwrap_err();
        assert_eq!(err.kind(), "invalid_state");
    }

    #[test]
    fn default_mapping_covers_known_task_types() {
        let mapping = default_taskboard_integration().task_type_to_mini_librarian_mapping;
        assert_eq!(
            mapping["find_usages"],
            vec!["file-indexer", "component-analyzer"]
        );
        assert_eq!(mapping["file_search"], vec!["file-indexer"]);
    }
}
