//! Unified context: a per-project materialised view combining component,
//! tool and cross-reference data, cached with a TTL and refreshed by a
//! background task.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use librarian_core::IndexEngine;
use librarian_core::store::IndexStore;
use librarian_toolref::DecisionTree;
use librarian_toolref::RelationshipGroup;
use librarian_toolref::ToolReferenceStore;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::error::RefsError;
use crate::error::Result;
use crate::xref::BIDIRECTIONAL_REFS_FILE;
use crate::xref::ComponentEdge;
use crate::xref::ToolEdge;
use crate::xref::load_bidirectional_refs;

/// Default freshness window for a cached context.
pub const CONTEXT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SystemsAvailable {
    pub ai_librarian: bool,
    pub tool_reference: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextComponent {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub file: String,
    #[serde(default)]
    pub references: Vec<String>,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextTool {
    pub id: String,
    pub category: String,
    #[serde(default)]
    pub primary_purpose: String,
    #[serde(default)]
    pub always_use_when: Vec<String>,
    #[serde(default)]
    pub never_use_when: Vec<String>,
    pub has_detailed_profile: bool,
    pub source: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CrossReferences {
    pub component_to_tool: BTreeMap<String, Vec<ToolEdge>>,
    pub tool_to_component: BTreeMap<String, Vec<ComponentEdge>>,
}

/// The snapshot handed out to callers of `get_unified_context`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnifiedContext {
    pub project_path: String,
    pub systems_available: SystemsAvailable,
    pub components: BTreeMap<String, ContextComponent>,
    pub tools: BTreeMap<String, ContextTool>,
    pub relationships: BTreeMap<String, RelationshipGroup>,
    pub decision_trees: BTreeMap<String, DecisionTree>,
    pub cross_references: CrossReferences,
    pub last_updated: String,
}

/// Build a fresh unified context. Never hard-fails: whatever subsystem is
/// missing simply contributes nothing and is flagged unavailable.
pub fn build_unified_context(project_root: &Path) -> UnifiedContext {
    let store = IndexStore::new(project_root);
    let tool_store = ToolReferenceStore::new(project_root);

    let mut context = UnifiedContext {
        project_path: project_root.to_string_lossy().into_owned(),
        systems_available: SystemsAvailable {
            ai_librarian: store.is_initialized(),
            tool_reference: tool_store.is_initialized(),
        },
        components: BTreeMap::new(),
        tools: BTreeMap::new(),
        relationships: BTreeMap::new(),
        decision_trees: BTreeMap::new(),
        cross_references: CrossReferences::default(),
        last_updated: chrono::Utc::now().to_rfc3339(),
    };

    if context.systems_available.ai_librarian {
        match store.load_registry() {
            Ok(registry) => {
                for (name, component) in registry.components {
                    context.components.insert(
                        name.clone(),
                        ContextComponent {
                            name,
                            kind: component.kind.as_str().to_string(),
                            file: component.file,
                            references: component.references,
                            source: "ai_librarian".to_string(),
                        },
                    );
                }
            }
            Err(err) => tracing::warn!("unified context: registry unavailable: {err}"),
        }
    }

    if context.systems_available.tool_reference {
        match tool_store.load_registry() {
            Ok(registry) => {
                for (tool_id, record) in &registry.tools {
                    let profile = tool_store.load_profile(tool_id).ok();
                    context.tools.insert(
                        tool_id.clone(),
                        ContextTool {
                            id: tool_id.clone(),
                            category: record.category.clone(),
                            primary_purpose: profile
                                .as_ref()
                                .map(|p| p.primary_purpose.clone())
                                .unwrap_or_default(),
                            always_use_when: profile
                                .as_ref()
                                .map(|p| p.always_use_when.clone())
                                .unwrap_or_default(),
                            never_use_when: profile
                                .map(|p| p.never_use_when)
                                .unwrap_or_default(),
                            has_detailed_profile: record.has_profile,
                            source: "tool_reference".to_string(),
                        },
                    );
                }
            }
            Err(err) => tracing::warn!("unified context: tool registry unavailable: {err}"),
        }
        for group in tool_store.load_relationship_groups() {
            context
                .relationships
                .insert(group.group_name.clone(), group);
        }
        for tree in tool_store.load_decision_trees() {
            context.decision_trees.insert(tree.tree_id.clone(), tree);
        }
    }

    // The unified map is read from the AI reference copy, falling back to
    // the tool reference copy (they are written redundantly).
    let primary = store.ai_ref_path().join(BIDIRECTIONAL_REFS_FILE);
    let secondary = tool_store.dir().join(BIDIRECTIONAL_REFS_FILE);
    if let Some(refs) = load_bidirectional_refs(&primary).or_else(|| load_bidirectional_refs(&secondary))
    {
        context.cross_references = CrossReferences {
            component_to_tool: refs.component_to_tool,
            tool_to_component: refs.tool_to_component,
        };
    }

    context
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RelatedTool {
    pub id: String,
    pub category: String,
    pub primary_purpose: String,
    /// "direct" when backed by a cross-reference edge, "inferred" when
    /// produced by the heuristic fallback.
    pub reference_type: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RelatedComponent {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub file: String,
    pub reference_type: String,
}

/// Tools related to a component: direct edges first, heuristics only when
/// there are none.
pub fn related_tools(context: &UnifiedContext, component_name: &str) -> Result<Vec<RelatedTool>> {
    let Some(component) = context.components.get(component_name) else {
        return Err(RefsError::NotFound(format!(
            "component not found: {component_name}"
        )));
    };

    let mut direct: Vec<String> = context
        .cross_references
        .component_to_tool
        .get(component_name)
        .map(|edges| edges.iter().map(|e| e.tool_id.clone()).collect())
        .unwrap_or_default();
    direct.dedup();

    let mut inferred = Vec::new();
    if direct.is_empty() {
        let file_lower = component.file.to_lowercase();
        let name_lower = component_name.to_lowercase();
        for (tool_id, tool) in &context.tools {
            let tool_lower = tool_id.to_lowercase();
            let category_match =
                !tool.category.is_empty() && file_lower.contains(&tool.category.to_lowercase());
            let name_match =
                tool_lower.contains(&name_lower) || name_lower.contains(&tool_lower);
            if (category_match || name_match) && !inferred.contains(tool_id) {
                inferred.push(tool_id.clone());
            }
        }
    }

    let mut related = Vec::new();
    for (ids, reference_type) in [(direct, "direct"), (inferred, "inferred")] {
        for tool_id in ids {
            if let Some(tool) = context.tools.get(&tool_id) {
                related.push(RelatedTool {
                    id: tool_id,
                    category: tool.category.clone(),
                    primary_purpose: tool.primary_purpose.clone(),
                    reference_type: reference_type.to_string(),
                });
            }
        }
    }
    Ok(related)
}

/// Symmetric inverse of `related_tools`.
pub fn related_components(
    context: &UnifiedContext,
    tool_id: &str,
) -> Result<Vec<RelatedComponent>> {
    let Some(tool) = context.tools.get(tool_id) else {
        return Err(RefsError::NotFound(format!("tool not found: {tool_id}")));
    };

    let mut direct: Vec<String> = context
        .cross_references
        .tool_to_component
        .get(tool_id)
        .map(|edges| edges.iter().map(|e| e.component_name.clone()).collect())
        .unwrap_or_default();
    direct.dedup();

    let mut inferred = Vec::new();
    if direct.is_empty() {
        let category_lower = tool.category.to_lowercase();
        let tool_lower = tool_id.to_lowercase();
        for (name, component) in &context.components {
            let name_lower = name.to_lowercase();
            let category_match = !category_lower.is_empty()
                && component.file.to_lowercase().contains(&category_lower);
            let name_match =
                tool_lower.contains(&name_lower) || name_lower.contains(&tool_lower);
            if (category_match || name_match) && !inferred.contains(name) {
                inferred.push(name.clone());
            }
        }
    }

    let mut related = Vec::new();
    for (names, reference_type) in [(direct, "direct"), (inferred, "inferred")] {
        for name in names {
            if let Some(component) = context.components.get(&name) {
                related.push(RelatedComponent {
                    name,
                    kind: component.kind.clone(),
                    file: component.file.clone(),
                    reference_type: reference_type.to_string(),
                });
            }
        }
    }
    Ok(related)
}

struct CacheEntry {
    context: UnifiedContext,
    built_at: Instant,
}

/// Per-project context cache with TTL invalidation.
pub struct ContextCache {
    entries: RwLock<HashMap<PathBuf, CacheEntry>>,
    ttl: Duration,
}

impl Default for ContextCache {
    fn default() -> Self {
        Self::new(CONTEXT_TTL)
    }
}

impl ContextCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Cached context when fresh, otherwise rebuilt and re-cached.
    pub async fn get(&self, project_root: &Path) -> UnifiedContext {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(project_root) {
                if entry.built_at.elapsed() < self.ttl {
                    return entry.context.clone();
                }
            }
        }
        self.rebuild(project_root).await
    }

    /// Force a rebuild on the next read. Called after every
    /// cross-reference write.
    pub async fn invalidate(&self, project_root: &Path) {
        self.entries.write().await.remove(project_root);
    }

    pub async fn rebuild(&self, project_root: &Path) -> UnifiedContext {
        let context = build_unified_context(project_root);
        self.entries.write().await.insert(
            project_root.to_path_buf(),
            CacheEntry {
                context: context.clone(),
                built_at: Instant::now(),
            },
        );
        context
    }
}

/// Background task refreshing each active project's context on the TTL
/// cadence.
pub fn spawn_refresh(cache: Arc<ContextCache>, engine: IndexEngine) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("starting unified context refresh task");
        loop {
            tokio::time::sleep(cache.ttl).await;
            for project in engine.active_projects().await {
                if project.exists() {
                    let _ = cache.rebuild(&project).await;
                } else {
                    cache.invalidate(&project).await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn minimal_context() -> UnifiedContext {
        let mut context = UnifiedContext {
            project_path: "/tmp/p1".to_string(),
            systems_available: SystemsAvailable {
                ai_librarian: true,
                tool_reference: true,
            },
            components: BTreeMap::new(),
            tools: BTreeMap::new(),
            relationships: BTreeMap::new(),
            decision_trees: BTreeMap::new(),
            cross_references: CrossReferences::default(),
            last_updated: String::new(),
        };
        context.components.insert(
            "edit_helper".to_string(),
            ContextComponent {
                name: "edit_helper".to_string(),
                kind: "function".to_string(),
                file: "tools/edit_helper.py".to_string(),
                references: Vec::new(),
                source: "ai_librarian".to_string(),
            },
        );
        context.tools.insert(
            "edit_file".to_string(),
            ContextTool {
                id: "edit_file".to_string(),
                category: "filesystem".to_string(),
                primary_purpose: "Edit a file in place".to_string(),
                always_use_when: Vec::new(),
                never_use_when: Vec::new(),
                has_detailed_profile: true,
                source: "tool_reference".to_string(),
            },
        );
        context
    }

    #[test]
    fn direct_edges_win_over_heuristics() {
        let mut context = minimal_context();
        context.cross_references.component_to_tool.insert(
            "edit_helper".to_string(),
            vec![ToolEdge {
                tool_id: "edit_file".to_string(),
                relationship: crate::xref::Relationship::new(
                    crate::xref::RelationshipType::Usage,
                    crate::xref::RelationshipStrength::Strong,
                    "call site",
                ),
            }],
        );
        let related = related_tools(&context, "edit_helper").unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].id, "edit_file");
        assert_eq!(related[0].reference_type, "direct");
    }

    #[test]
    fn heuristics_kick_in_without_edges() {
        let context = minimal_context();
        let related = related_tools(&context, "edit_helper").unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].reference_type, "inferred");

        let err = related_tools(&context, "missing").unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn inverse_query_is_symmetric() {
        let mut context = minimal_context();
        context.cross_references.tool_to_component.insert(
            "edit_file".to_string(),
            vec![ComponentEdge {
                component_name: "edit_helper".to_string(),
                relationship: crate::xref::Relationship::new(
                    crate::xref::RelationshipType::Usage,
                    crate::xref::RelationshipStrength::Strong,
                    "call site",
                ),
            }],
        );
        let related = related_components(&context, "edit_file").unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].name, "edit_helper");
        assert_eq!(related[0].reference_type, "direct");
    }

    #[tokio::test]
    async fn cache_serves_fresh_entries_without_rebuilding() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ContextCache::default();

        let first = cache.get(dir.path()).await;
        let second = cache.get(dir.path()).await;
        // Same cached snapshot: identical timestamp.
        assert_eq!(first.last_updated, second.last_updated);

        cache.invalidate(dir.path()).await;
        let third = cache.get(dir.path()).await;
        assert!(third.last_updated >= first.last_updated);
    }
}
