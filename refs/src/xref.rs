//! Bidirectional cross-reference builder.
//!
//! Derives typed, strength-weighted edges between code components and tools
//! from several evidence sources, then enforces symmetry: every edge exists
//! in both directions with matching type and strength. Results are written
//! back into the component registry, the tool profiles, the per-direction
//! payload directories, and a unified map stored redundantly under both
//! reference directories.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use librarian_core::store::ComponentKind;
use librarian_core::store::IndexStore;
use librarian_core::store::write_json;
use librarian_toolref::ToolProfile;
use librarian_toolref::ToolReferenceStore;
use librarian_toolref::ToolRegistryDoc;
use regex::Regex;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

pub const XREF_VERSION: &str = "1.0.0";
pub const BIDIRECTIONAL_REFS_FILE: &str = "bidirectional_refs.json";

const MAX_MATCH_LINES: usize = 5;
const MAX_MATCH_CONTEXTS: usize = 3;
const CONTEXT_RADIUS: usize = 40;
const BINARY_PROBE_LEN: usize = 8192;

/// Relationship strength, weakest first so the derived ordering is the
/// authoritative max-merge ordering.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipStrength {
    VeryWeak,
    Weak,
    Medium,
    Strong,
    VeryStrong,
}

impl RelationshipStrength {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::VeryWeak => "very_weak",
            Self::Weak => "weak",
            Self::Medium => "medium",
            Self::Strong => "strong",
            Self::VeryStrong => "very_strong",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    Implementation,
    Usage,
    Reference,
    Documentation,
    NameSimilarity,
    SemanticCategory,
    ProfileReference,
    Bidirectional,
}

impl RelationshipType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Implementation => "implementation",
            Self::Usage => "usage",
            Self::Reference => "reference",
            Self::Documentation => "documentation",
            Self::NameSimilarity => "name_similarity",
            Self::SemanticCategory => "semantic_category",
            Self::ProfileReference => "profile_reference",
            Self::Bidirectional => "bidirectional",
        }
    }
}

/// Typed, weighted relation between two endpoints, with evidence samples.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relationship {
    pub relationship_type: RelationshipType,
    pub relationship_strength: RelationshipStrength,
    pub match_reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_lines: Vec<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_contexts: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl Relationship {
    pub fn new(
        relationship_type: RelationshipType,
        strength: RelationshipStrength,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            relationship_type,
            relationship_strength: strength,
            match_reason: reason.into(),
            match_count: None,
            match_lines: Vec::new(),
            match_contexts: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// Component-side edge: this component relates to that tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolEdge {
    pub tool_id: String,
    pub relationship: Relationship,
}

/// Tool-side edge: this tool relates to that component.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentEdge {
    pub component_name: String,
    pub relationship: Relationship,
}

/// The unified reference map, persisted redundantly to both reference
/// directories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BidirectionalRefs {
    pub version: String,
    pub description: String,
    pub component_to_tool: BTreeMap<String, Vec<ToolEdge>>,
    pub tool_to_component: BTreeMap<String, Vec<ComponentEdge>>,
    pub components_count: usize,
    pub tools_count: usize,
    pub last_updated: String,
}

impl BidirectionalRefs {
    fn empty() -> Self {
        Self {
            version: XREF_VERSION.to_string(),
            description: "Bidirectional references between code components and tools".to_string(),
            component_to_tool: BTreeMap::new(),
            tool_to_component: BTreeMap::new(),
            components_count: 0,
            tools_count: 0,
            last_updated: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct XrefSummary {
    pub component_to_tool_references: usize,
    pub tool_to_component_references: usize,
    pub components_with_references: usize,
    pub tools_with_references: usize,
}

/// Upgrade a persisted edge list that may still contain legacy plain-string
/// entries. Strings become `reference`/`medium` edges; malformed objects
/// are dropped with a warning.
pub fn upgrade_tool_edges(values: &[Value]) -> Vec<ToolEdge> {
    values
        .iter()
        .filter_map(|value| match value {
            Value::String(tool_id) => Some(ToolEdge {
                tool_id: tool_id.clone(),
                relationship: Relationship::new(
                    RelationshipType::Reference,
                    RelationshipStrength::Medium,
                    "legacy string reference",
                ),
            }),
            other => match serde_json::from_value(other.clone()) {
                Ok(edge) => Some(edge),
                Err(err) => {
                    tracing::warn!("dropping malformed tool edge: {err}");
                    None
                }
            },
        })
        .collect()
}

pub fn upgrade_component_edges(values: &[Value]) -> Vec<ComponentEdge> {
    values
        .iter()
        .filter_map(|value| match value {
            Value::String(component_name) => Some(ComponentEdge {
                component_name: component_name.clone(),
                relationship: Relationship::new(
                    RelationshipType::Reference,
                    RelationshipStrength::Medium,
                    "legacy string reference",
                ),
            }),
            other => match serde_json::from_value(other.clone()) {
                Ok(edge) => Some(edge),
                Err(err) => {
                    tracing::warn!("dropping malformed component edge: {err}");
                    None
                }
            },
        })
        .collect()
}

/// Load a unified reference map, upgrading any legacy entries. Returns
/// `None` when the file is absent or unreadable.
pub fn load_bidirectional_refs(path: &Path) -> Option<BidirectionalRefs> {
    let content = fs::read_to_string(path).ok()?;
    let value: Value = match serde_json::from_str(&content) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!("unreadable reference map {}: {err}", path.display());
            return None;
        }
    };
    let mut refs = BidirectionalRefs::empty();
    if let Some(updated) = value.get("last_updated").and_then(Value::as_str) {
        refs.last_updated = updated.to_string();
    }
    if let Some(map) = value.get("component_to_tool").and_then(Value::as_object) {
        for (component, edges) in map {
            let edges = edges.as_array().map(|a| upgrade_tool_edges(a)).unwrap_or_default();
            refs.component_to_tool.insert(component.clone(), edges);
        }
    }
    if let Some(map) = value.get("tool_to_component").and_then(Value::as_object) {
        for (tool, edges) in map {
            let edges = edges
                .as_array()
                .map(|a| upgrade_component_edges(a))
                .unwrap_or_default();
            refs.tool_to_component.insert(tool.clone(), edges);
        }
    }
    refs.components_count = refs.component_to_tool.len();
    refs.tools_count = refs.tool_to_component.len();
    Some(refs)
}

struct EvidencePattern {
    regex: Regex,
    relationship_type: RelationshipType,
    strength: RelationshipStrength,
}

/// Builds and persists the component/tool cross-reference graph for one
/// project.
pub struct CrossReferenceBuilder {
    project_root: PathBuf,
    store: IndexStore,
    tool_store: ToolReferenceStore,
}

impl CrossReferenceBuilder {
    pub fn new(project_root: &Path) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
            store: IndexStore::new(project_root),
            tool_store: ToolReferenceStore::new(project_root),
        }
    }

    /// One full cross-reference pass. Missing or malformed inputs reduce
    /// the output instead of failing it; a wholly missing reference
    /// directory is replaced by a minimal skeleton with an empty map.
    pub fn build(&self) -> Result<XrefSummary> {
        if !self.store.is_initialized() || !self.tool_store.is_initialized() {
            tracing::warn!(
                "both reference directories are required; writing empty skeleton for {}",
                self.project_root.display()
            );
            self.store.ensure_layout()?;
            fs::create_dir_all(self.tool_store.ai_references_dir())?;
            fs::create_dir_all(self.tool_store.profiles_dir())?;
            self.write_unified_map(&BidirectionalRefs::empty())?;
            return Ok(XrefSummary::default());
        }

        let mut registry = self.store.load_registry()?;
        let tool_registry = self.tool_store.load_registry()?;
        let profiles = self.load_profiles(&tool_registry);

        let mut component_to_tool: BTreeMap<String, Vec<ToolEdge>> = BTreeMap::new();
        let mut tool_to_component: BTreeMap<String, Vec<ComponentEdge>> = BTreeMap::new();

        // Evidence scan: each component's defining file, cached per file
        // because many components share one.
        let mut file_edges: HashMap<String, Vec<ToolEdge>> = HashMap::new();
        for (name, component) in &registry.components {
            let edges = file_edges
                .entry(component.file.clone())
                .or_insert_with(|| self.scan_file_for_tools(&component.file, &tool_registry));
            for edge in edges.iter() {
                merge_tool_edge(&mut component_to_tool, name, edge.clone());
            }
        }

        // Name similarity in either direction.
        for name in registry.components.keys() {
            let lower_name = name.to_lowercase();
            for (tool_id, record) in &tool_registry.tools {
                let lower_tool = tool_id.to_lowercase();
                if lower_name.contains(&lower_tool) || lower_tool.contains(&lower_name) {
                    let relationship = Relationship::new(
                        RelationshipType::NameSimilarity,
                        RelationshipStrength::Medium,
                        format!("tool name '{tool_id}' overlaps component name '{name}'"),
                    )
                    .with_metadata("tool_category", Value::String(record.category.clone()));
                    add_tool_edge_if_absent(&mut component_to_tool, name, tool_id, relationship);
                }
            }
        }

        // A function component with a tool's exact name implements it.
        for (name, component) in &registry.components {
            if component.kind != ComponentKind::Function {
                continue;
            }
            let Some(record) = tool_registry.tools.get(name) else {
                continue;
            };
            let relationship = Relationship::new(
                RelationshipType::Implementation,
                RelationshipStrength::VeryStrong,
                "direct implementation of tool",
            )
            .with_metadata("tool_category", Value::String(record.category.clone()));
            merge_tool_edge(
                &mut component_to_tool,
                name,
                ToolEdge {
                    tool_id: name.clone(),
                    relationship: relationship.clone(),
                },
            );
            let mirror = Relationship {
                match_reason: format!("component '{name}' directly implements this tool"),
                metadata: BTreeMap::from([
                    ("component_type".to_string(), Value::String("function".to_string())),
                    ("file".to_string(), Value::String(component.file.clone())),
                ]),
                ..relationship
            };
            merge_component_edge(
                &mut tool_to_component,
                name,
                ComponentEdge {
                    component_name: name.clone(),
                    relationship: mirror,
                },
            );
        }

        // Components mentioned inside a tool's serialised profile.
        for (tool_id, profile) in &profiles {
            let profile_text = serde_json::to_string(profile)?;
            for (name, component) in &registry.components {
                if !profile_text.contains(name.as_str()) {
                    continue;
                }
                let relationship = Relationship::new(
                    RelationshipType::ProfileReference,
                    RelationshipStrength::Medium,
                    format!("component '{name}' mentioned in tool profile"),
                )
                .with_metadata(
                    "component_type",
                    Value::String(component.kind.as_str().to_string()),
                );
                add_component_edge_if_absent(&mut tool_to_component, tool_id, name, relationship);
            }
        }

        // Category heuristics: the tool's category string appears in the
        // component's file path.
        for (name, component) in &registry.components {
            let file_lower = component.file.to_lowercase();
            for (tool_id, record) in &tool_registry.tools {
                let category = record.category.to_lowercase();
                if category.is_empty() || !file_lower.contains(&category) {
                    continue;
                }
                let relationship = Relationship::new(
                    RelationshipType::SemanticCategory,
                    RelationshipStrength::Strong,
                    format!("path contains category '{}'", record.category),
                )
                .with_metadata("category", Value::String(record.category.clone()));
                add_tool_edge_if_absent(
                    &mut component_to_tool,
                    name,
                    tool_id,
                    relationship.clone(),
                );
                add_component_edge_if_absent(&mut tool_to_component, tool_id, name, relationship);
            }
        }

        // Symmetry pass: every edge must exist in both directions with
        // consistent type and strength.
        let forward: Vec<(String, String, Relationship)> = component_to_tool
            .iter()
            .flat_map(|(component, edges)| {
                edges
                    .iter()
                    .map(|e| (component.clone(), e.tool_id.clone(), e.relationship.clone()))
            })
            .collect();
        for (component, tool_id, relationship) in forward {
            let mirrored = Relationship {
                match_reason: "bidirectional reference consistency".to_string(),
                match_count: None,
                match_lines: Vec::new(),
                match_contexts: Vec::new(),
                ..relationship
            };
            add_component_edge_if_absent(&mut tool_to_component, &tool_id, &component, mirrored);
        }
        let backward: Vec<(String, String, Relationship)> = tool_to_component
            .iter()
            .flat_map(|(tool, edges)| {
                edges.iter().map(|e| {
                    (
                        tool.clone(),
                        e.component_name.clone(),
                        e.relationship.clone(),
                    )
                })
            })
            .collect();
        for (tool_id, component, relationship) in backward {
            let mirrored = Relationship {
                match_reason: "bidirectional reference consistency".to_string(),
                match_count: None,
                match_lines: Vec::new(),
                match_contexts: Vec::new(),
                ..relationship
            };
            add_tool_edge_if_absent(&mut component_to_tool, &component, &tool_id, mirrored);
        }

        // Write the component side back into the registry.
        for (name, edges) in &component_to_tool {
            if let Some(component) = registry.components.get_mut(name) {
                component.tool_references = edges
                    .iter()
                    .filter_map(|e| serde_json::to_value(e).ok())
                    .collect();
                component.tool_references_summary = Some(edge_summary(
                    edges.len(),
                    edges.iter().map(|e| &e.relationship),
                ));
            }
        }
        self.store.save_registry(&registry)?;

        // And the tool side into each profile.
        for (tool_id, edges) in &tool_to_component {
            let mut profile = match profiles.get(tool_id) {
                Some(profile) => profile.clone(),
                None => ToolProfile::fallback(tool_id),
            };
            profile.component_references = edges
                .iter()
                .filter_map(|e| serde_json::to_value(e).ok())
                .collect();
            profile.component_references_summary = Some(edge_summary(
                edges.len(),
                edges.iter().map(|e| &e.relationship),
            ));
            if let Err(err) = self.tool_store.save_profile(&profile) {
                tracing::warn!("failed to update profile {tool_id}: {err}");
            }
        }

        // Per-direction payloads for each owner's reference area.
        let tool_refs_dir = self.store.ai_ref_path().join("tool_references");
        fs::create_dir_all(&tool_refs_dir)?;
        write_json(&tool_refs_dir.join("component_to_tool.json"), &component_to_tool)?;
        let ai_refs_dir = self.tool_store.ai_references_dir();
        fs::create_dir_all(&ai_refs_dir)?;
        let tool_payload = ai_refs_dir.join("tool_to_component.json");
        write_json(&tool_payload, &tool_to_component)?;
        self.tool_store.mirror_to_alias(&tool_payload);

        let summary = XrefSummary {
            component_to_tool_references: component_to_tool.values().map(Vec::len).sum(),
            tool_to_component_references: tool_to_component.values().map(Vec::len).sum(),
            components_with_references: component_to_tool.len(),
            tools_with_references: tool_to_component.len(),
        };

        let unified = BidirectionalRefs {
            version: XREF_VERSION.to_string(),
            description: "Bidirectional references between code components and tools".to_string(),
            components_count: component_to_tool.len(),
            tools_count: tool_to_component.len(),
            component_to_tool,
            tool_to_component,
            last_updated: chrono::Utc::now().to_rfc3339(),
        };
        self.write_unified_map(&unified)?;

        Ok(summary)
    }

    /// The same serialised bytes are written under both reference
    /// directories for redundancy, and mirrored into the alias directory.
    fn write_unified_map(&self, refs: &BidirectionalRefs) -> Result<()> {
        let body = serde_json::to_string_pretty(refs)?;
        fs::write(self.store.ai_ref_path().join(BIDIRECTIONAL_REFS_FILE), &body)?;
        let tool_copy = self.tool_store.dir().join(BIDIRECTIONAL_REFS_FILE);
        fs::write(&tool_copy, &body)?;
        self.tool_store.mirror_to_alias(&tool_copy);
        Ok(())
    }

    fn load_profiles(&self, tool_registry: &ToolRegistryDoc) -> BTreeMap<String, ToolProfile> {
        let mut profiles = BTreeMap::new();
        for (tool_id, record) in &tool_registry.tools {
            if !record.has_profile {
                continue;
            }
            let path = self.tool_store.profile_path(tool_id);
            if !path.is_file() {
                tracing::warn!("tool profile not found for {tool_id}");
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|c| serde_json::from_str::<ToolProfile>(&c).map_err(|e| e.to_string()))
            {
                Ok(profile) => {
                    profiles.insert(tool_id.clone(), profile);
                }
                Err(err) => tracing::warn!("skipping malformed profile for {tool_id}: {err}"),
            }
        }
        profiles
    }

    /// Scan one project file for evidence of each tool. Binary files are
    /// skipped (null-byte probe plus UTF-8 decode test).
    fn scan_file_for_tools(&self, rel: &str, tool_registry: &ToolRegistryDoc) -> Vec<ToolEdge> {
        let full_path = self.project_root.join(rel);
        let Ok(bytes) = fs::read(&full_path) else {
            tracing::warn!("file does not exist: {}", full_path.display());
            return Vec::new();
        };
        if bytes[..bytes.len().min(BINARY_PROBE_LEN)].contains(&0) {
            return Vec::new();
        }
        let Ok(content) = std::str::from_utf8(&bytes) else {
            return Vec::new();
        };

        let ext = full_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        let mut edges = Vec::new();
        for (tool_id, record) in &tool_registry.tools {
            if !content.contains(tool_id.as_str()) {
                continue;
            }
            let patterns = evidence_patterns(tool_id, &ext);
            let mut best: Option<(RelationshipType, RelationshipStrength)> = None;
            let mut lines = Vec::new();
            let mut contexts = Vec::new();
            let mut count = 0usize;

            for pattern in &patterns {
                for hit in pattern.regex.find_iter(content) {
                    count += 1;
                    if lines.len() < MAX_MATCH_LINES {
                        lines.push(content[..hit.start()].matches('\n').count() + 1);
                    }
                    if contexts.len() < MAX_MATCH_CONTEXTS {
                        contexts.push(context_around(content, hit.start(), hit.end()));
                    }
                    let stronger = best.is_none_or(|(_, s)| pattern.strength > s);
                    if stronger {
                        best = Some((pattern.relationship_type, pattern.strength));
                    }
                }
            }

            if let Some((relationship_type, strength)) = best {
                let mut relationship = Relationship::new(
                    relationship_type,
                    strength,
                    format!("tool '{tool_id}' referenced in {rel}"),
                );
                relationship.match_count = Some(count);
                relationship.match_lines = lines;
                relationship.match_contexts = contexts;
                relationship.metadata.insert(
                    "file_type".to_string(),
                    Value::String(if ext.is_empty() {
                        "unknown".to_string()
                    } else {
                        ext.clone()
                    }),
                );
                relationship.metadata.insert(
                    "tool_category".to_string(),
                    Value::String(record.category.clone()),
                );
                edges.push(ToolEdge {
                    tool_id: tool_id.clone(),
                    relationship,
                });
            }
        }
        edges
    }
}

/// File-type-aware pattern set assigning a relationship type and strength
/// per kind of evidence.
fn evidence_patterns(tool_id: &str, ext: &str) -> Vec<EvidencePattern> {
    let id = regex::escape(tool_id);
    let make = |pattern: String, relationship_type, strength| {
        Regex::new(&pattern).ok().map(|regex| EvidencePattern {
            regex,
            relationship_type,
            strength,
        })
    };

    let specs: Vec<Option<EvidencePattern>> = match ext {
        "py" => vec![
            make(
                format!(r"def\s+{id}\s*\("),
                RelationshipType::Implementation,
                RelationshipStrength::VeryStrong,
            ),
            make(
                format!(r"(?m)^[ \t]*@\w+(?:\.\w+)*\.tool\(\)[^\n]*\n[ \t]*def[ \t]+{id}\s*\("),
                RelationshipType::Implementation,
                RelationshipStrength::VeryStrong,
            ),
            make(
                format!(r"[^A-Za-z0-9_]{id}\s*\("),
                RelationshipType::Usage,
                RelationshipStrength::Strong,
            ),
            make(
                format!(r#"['"]{id}['"]"#),
                RelationshipType::Reference,
                RelationshipStrength::Medium,
            ),
            make(
                format!(r"#.*{id}"),
                RelationshipType::Documentation,
                RelationshipStrength::Medium,
            ),
        ],
        "md" | "txt" => vec![
            make(
                format!(r"(?m)^#+\s+.*{id}"),
                RelationshipType::Documentation,
                RelationshipStrength::Strong,
            ),
            make(
                format!(r"`{id}`"),
                RelationshipType::Documentation,
                RelationshipStrength::Strong,
            ),
            make(
                id.clone(),
                RelationshipType::Documentation,
                RelationshipStrength::Medium,
            ),
        ],
        _ => vec![make(
            id.clone(),
            RelationshipType::Reference,
            RelationshipStrength::Medium,
        )],
    };
    specs.into_iter().flatten().collect()
}

fn context_around(content: &str, start: usize, end: usize) -> String {
    let mut from = start.saturating_sub(CONTEXT_RADIUS);
    while from > 0 && !content.is_char_boundary(from) {
        from -= 1;
    }
    let mut to = (end + CONTEXT_RADIUS).min(content.len());
    while to < content.len() && !content.is_char_boundary(to) {
        to += 1;
    }
    content[from..to].trim().to_string()
}

/// Max-merge an edge into the component->tool map: a stronger relationship
/// replaces a weaker one for the same pair, evidence accumulates.
fn merge_tool_edge(map: &mut BTreeMap<String, Vec<ToolEdge>>, component: &str, edge: ToolEdge) {
    let edges = map.entry(component.to_string()).or_default();
    match edges.iter_mut().find(|e| e.tool_id == edge.tool_id) {
        Some(existing) => merge_relationship(&mut existing.relationship, edge.relationship),
        None => edges.push(edge),
    }
}

fn merge_component_edge(
    map: &mut BTreeMap<String, Vec<ComponentEdge>>,
    tool_id: &str,
    edge: ComponentEdge,
) {
    let edges = map.entry(tool_id.to_string()).or_default();
    match edges
        .iter_mut()
        .find(|e| e.component_name == edge.component_name)
    {
        Some(existing) => merge_relationship(&mut existing.relationship, edge.relationship),
        None => edges.push(edge),
    }
}

fn merge_relationship(existing: &mut Relationship, incoming: Relationship) {
    for line in incoming.match_lines {
        if existing.match_lines.len() >= MAX_MATCH_LINES {
            break;
        }
        if !existing.match_lines.contains(&line) {
            existing.match_lines.push(line);
        }
    }
    for context in incoming.match_contexts {
        if existing.match_contexts.len() >= MAX_MATCH_CONTEXTS {
            break;
        }
        existing.match_contexts.push(context);
    }
    if let (Some(a), Some(b)) = (existing.match_count, incoming.match_count) {
        existing.match_count = Some(a + b);
    } else if incoming.match_count.is_some() {
        existing.match_count = incoming.match_count;
    }
    if incoming.relationship_strength > existing.relationship_strength {
        existing.relationship_strength = incoming.relationship_strength;
        existing.relationship_type = incoming.relationship_type;
        existing.match_reason = incoming.match_reason;
    }
    for (key, value) in incoming.metadata {
        existing.metadata.entry(key).or_insert(value);
    }
}

fn add_tool_edge_if_absent(
    map: &mut BTreeMap<String, Vec<ToolEdge>>,
    component: &str,
    tool_id: &str,
    relationship: Relationship,
) {
    let edges = map.entry(component.to_string()).or_default();
    if !edges.iter().any(|e| e.tool_id == tool_id) {
        edges.push(ToolEdge {
            tool_id: tool_id.to_string(),
            relationship,
        });
    }
}

fn add_component_edge_if_absent(
    map: &mut BTreeMap<String, Vec<ComponentEdge>>,
    tool_id: &str,
    component: &str,
    relationship: Relationship,
) {
    let edges = map.entry(tool_id.to_string()).or_default();
    if !edges.iter().any(|e| e.component_name == component) {
        edges.push(ComponentEdge {
            component_name: component.to_string(),
            relationship,
        });
    }
}

/// Summary block persisted next to an edge list: counts by type and
/// strength.
fn edge_summary<'a>(count: usize, relationships: impl Iterator<Item = &'a Relationship>) -> Value {
    let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
    let mut by_strength: BTreeMap<String, usize> = BTreeMap::new();
    for relationship in relationships {
        *by_type
            .entry(relationship.relationship_type.as_str().to_string())
            .or_default() += 1;
        *by_strength
            .entry(relationship.relationship_strength.as_str().to_string())
            .or_default() += 1;
    }
    serde_json::json!({
        "count": count,
        "relationship_types": by_type,
        "relationship_strengths": by_strength,
        "last_updated": chrono::Utc::now().to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn strength_ordering_is_authoritative() {
        assert!(RelationshipStrength::VeryStrong > RelationshipStrength::Strong);
        assert!(RelationshipStrength::Strong > RelationshipStrength::Medium);
        assert!(RelationshipStrength::Medium > RelationshipStrength::Weak);
        assert!(RelationshipStrength::Weak > RelationshipStrength::VeryWeak);
    }

    #[test]
    fn strength_serialises_snake_case() {
        let json = serde_json::to_string(&RelationshipStrength::VeryStrong).unwrap();
        assert_eq!(json, "\"very_strong\"");
        let json = serde_json::to_string(&RelationshipType::NameSimilarity).unwrap();
        assert_eq!(json, "\"name_similarity\"");
    }

    #[test]
    fn merge_keeps_the_stronger_relationship() {
        let mut map = BTreeMap::new();
        merge_tool_edge(
            &mut map,
            "Foo",
            ToolEdge {
                tool_id: "edit_file".to_string(),
                relationship: Relationship::new(
                    RelationshipType::Reference,
                    RelationshipStrength::Medium,
                    "string literal",
                ),
            },
        );
        merge_tool_edge(
            &mut map,
            "Foo",
            ToolEdge {
                tool_id: "edit_file".to_string(),
                relationship: Relationship::new(
                    RelationshipType::Implementation,
                    RelationshipStrength::VeryStrong,
                    "function definition",
                ),
            },
        );
        let edges = &map["Foo"];
        assert_eq!(edges.len(), 1);
        assert_eq!(
            edges[0].relationship.relationship_type,
            RelationshipType::Implementation
        );
        assert_eq!(
            edges[0].relationship.relationship_strength,
            RelationshipStrength::VeryStrong
        );
    }

    #[test]
    fn legacy_string_entries_are_upgraded() {
        let values = vec![
            Value::String("edit_file".to_string()),
            serde_json::json!({
                "tool_id": "query_component",
                "relationship": {
                    "relationship_type": "usage",
                    "relationship_strength": "strong",
                    "match_reason": "call site"
                }
            }),
        ];
        let edges = upgrade_tool_edges(&values);
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].tool_id, "edit_file");
        assert_eq!(
            edges[0].relationship.relationship_type,
            RelationshipType::Reference
        );
        assert_eq!(edges[0].relationship.match_reason, "legacy string reference");
        assert_eq!(
            edges[1].relationship.relationship_strength,
            RelationshipStrength::Strong
        );
    }

    #[test]
    fn python_patterns_classify_evidence() {
        let patterns = evidence_patterns("edit_file", "py");
        let content = "def edit_file(path):\n    pass\n";
        let hit = patterns
            .iter()
            .find(|p| p.regex.is_match(content))
            .expect("definition pattern should match");
        assert_eq!(hit.relationship_type, RelationshipType::Implementation);
        assert_eq!(hit.strength, RelationshipStrength::VeryStrong);

        let call = "result = edit_file(path)\n";
        let hit = patterns
            .iter()
            .find(|p| p.regex.is_match(call))
            .expect("call pattern should match");
        assert_eq!(hit.relationship_type, RelationshipType::Usage);
    }
}
