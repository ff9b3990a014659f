//! On-disk document types for the tool reference layout.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::catalog::ToolParam;

pub const TOOLREF_VERSION: &str = "1.0.0";

fn is_false(b: &bool) -> bool {
    !*b
}

/// Entry in the master tool list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolRecord {
    pub id: String,
    pub description: String,
    pub category: String,
    pub profile_path: String,
    pub parameters_count: usize,
    pub has_profile: bool,
}

/// Task-type routing table consumed by the task board resolver.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskboardIntegration {
    pub task_type_to_mini_librarian_mapping: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolRegistryDoc {
    pub version: String,
    pub description: String,
    pub last_updated: String,
    pub tools: BTreeMap<String, ToolRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taskboard_integration: Option<TaskboardIntegration>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryEntry {
    pub name: String,
    pub description: String,
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoriesDoc {
    pub version: String,
    pub description: String,
    pub categories: BTreeMap<String, CategoryEntry>,
}

/// Detailed per-tool profile. Cross-reference fields are written by the
/// reference builder and kept opaque here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolProfile {
    pub tool_id: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub primary_purpose: String,
    #[serde(default)]
    pub parameters: Vec<ToolParam>,
    #[serde(default)]
    pub return_type: String,
    #[serde(default)]
    pub usage_examples: Vec<String>,
    #[serde(default)]
    pub always_use_when: Vec<String>,
    #[serde(default)]
    pub never_use_when: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub component_references: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_references_summary: Option<Value>,
    #[serde(default, rename = "_fallback_profile", skip_serializing_if = "is_false")]
    pub fallback_profile: bool,
}

impl ToolProfile {
    /// Minimal profile synthesised when the registry references a profile
    /// file that does not exist.
    pub fn fallback(tool_id: &str) -> Self {
        Self {
            tool_id: tool_id.to_string(),
            category: String::new(),
            primary_purpose: format!("Function {tool_id} - refer to its documentation"),
            parameters: Vec::new(),
            return_type: String::new(),
            usage_examples: Vec::new(),
            always_use_when: Vec::new(),
            never_use_when: Vec::new(),
            component_references: Vec::new(),
            component_references_summary: None,
            fallback_profile: true,
        }
    }
}

/// Group of related tools with common call sequences.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelationshipGroup {
    pub group_name: String,
    pub description: String,
    pub tools: Vec<String>,
    #[serde(default)]
    pub common_sequences: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionBranch {
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionNode {
    pub id: String,
    pub question: String,
    pub branches: Vec<DecisionBranch>,
}

/// Node graph used for tool selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionTree {
    pub tree_id: String,
    pub description: String,
    pub decision_nodes: Vec<DecisionNode>,
}
