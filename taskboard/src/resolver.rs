//! Mini-librarian resolution: pick the named handler subsystems that
//! should service a task type.
//!
//! The resolver is intentionally layered and never fails: explicit
//! parameters, then the tool registry's routing table, then a hard-coded
//! default table, then the general assistant.

use std::collections::BTreeMap;

use serde_json::Value;

pub const GENERAL_ASSISTANT: &str = "general-assistant";
pub const FILE_INDEXER: &str = "file-indexer";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub mini_librarians: Vec<String>,
    /// Set when a substring match against a known task type was used.
    pub mapped_from: Option<String>,
    pub used_default: bool,
    pub used_fallback: bool,
}

const COMPONENT_ANALYSIS: &[&str] = &["component-analyzer"];
const FIND_USAGES: &[&str] = &["file-indexer", "component-analyzer"];
const CODE_MODIFICATION: &[&str] = &["file-indexer", "component-analyzer", "code-modifier"];
const FILE_SEARCH: &[&str] = &["file-indexer"];
const TODO_MANAGEMENT: &[&str] = &["todo-manager"];
const DIAGNOSTICS: &[&str] = &["diagnostics-runner"];

/// Hard-coded fallback table for known task types.
pub fn default_mappings() -> BTreeMap<&'static str, &'static [&'static str]> {
    BTreeMap::from([
        ("component_analysis", COMPONENT_ANALYSIS),
        ("find_usages", FIND_USAGES),
        ("code_modification", CODE_MODIFICATION),
        ("file_search", FILE_SEARCH),
        ("todo_management", TODO_MANAGEMENT),
        ("diagnostics", DIAGNOSTICS),
    ])
}

fn to_owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn params_mention_files(params: &Value) -> bool {
    params
        .as_object()
        .is_some_and(|map| map.contains_key("file") || map.contains_key("path"))
}

/// Determine which mini-librarians should handle a task. An unknown task
/// type yields the general-assistant fallback; this function never errors.
pub fn determine_mini_librarians(
    task_type: &str,
    params: &Value,
    registry_mapping: Option<&BTreeMap<String, Vec<String>>>,
) -> Resolution {
    let mut resolution = Resolution {
        mini_librarians: Vec::new(),
        mapped_from: None,
        used_default: false,
        used_fallback: false,
    };

    if task_type.is_empty() {
        resolution.mini_librarians = vec![GENERAL_ASSISTANT.to_string()];
        resolution.used_fallback = true;
        return resolution;
    }

    // Explicitly requested handler set wins outright.
    if let Some(explicit) = params
        .get("mini_librarians")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .filter(|items| !items.is_empty())
    {
        resolution.mini_librarians = explicit;
        return resolution;
    }

    // Tool registry routing table: exact match, then substring match among
    // its known task types.
    if let Some(mapping) = registry_mapping {
        if let Some(librarians) = mapping.get(task_type) {
            resolution.mini_librarians = librarians.clone();
        } else if let Some((known, librarians)) = mapping
            .iter()
            .find(|(known, _)| known.contains(task_type) || task_type.contains(known.as_str()))
        {
            tracing::info!("using similar task type {known} for {task_type}");
            resolution.mini_librarians = librarians.clone();
            resolution.mapped_from = Some(known.clone());
        }
    }

    // Hard-coded defaults: exact, then substring inference.
    if resolution.mini_librarians.is_empty() {
        let defaults = default_mappings();
        if let Some(librarians) = defaults.get(task_type) {
            resolution.mini_librarians = to_owned(librarians);
            resolution.used_default = true;
        } else if let Some((known, librarians)) = defaults
            .iter()
            .find(|(known, _)| known.contains(task_type) || task_type.contains(*known))
        {
            resolution.mini_librarians = to_owned(librarians);
            resolution.mapped_from = Some(known.to_string());
            resolution.used_default = true;
        }
    }

    // Tasks touching files always get the file indexer.
    if params_mention_files(params) {
        let indexer = FILE_INDEXER.to_string();
        if !resolution.mini_librarians.contains(&indexer) {
            resolution.mini_librarians.push(indexer);
        }
    }

    if resolution.mini_librarians.is_empty() {
        resolution.mini_librarians = vec![GENERAL_ASSISTANT.to_string()];
        resolution.used_fallback = true;
    }
    resolution
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn explicit_parameters_win() {
        let resolution = determine_mini_librarians(
            "component_analysis",
            &json!({"mini_librarians": ["custom-analyzer"]}),
            None,
        );
        assert_eq!(resolution.mini_librarians, vec!["custom-analyzer"]);
        assert!(!resolution.used_default);
    }

    #[test]
    fn registry_mapping_beats_defaults() {
        let mapping = BTreeMap::from([(
            "component_analysis".to_string(),
            vec!["deep-analyzer".to_string()],
        )]);
        let resolution = determine_mini_librarians("component_analysis", &json!({}), Some(&mapping));
        assert_eq!(resolution.mini_librarians, vec!["deep-analyzer"]);
    }

    #[test]
    fn substring_match_records_mapped_from() {
        let mapping = BTreeMap::from([(
            "file_search".to_string(),
            vec!["file-indexer".to_string()],
        )]);
        let resolution =
            determine_mini_librarians("file_search_advanced", &json!({}), Some(&mapping));
        assert_eq!(resolution.mini_librarians, vec!["file-indexer"]);
        assert_eq!(resolution.mapped_from.as_deref(), Some("file_search"));
    }

    #[test]
    fn find_usages_uses_the_default_pair() {
        let resolution =
            determine_mini_librarians("find_usages", &json!({"file": "a.py"}), None);
        assert_eq!(
            resolution.mini_librarians,
            vec!["file-indexer", "component-analyzer"]
        );
        assert!(resolution.used_default);
    }

    #[test]
    fn file_parameters_pull_in_the_indexer() {
        let resolution =
            determine_mini_librarians("component_analysis", &json!({"path": "src"}), None);
        assert_eq!(
            resolution.mini_librarians,
            vec!["component-analyzer", "file-indexer"]
        );
    }

    #[test]
    fn unknown_task_type_falls_back_to_general_assistant() {
        let resolution = determine_mini_librarians("never_seen_type", &json!({}), None);
        assert_eq!(resolution.mini_librarians, vec![GENERAL_ASSISTANT]);
        assert!(resolution.used_fallback);
    }
}
