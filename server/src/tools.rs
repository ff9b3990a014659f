//! The explicit tool table: every externally callable operation with its
//! parameter schema. This table is what the tool registry store introspects
//! to build `.tool_reference/`, replacing any decorator-style registration.

use librarian_toolref::ToolParam;
use librarian_toolref::ToolSpec;
use serde_json::json;

pub fn build_catalog() -> Vec<ToolSpec> {
    vec![
        ToolSpec::new(
            "list_allowed_directories",
            "server",
            "List the directories this server is allowed to access",
        )
        .returns("array"),
        ToolSpec::new(
            "check_project_access",
            "server",
            "Check whether the server may access a project directory",
        )
        .param(ToolParam::required("project_path", "string"))
        .example("check_project_access(\"/home/user/project\")"),
        ToolSpec::new(
            "initialize_librarian",
            "librarian",
            "Create the AI reference for a project and start monitoring it",
        )
        .param(ToolParam::required("project_path", "string"))
        .example("initialize_librarian(\"/home/user/project\")"),
        ToolSpec::new(
            "generate_librarian",
            "librarian",
            "Refresh the AI reference for an initialized project",
        )
        .param(ToolParam::required("project_path", "string")),
        ToolSpec::new(
            "query_component",
            "librarian",
            "Locate a class or function and return its source",
        )
        .param(ToolParam::required("project_path", "string"))
        .param(ToolParam::required("component_name", "string"))
        .example("query_component(\"/home/user/project\", \"TaskQueue\")"),
        ToolSpec::new(
            "find_implementation",
            "librarian",
            "Search project files for a text fragment with context",
        )
        .param(ToolParam::required("project_path", "string"))
        .param(ToolParam::required("search_text", "string"))
        .param(ToolParam::optional("file_pattern", "string", json!(null))),
        ToolSpec::new(
            "find_related_files",
            "librarian",
            "Find files related to a file through imports, names and references",
        )
        .param(ToolParam::required("project_path", "string"))
        .param(ToolParam::required("file_path", "string")),
        ToolSpec::new(
            "initialize_tool_index",
            "unified",
            "Create the tool reference catalog for a project",
        )
        .param(ToolParam::required("project_path", "string")),
        ToolSpec::new(
            "initialize_ai_dev_toolkit",
            "unified",
            "Initialize the AI reference, the tool reference and their cross-references",
        )
        .param(ToolParam::required("project_path", "string")),
        ToolSpec::new(
            "get_unified_context",
            "unified",
            "Get the combined component/tool/cross-reference snapshot",
        )
        .param(ToolParam::required("project_path", "string")),
        ToolSpec::new(
            "build_cross_references",
            "unified",
            "Build bidirectional references between components and tools",
        )
        .param(ToolParam::required("project_path", "string")),
        ToolSpec::new(
            "find_related_tools",
            "unified",
            "Find tools related to a component",
        )
        .param(ToolParam::required("project_path", "string"))
        .param(ToolParam::required("component_name", "string")),
        ToolSpec::new(
            "find_related_components",
            "unified",
            "Find components related to a tool",
        )
        .param(ToolParam::required("project_path", "string"))
        .param(ToolParam::required("tool_id", "string")),
        ToolSpec::new(
            "think",
            "taskboard",
            "Start a deep analysis task for a complex problem",
        )
        .param(ToolParam::required("project_path", "string"))
        .param(ToolParam::required("query", "string"))
        .param(ToolParam::optional("priority", "string", json!("high"))),
        ToolSpec::new(
            "submit_background_task",
            "taskboard",
            "Submit a task for asynchronous processing",
        )
        .param(ToolParam::required("project_path", "string"))
        .param(ToolParam::required("task_type", "string"))
        .param(ToolParam::optional("parameters", "object", json!({})))
        .param(ToolParam::optional("priority", "string", json!("medium")))
        .example("submit_background_task(\"/p\", \"find_usages\", {\"file\": \"a.py\"}, \"high\")"),
        ToolSpec::new(
            "get_task_status",
            "taskboard",
            "Get the status record of a background task",
        )
        .param(ToolParam::required("project_path", "string"))
        .param(ToolParam::required("task_id", "string")),
        ToolSpec::new(
            "get_task_result",
            "taskboard",
            "Get the result of a finished background task",
        )
        .param(ToolParam::required("project_path", "string"))
        .param(ToolParam::required("task_id", "string")),
        ToolSpec::new(
            "cancel_task",
            "taskboard",
            "Cancel a pending background task",
        )
        .param(ToolParam::required("project_path", "string"))
        .param(ToolParam::required("task_id", "string")),
        ToolSpec::new("list_tasks", "taskboard", "List background tasks")
            .param(ToolParam::required("project_path", "string"))
            .param(ToolParam::optional("status", "string", json!(null)))
            .param(ToolParam::optional("task_type", "string", json!(null))),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_covers_the_full_tool_surface() {
        let catalog = build_catalog();
        assert_eq!(catalog.len(), 19);

        let ids: Vec<&str> = catalog.iter().map(|t| t.id.as_str()).collect();
        for required in [
            "think",
            "list_allowed_directories",
            "check_project_access",
            "initialize_librarian",
            "generate_librarian",
            "query_component",
            "find_implementation",
            "initialize_tool_index",
            "initialize_ai_dev_toolkit",
            "find_related_files",
            "get_unified_context",
            "build_cross_references",
            "find_related_tools",
            "find_related_components",
            "submit_background_task",
            "get_task_status",
            "get_task_result",
            "cancel_task",
            "list_tasks",
        ] {
            assert!(ids.contains(&required), "missing tool {required}");
        }

        // Every tool except the directory listing takes a project path.
        for spec in &catalog {
            if spec.id == "list_allowed_directories" {
                continue;
            }
            assert!(
                spec.parameters.iter().any(|p| p.name == "project_path"),
                "{} lacks project_path",
                spec.id
            );
        }
    }
}
