//! Core facade: the single layer every externally callable operation
//! passes through.
//!
//! The facade enforces the allowed-roots policy on every path argument,
//! pauses the change monitor for the duration of mutating operations
//! (released on all exit paths), routes calls to the engine, the reference
//! builder, the context cache and the task board, and normalises every
//! failure into a uniform `{"status": "error", "message"}` result.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use librarian_core::IndexEngine;
use librarian_core::IndexStore;
use librarian_core::LibrarianError;
use librarian_core::ExecutionTracer;
use librarian_refs::ContextCache;
use librarian_refs::CrossReferenceBuilder;
use librarian_refs::related_components;
use librarian_refs::related_tools;
use librarian_taskboard::HandlerRegistry;
use librarian_taskboard::TaskBoard;
use librarian_taskboard::TaskBoardConfig;
use librarian_taskboard::TaskPriority;
use librarian_taskboard::TaskStatus;
use librarian_toolref::ToolReferenceStore;
use librarian_toolref::ToolSpec;
use serde_json::Value;
use serde_json::json;
use tokio::sync::Mutex;

type OpResult = std::result::Result<Value, FacadeError>;

#[derive(Debug, thiserror::Error)]
enum FacadeError {
    #[error(transparent)]
    Core(#[from] LibrarianError),
    #[error(transparent)]
    ToolRef(#[from] librarian_toolref::ToolRefError),
    #[error(transparent)]
    Refs(#[from] librarian_refs::RefsError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Sets the monitor pause flag for the duration of a user-initiated
/// operation; the flag is guaranteed to clear on every exit path.
struct PauseGuard {
    engine: IndexEngine,
}

impl PauseGuard {
    fn new(engine: &IndexEngine) -> Self {
        engine.pause_monitoring();
        Self {
            engine: engine.clone(),
        }
    }
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        self.engine.resume_monitoring();
    }
}

pub struct Facade {
    engine: IndexEngine,
    cache: Arc<ContextCache>,
    boards: Mutex<HashMap<PathBuf, TaskBoard>>,
    catalog: Arc<Vec<ToolSpec>>,
}

impl Facade {
    pub fn new(engine: IndexEngine, catalog: Vec<ToolSpec>) -> Self {
        Self {
            engine,
            cache: Arc::new(ContextCache::default()),
            boards: Mutex::new(HashMap::new()),
            catalog: Arc::new(catalog),
        }
    }

    pub fn engine(&self) -> &IndexEngine {
        &self.engine
    }

    pub fn context_cache(&self) -> Arc<ContextCache> {
        self.cache.clone()
    }

    pub fn catalog(&self) -> &[ToolSpec] {
        &self.catalog
    }

    /// Dispatch one tool call and shape the outcome for the transport.
    pub async fn handle(&self, tool: &str, args: &Value) -> Value {
        let started = Instant::now();
        let outcome = self.dispatch(tool, args).await;
        let execution_ms = started.elapsed().as_secs_f64() * 1000.0;

        let (value, error) = match outcome {
            Ok(value) => (value, None),
            Err(err) => {
                tracing::warn!("{tool} failed: {err}");
                (
                    json!({"status": "error", "message": err.to_string()}),
                    Some(err.to_string()),
                )
            }
        };
        self.trace(tool, args, &value, execution_ms, error.as_deref());
        value
    }

    /// One trace entry per synchronous entry point, written only for
    /// projects that already carry a reference directory.
    fn trace(&self, tool: &str, args: &Value, value: &Value, execution_ms: f64, error: Option<&str>) {
        let Some(project) = args.get("project_path").and_then(Value::as_str) else {
            return;
        };
        let root = PathBuf::from(project);
        if !self.engine.allowed_roots().is_allowed(&root)
            || !IndexStore::new(&root).is_initialized()
        {
            return;
        }
        let status = if value.get("status").and_then(Value::as_str) == Some("error") {
            "error"
        } else {
            "success"
        };
        ExecutionTracer::new(&root).record_operation(tool, args, status, execution_ms, error, None);
    }

    async fn dispatch(&self, tool: &str, args: &Value) -> OpResult {
        match tool {
            "list_allowed_directories" => self.list_allowed_directories(),
            "check_project_access" => self.check_project_access(args),
            "initialize_librarian" => self.initialize_librarian(args).await,
            "generate_librarian" => self.generate_librarian(args).await,
            "query_component" => self.query_component(args).await,
            "find_implementation" => self.find_implementation(args).await,
            "find_related_files" => self.find_related_files(args).await,
            "initialize_tool_index" => self.initialize_tool_index(args).await,
            "initialize_ai_dev_toolkit" => self.initialize_ai_dev_toolkit(args).await,
            "get_unified_context" => self.get_unified_context(args).await,
            "build_cross_references" => self.build_cross_references(args).await,
            "find_related_tools" => self.find_related_tools(args).await,
            "find_related_components" => self.find_related_components(args).await,
            "think" => self.think(args).await,
            "submit_background_task" => self.submit_background_task(args).await,
            "get_task_status" => self.get_task_status(args).await,
            "get_task_result" => self.get_task_result(args).await,
            "cancel_task" => self.cancel_task(args).await,
            "list_tasks" => self.list_tasks(args).await,
            other => Ok(json!({
                "status": "error",
                "message": format!("unknown tool '{other}'"),
            })),
        }
    }

    fn require_str<'a>(&self, args: &'a Value, name: &str) -> Result<&'a str, FacadeError> {
        args.get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                LibrarianError::InvalidState(format!("missing required argument: {name}")).into()
            })
    }

    /// Allowed-roots gate applied to every project path argument.
    fn project_root(&self, args: &Value) -> Result<PathBuf, FacadeError> {
        let raw = self.require_str(args, "project_path")?;
        Ok(self.engine.allowed_roots().check(Path::new(raw))?)
    }

    fn list_allowed_directories(&self) -> OpResult {
        let roots: Vec<String> = self
            .engine
            .allowed_roots()
            .roots()
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        Ok(json!(roots))
    }

    fn check_project_access(&self, args: &Value) -> OpResult {
        let raw = self.require_str(args, "project_path")?;
        let path = Path::new(raw);
        if !self.engine.allowed_roots().is_allowed(path) {
            return Ok(json!({
                "status": "error",
                "message": format!(
                    "access denied: {raw} is not within allowed directories"
                ),
            }));
        }
        if !path.is_dir() {
            return Ok(json!({
                "status": "error",
                "message": format!("directory does not exist: {raw}"),
            }));
        }
        Ok(json!({
            "status": "success",
            "message": format!(
                "The server has permission to access: {raw}. \
                 You can initialize the librarian for this project."
            ),
        }))
    }

    async fn initialize_librarian(&self, args: &Value) -> OpResult {
        let root = self.project_root(args)?;
        let _pause = PauseGuard::new(&self.engine);
        let report = self.engine.initialize(&root).await?;
        Ok(json!({"status": "success", "message": report}))
    }

    async fn generate_librarian(&self, args: &Value) -> OpResult {
        let root = self.project_root(args)?;
        let _pause = PauseGuard::new(&self.engine);
        let report = self.engine.generate(&root).await?;
        Ok(json!({"status": "success", "message": report}))
    }

    async fn query_component(&self, args: &Value) -> OpResult {
        let root = self.project_root(args)?;
        let name = self.require_str(args, "component_name")?;
        let _pause = PauseGuard::new(&self.engine);
        let hits = self.engine.query_component(&root, name).await?;
        Ok(json!({
            "status": "success",
            "component_name": name,
            "found": true,
            "count": hits.len(),
            "results": hits,
        }))
    }

    async fn find_implementation(&self, args: &Value) -> OpResult {
        let root = self.project_root(args)?;
        let search_text = self.require_str(args, "search_text")?;
        let file_pattern = args.get("file_pattern").and_then(Value::as_str);
        let _pause = PauseGuard::new(&self.engine);
        let results = self
            .engine
            .find_implementation(&root, search_text, file_pattern)
            .await?;
        if results.is_empty() {
            return Ok(json!({
                "status": "success",
                "found": false,
                "message": format!("No matches found for '{search_text}'"),
            }));
        }
        Ok(json!({
            "status": "success",
            "found": true,
            "search_text": search_text,
            "file_pattern": file_pattern,
            "count": results.len(),
            "results": results,
        }))
    }

    async fn find_related_files(&self, args: &Value) -> OpResult {
        let root = self.project_root(args)?;
        let file_path = self.require_str(args, "file_path")?;
        // The file argument is validated too once resolved under the root.
        let resolved = if Path::new(file_path).is_absolute() {
            PathBuf::from(file_path)
        } else {
            root.join(file_path)
        };
        self.engine.allowed_roots().check(&resolved)?;

        let _pause = PauseGuard::new(&self.engine);
        let related = self.engine.find_related_files(&root, &resolved).await?;
        let unique = related.unique_paths();
        let total = related.total();
        Ok(json!({
            "status": "success",
            "file": file_path,
            "related_files": related,
            "total_related": total,
            "unique_related": unique,
            "message": format!("Found {unique} unique files related to {file_path}"),
        }))
    }

    async fn initialize_tool_index(&self, args: &Value) -> OpResult {
        let root = self.project_root(args)?;
        if !root.is_dir() {
            return Err(LibrarianError::NotFound(format!(
                "directory does not exist: {}",
                root.display()
            ))
            .into());
        }
        let _pause = PauseGuard::new(&self.engine);
        let store = ToolReferenceStore::new(&root);
        let summary = store.initialize(&self.catalog)?;

        // With an AI reference present the two systems are linked
        // immediately; a failure here degrades, it does not abort.
        let mut cross_refs = 0usize;
        if IndexStore::new(&root).is_initialized() {
            match CrossReferenceBuilder::new(&root).build() {
                Ok(xref) => cross_refs = xref.component_to_tool_references,
                Err(err) => tracing::warn!("cross-reference build failed: {err}"),
            }
            self.cache.invalidate(&root).await;
        }

        Ok(json!({
            "status": "success",
            "message": format!(
                "Tool reference initialized for {} with {} tools",
                root.display(),
                summary.tool_count
            ),
            "tool_count": summary.tool_count,
            "profile_count": summary.profile_count,
            "relationship_count": summary.relationship_count,
            "decision_tree_count": summary.decision_tree_count,
            "cross_references": cross_refs,
        }))
    }

    async fn initialize_ai_dev_toolkit(&self, args: &Value) -> OpResult {
        let root = self.project_root(args)?;
        let _pause = PauseGuard::new(&self.engine);

        self.engine.initialize(&root).await?;
        let summary = ToolReferenceStore::new(&root).initialize(&self.catalog)?;
        let xref = CrossReferenceBuilder::new(&root).build()?;
        self.cache.invalidate(&root).await;

        let (file_count, component_count) =
            self.engine.project_counts(&root).await.unwrap_or((0, 0));

        let details = format!(
            "AI Dev Toolkit initialization complete for {}\n\n\
             Librarian index:\n\
             - {file_count} files indexed\n\
             - {component_count} components identified\n\n\
             Tool reference:\n\
             - {} tools registered\n\
             - {} tool profiles\n\
             - {} relationship groups\n\
             - {} decision trees\n\n\
             Cross-references:\n\
             - {} component-to-tool references\n\
             - {} tool-to-component references",
            root.display(),
            summary.tool_count,
            summary.profile_count,
            summary.relationship_count,
            summary.decision_tree_count,
            xref.component_to_tool_references,
            xref.tool_to_component_references,
        );

        Ok(json!({
            "status": "success",
            "message": "AI Dev Toolkit successfully initialized",
            "ai_librarian": {
                "file_count": file_count,
                "component_count": component_count,
            },
            "tool_reference": {
                "tool_count": summary.tool_count,
                "profile_count": summary.profile_count,
                "relationship_count": summary.relationship_count,
                "decision_tree_count": summary.decision_tree_count,
            },
            "cross_references": {
                "count": xref.component_to_tool_references,
            },
            "details": details,
        }))
    }

    async fn get_unified_context(&self, args: &Value) -> OpResult {
        let root = self.project_root(args)?;
        let context = self.cache.get(&root).await;
        let mut value = serde_json::to_value(context)?;
        if let Some(map) = value.as_object_mut() {
            map.insert("status".to_string(), json!("success"));
        }
        Ok(value)
    }

    async fn build_cross_references(&self, args: &Value) -> OpResult {
        let root = self.project_root(args)?;
        let _pause = PauseGuard::new(&self.engine);
        let summary = CrossReferenceBuilder::new(&root).build()?;
        // Queries observe the new edges immediately, not after the TTL.
        self.cache.invalidate(&root).await;
        Ok(json!({
            "status": "success",
            "message": "Successfully built bidirectional cross-references",
            "component_to_tool_references": summary.component_to_tool_references,
            "tool_to_component_references": summary.tool_to_component_references,
            "components_with_references": summary.components_with_references,
            "tools_with_references": summary.tools_with_references,
        }))
    }

    async fn find_related_tools(&self, args: &Value) -> OpResult {
        let root = self.project_root(args)?;
        let name = self.require_str(args, "component_name")?;
        let context = self.cache.get(&root).await;
        let related = related_tools(&context, name)?;
        let count = related.len();
        Ok(json!({
            "status": "success",
            "component": name,
            "related_tools": related,
            "count": count,
        }))
    }

    async fn find_related_components(&self, args: &Value) -> OpResult {
        let root = self.project_root(args)?;
        let tool_id = self.require_str(args, "tool_id")?;
        let context = self.cache.get(&root).await;
        let related = related_components(&context, tool_id)?;
        let count = related.len();
        Ok(json!({
            "status": "success",
            "tool": tool_id,
            "related_components": related,
            "count": count,
        }))
    }

    /// Lazily created per-project board with the built-in handler set.
    async fn board_for(&self, root: &Path) -> TaskBoard {
        let mut boards = self.boards.lock().await;
        if let Some(board) = boards.get(root) {
            return board.clone();
        }
        let board = TaskBoard::new(
            root,
            TaskBoardConfig::default(),
            builtin_handlers(self.catalog.clone()),
        )
        .await;
        boards.insert(root.to_path_buf(), board.clone());
        board
    }

    pub async fn shutdown_boards(&self) {
        let boards = self.boards.lock().await;
        for board in boards.values() {
            board.shutdown().await;
        }
    }

    /// Deep analysis is ordinary task submission with a high default
    /// priority; the host polls the returned ID like any other task.
    async fn think(&self, args: &Value) -> OpResult {
        let root = self.project_root(args)?;
        let query = self.require_str(args, "query")?;
        let priority = args
            .get("priority")
            .and_then(Value::as_str)
            .map(TaskPriority::parse)
            .unwrap_or(TaskPriority::High);
        let board = self.board_for(&root).await;
        let task_id = board
            .submit("deep_analysis", json!({"query": query}), priority, None)
            .await;
        Ok(json!({"status": "success", "task_id": task_id}))
    }

    async fn submit_background_task(&self, args: &Value) -> OpResult {
        let root = self.project_root(args)?;
        let task_type = self.require_str(args, "task_type")?;
        let parameters = args.get("parameters").cloned().unwrap_or_else(|| json!({}));
        let priority = args
            .get("priority")
            .and_then(Value::as_str)
            .map(TaskPriority::parse)
            .unwrap_or(TaskPriority::Medium);
        let timeout = args.get("timeout").and_then(Value::as_u64);

        let board = self.board_for(&root).await;
        let task_id = board.submit(task_type, parameters, priority, timeout).await;
        Ok(json!({"status": "success", "task_id": task_id}))
    }

    async fn get_task_status(&self, args: &Value) -> OpResult {
        let root = self.project_root(args)?;
        let task_id = self.require_str(args, "task_id")?;
        let board = self.board_for(&root).await;
        let Some(record) = board.status(task_id).await else {
            return Err(LibrarianError::NotFound(format!("task: {task_id}")).into());
        };
        // The record's own `status` field is the task status; it never
        // collides with the "error" envelope.
        Ok(serde_json::to_value(record)?)
    }

    async fn get_task_result(&self, args: &Value) -> OpResult {
        let root = self.project_root(args)?;
        let task_id = self.require_str(args, "task_id")?;
        let board = self.board_for(&root).await;
        let Some(record) = board.status(task_id).await else {
            return Err(LibrarianError::NotFound(format!("task: {task_id}")).into());
        };
        if !record.status.is_terminal() {
            return Err(LibrarianError::InvalidState(format!(
                "task {task_id} has not finished ({})",
                record.status.as_str()
            ))
            .into());
        }
        let result = board.result(task_id).await;
        Ok(json!({
            "status": "success",
            "task_id": task_id,
            "task_status": record.status.as_str(),
            "result": result,
        }))
    }

    async fn cancel_task(&self, args: &Value) -> OpResult {
        let root = self.project_root(args)?;
        let task_id = self.require_str(args, "task_id")?;
        let board = self.board_for(&root).await;
        let cancelled = board.cancel(task_id).await;
        Ok(json!({
            "status": "success",
            "task_id": task_id,
            "cancelled": cancelled,
        }))
    }

    async fn list_tasks(&self, args: &Value) -> OpResult {
        let root = self.project_root(args)?;
        let status = args
            .get("status")
            .and_then(Value::as_str)
            .and_then(TaskStatus::parse);
        let task_type = args.get("task_type").and_then(Value::as_str);
        let board = self.board_for(&root).await;
        let tasks = board.list(status, task_type, 100).await;
        Ok(json!({
            "status": "success",
            "count": tasks.len(),
            "tasks": tasks,
        }))
    }
}

/// Built-in handler set for every project board. `tool_reference` tasks
/// rebuild the catalog or the cross-references; everything else is routed
/// through the mini-librarian resolver.
fn builtin_handlers(catalog: Arc<Vec<ToolSpec>>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register("tool_reference", move |ctx, params| {
        let operation = params
            .get("operation")
            .and_then(Value::as_str)
            .unwrap_or("initialize");
        match operation {
            "initialize" | "update" => {
                let summary = ToolReferenceStore::new(&ctx.project_root)
                    .initialize(&catalog)
                    .map_err(|e| e.to_string())?;
                Ok(json!({
                    "operation": operation,
                    "tool_count": summary.tool_count,
                    "profile_count": summary.profile_count,
                    "mini_librarians_used": ctx.mini_librarians,
                }))
            }
            "cross_reference" => {
                let summary = CrossReferenceBuilder::new(&ctx.project_root)
                    .build()
                    .map_err(|e| e.to_string())?;
                let mut value = serde_json::to_value(summary).map_err(|e| e.to_string())?;
                if let Some(map) = value.as_object_mut() {
                    map.insert("operation".to_string(), json!(operation));
                }
                Ok(value)
            }
            other => Err(format!("unknown tool reference operation: {other}")),
        }
    });
    registry
}
