//! The task board: a priority queue, a small worker pool and persistent
//! task records under `.ai_reference/task_board/tasks/`.
//!
//! Handlers run on blocking threads with a bounded wait; a handler that
//! outlives its deadline is marked `timeout` and its eventual result is
//! discarded. Handlers cannot be preempted, so they receive a cancellation
//! flag they are expected to poll during long work.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::collections::BinaryHeap;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use librarian_core::ExecutionTracer;
use librarian_toolref::ToolReferenceStore;
use serde_json::Value;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::resolver::Resolution;
use crate::resolver::determine_mini_librarians;
use crate::types::DEFAULT_TASK_TIMEOUT_SECS;
use crate::types::TaskPriority;
use crate::types::TaskRecord;
use crate::types::TaskResult;
use crate::types::TaskStatus;

const DEQUEUE_POLL: Duration = Duration::from_secs(1);
const CLEANUP_AGE_DAYS: i64 = 7;

pub type HandlerOutcome = std::result::Result<Value, String>;

/// Context handed to every handler invocation. Long-running handlers must
/// poll `cancelled` and bail out early when it is set.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub project_root: PathBuf,
    pub cancelled: Arc<AtomicBool>,
    pub mini_librarians: Vec<String>,
}

impl HandlerContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

pub type TaskHandler = Arc<dyn Fn(&HandlerContext, &Value) -> HandlerOutcome + Send + Sync>;

/// Task-type registry: the first level of handler resolution. Task types
/// with no registered handler fall through to the mini-librarian resolver.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, TaskHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        task_type: &str,
        handler: impl Fn(&HandlerContext, &Value) -> HandlerOutcome + Send + Sync + 'static,
    ) {
        self.handlers.insert(task_type.to_string(), Arc::new(handler));
    }

    pub fn get(&self, task_type: &str) -> Option<TaskHandler> {
        self.handlers.get(task_type).cloned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct QueueEntry {
    priority: u8,
    seq: u64,
    task_id: String,
}

#[derive(Debug, Clone, Copy)]
pub struct TaskBoardConfig {
    pub workers: usize,
    pub default_timeout_secs: u64,
}

impl Default for TaskBoardConfig {
    fn default() -> Self {
        // One worker by default to bound contention with the request path.
        Self {
            workers: 1,
            default_timeout_secs: DEFAULT_TASK_TIMEOUT_SECS,
        }
    }
}

struct BoardInner {
    project_root: PathBuf,
    tasks_dir: PathBuf,
    tasks: Mutex<HashMap<String, TaskRecord>>,
    queue: Mutex<BinaryHeap<Reverse<QueueEntry>>>,
    notify: Notify,
    seq: AtomicU64,
    shutdown: AtomicBool,
    handlers: HandlerRegistry,
    config: TaskBoardConfig,
    tracer: ExecutionTracer,
}

/// Per-project task board handle.
#[derive(Clone)]
pub struct TaskBoard {
    inner: Arc<BoardInner>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl TaskBoard {
    /// Create the board, restore persisted tasks (requeueing any that were
    /// still pending) and start the worker pool.
    pub async fn new(project_root: &Path, config: TaskBoardConfig, handlers: HandlerRegistry) -> Self {
        let tasks_dir = project_root
            .join(".ai_reference")
            .join("task_board")
            .join("tasks");
        if let Err(err) = fs::create_dir_all(&tasks_dir) {
            tracing::error!("cannot create task storage {}: {err}", tasks_dir.display());
        }

        let inner = Arc::new(BoardInner {
            project_root: project_root.to_path_buf(),
            tasks_dir,
            tasks: Mutex::new(HashMap::new()),
            queue: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            seq: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            handlers,
            config,
            tracer: ExecutionTracer::new(project_root),
        });

        inner.restore_tasks().await;

        let mut workers = Vec::with_capacity(config.workers.max(1));
        for index in 0..config.workers.max(1) {
            let inner = inner.clone();
            workers.push(tokio::spawn(async move {
                tracing::debug!("task worker {index} started");
                worker_loop(inner).await;
            }));
        }

        let board = Self {
            inner,
            workers: Arc::new(Mutex::new(workers)),
        };
        let purged = board.cleanup().await;
        if purged > 0 {
            tracing::info!("purged {purged} expired task records");
        }
        board
    }

    /// Submit a task; returns its ID immediately.
    pub async fn submit(
        &self,
        task_type: &str,
        parameters: Value,
        priority: TaskPriority,
        timeout_secs: Option<u64>,
    ) -> String {
        let id = format!(
            "task-{}",
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let record = TaskRecord {
            id: id.clone(),
            task_type: task_type.to_string(),
            parameters,
            priority,
            status: TaskStatus::Pending,
            created_at: now_rfc3339(),
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            timeout: timeout_secs.unwrap_or(self.inner.config.default_timeout_secs),
            error: None,
            execution_time_ms: None,
            result: None,
        };

        {
            let mut tasks = self.inner.tasks.lock().await;
            self.inner.persist(&record);
            tasks.insert(id.clone(), record);
        }
        self.inner.enqueue(priority.value(), &id).await;
        tracing::info!("submitted task {id} of type {task_type}");
        id
    }

    pub async fn status(&self, task_id: &str) -> Option<TaskRecord> {
        self.inner.tasks.lock().await.get(task_id).cloned()
    }

    /// Result record, available only once the task is terminal.
    pub async fn result(&self, task_id: &str) -> Option<TaskResult> {
        let tasks = self.inner.tasks.lock().await;
        let task = tasks.get(task_id)?;
        if task.status.is_terminal() {
            task.result.clone()
        } else {
            None
        }
    }

    /// Cancel a pending task. Running or terminal tasks cannot be
    /// cancelled; the next worker to dequeue a cancelled ID skips it.
    pub async fn cancel(&self, task_id: &str) -> bool {
        let mut tasks = self.inner.tasks.lock().await;
        let Some(task) = tasks.get_mut(task_id) else {
            return false;
        };
        if task.status != TaskStatus::Pending {
            return false;
        }
        task.status = TaskStatus::Cancelled;
        task.cancelled_at = Some(now_rfc3339());
        self.inner.persist(task);
        true
    }

    pub async fn list(
        &self,
        status: Option<TaskStatus>,
        task_type: Option<&str>,
        limit: usize,
    ) -> Vec<TaskRecord> {
        let tasks = self.inner.tasks.lock().await;
        let mut records: Vec<TaskRecord> = tasks
            .values()
            .filter(|t| status.is_none_or(|s| t.status == s))
            .filter(|t| task_type.is_none_or(|ty| t.task_type == ty))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records.truncate(limit);
        records
    }

    /// Opportunistic purge of terminal records older than seven days.
    pub async fn cleanup(&self) -> usize {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(CLEANUP_AGE_DAYS);
        let mut tasks = self.inner.tasks.lock().await;
        let expired: Vec<String> = tasks
            .values()
            .filter(|t| t.status.is_terminal())
            .filter(|t| {
                let finished = t.completed_at.as_deref().or(t.cancelled_at.as_deref());
                finished
                    .and_then(|ts| chrono::DateTime::parse_from_rfc3339(ts).ok())
                    .is_some_and(|ts| ts.with_timezone(&chrono::Utc) < cutoff)
            })
            .map(|t| t.id.clone())
            .collect();
        for id in &expired {
            tasks.remove(id);
            let path = self.inner.tasks_dir.join(format!("{id}.json"));
            if let Err(err) = fs::remove_file(&path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("removing task file {}: {err}", path.display());
                }
            }
        }
        expired.len()
    }

    /// Stop the workers. In-flight handlers finish on their own threads.
    pub async fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
        let mut workers = self.workers.lock().await;
        for worker in workers.drain(..) {
            let _ = tokio::time::timeout(Duration::from_secs(2), worker).await;
        }
    }
}

impl BoardInner {
    async fn enqueue(&self, priority: u8, task_id: &str) {
        let entry = QueueEntry {
            priority,
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            task_id: task_id.to_string(),
        };
        self.queue.lock().await.push(Reverse(entry));
        self.notify.notify_one();
    }

    /// Write the full task record; every state transition lands on disk.
    fn persist(&self, record: &TaskRecord) {
        let path = self.tasks_dir.join(format!("{}.json", record.id));
        match serde_json::to_string_pretty(record) {
            Ok(body) => {
                if let Err(err) = fs::write(&path, body) {
                    tracing::error!("saving task {}: {err}", record.id);
                }
            }
            Err(err) => tracing::error!("serialising task {}: {err}", record.id),
        }
    }

    /// Restore records from disk; still-pending tasks are requeued in
    /// submission order.
    async fn restore_tasks(self: &Arc<Self>) {
        let Ok(entries) = fs::read_dir(&self.tasks_dir) else {
            return;
        };
        let mut pending: Vec<(String, u8, String)> = Vec::new();
        {
            let mut tasks = self.tasks.lock().await;
            for entry in entries.flatten() {
                if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let record: TaskRecord = match fs::read_to_string(entry.path())
                    .map_err(|e| e.to_string())
                    .and_then(|c| serde_json::from_str(&c).map_err(|e| e.to_string()))
                {
                    Ok(record) => record,
                    Err(err) => {
                        tracing::warn!("skipping task file {}: {err}", entry.path().display());
                        continue;
                    }
                };
                if record.status == TaskStatus::Pending {
                    pending.push((
                        record.created_at.clone(),
                        record.priority.value(),
                        record.id.clone(),
                    ));
                }
                tasks.insert(record.id.clone(), record);
            }
        }
        pending.sort();
        let restored = pending.len();
        for (_, priority, id) in pending {
            self.enqueue(priority, &id).await;
        }
        if restored > 0 {
            tracing::info!("requeued {restored} pending tasks");
        }
    }

    /// Execute one dequeued task end to end: pending re-check, dispatch on
    /// a blocking thread, bounded wait, terminal transition, trace entry.
    async fn process(self: &Arc<Self>, task_id: &str) {
        let (task_type, parameters, timeout_secs) = {
            let mut tasks = self.tasks.lock().await;
            let Some(task) = tasks.get_mut(task_id) else {
                return;
            };
            // It may have been cancelled between enqueue and pickup.
            if task.status != TaskStatus::Pending {
                return;
            }
            task.status = TaskStatus::Running;
            task.started_at = Some(now_rfc3339());
            self.persist(task);
            (task.task_type.clone(), task.parameters.clone(), task.timeout)
        };

        let start = Instant::now();
        let cancelled = Arc::new(AtomicBool::new(false));
        let mapping = ToolReferenceStore::new(&self.project_root).taskboard_mapping();
        let resolution = determine_mini_librarians(&task_type, &parameters, mapping.as_ref());

        let handler = self.handlers.get(&task_type);
        let context = HandlerContext {
            project_root: self.project_root.clone(),
            cancelled: cancelled.clone(),
            mini_librarians: resolution.mini_librarians.clone(),
        };
        let fallback = generic_result(&task_type, &resolution);
        let handler_params = parameters.clone();
        let work = tokio::task::spawn_blocking(move || match handler {
            Some(handler) => handler(&context, &handler_params),
            None => Ok(fallback),
        });

        let outcome = tokio::time::timeout(Duration::from_secs(timeout_secs), work).await;
        let execution_ms = start.elapsed().as_secs_f64() * 1000.0;

        let (status, data, error) = match outcome {
            Ok(Ok(Ok(data))) => (TaskStatus::Completed, data, None),
            Ok(Ok(Err(message))) => (TaskStatus::Failed, Value::Null, Some(message)),
            Ok(Err(join_err)) => (
                TaskStatus::Failed,
                Value::Null,
                Some(format!("handler panicked: {join_err}")),
            ),
            Err(_) => {
                // The orphan handler thread may still finish later; its
                // result is discarded. Ask it to stop early.
                cancelled.store(true, Ordering::SeqCst);
                (
                    TaskStatus::Timeout,
                    Value::Null,
                    Some(format!("Task timed out after {timeout_secs} seconds")),
                )
            }
        };

        let result = TaskResult {
            success: status == TaskStatus::Completed,
            data,
            error_message: error.clone(),
            execution_time_ms: execution_ms,
            metadata: BTreeMap::new(),
        };

        {
            let mut tasks = self.tasks.lock().await;
            if let Some(task) = tasks.get_mut(task_id) {
                task.status = status;
                task.completed_at = Some(now_rfc3339());
                task.execution_time_ms = Some(execution_ms);
                task.error = error.clone();
                task.result = Some(result);
                self.persist(task);
            }
        }

        let trace_status = match status {
            TaskStatus::Completed => "success",
            TaskStatus::Timeout => "timeout",
            _ => "error",
        };
        self.tracer.record_operation(
            &format!("taskboard_{task_type}"),
            &parameters,
            trace_status,
            execution_ms,
            error.as_deref(),
            Some(json!({"task_id": task_id})),
        );
    }
}

/// Result payload for task types serviced purely by mini-librarians.
fn generic_result(task_type: &str, resolution: &Resolution) -> Value {
    let mut data = json!({
        "status": "success",
        "task_type": task_type,
        "mini_librarians_used": resolution.mini_librarians,
        "used_fallback": resolution.used_fallback,
        "result": format!(
            "Executed {task_type} with {} mini-librarians",
            resolution.mini_librarians.len()
        ),
    });
    if let Some(mapped_from) = &resolution.mapped_from {
        data["mapped_from"] = Value::String(mapped_from.clone());
    }
    data
}

async fn worker_loop(inner: Arc<BoardInner>) {
    loop {
        if inner.shutdown.load(Ordering::SeqCst) {
            break;
        }
        let entry = inner.queue.lock().await.pop();
        match entry {
            Some(Reverse(entry)) => inner.process(&entry.task_id).await,
            None => {
                // Bounded wait so the shutdown flag is polled about once a
                // second even when nothing is submitted.
                let _ = tokio::time::timeout(DEQUEUE_POLL, inner.notify.notified()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use librarian_core::IndexStore;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    async fn wait_terminal(board: &TaskBoard, id: &str) -> TaskRecord {
        for _ in 0..200 {
            if let Some(record) = board.status(id).await {
                if record.status.is_terminal() {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {id} never reached a terminal state");
    }

    fn prepare_project(dir: &Path) {
        IndexStore::new(dir).ensure_layout().unwrap();
    }

    #[tokio::test]
    async fn known_task_type_completes_with_default_librarians() {
        let dir = tempdir().unwrap();
        prepare_project(dir.path());
        let board =
            TaskBoard::new(dir.path(), TaskBoardConfig::default(), HandlerRegistry::new()).await;

        let id = board
            .submit(
                "find_usages",
                json!({"file": "a.py"}),
                TaskPriority::High,
                None,
            )
            .await;
        assert!(id.starts_with("task-"));
        assert_eq!(id.len(), "task-".len() + 8);

        let record = wait_terminal(&board, &id).await;
        assert_eq!(record.status, TaskStatus::Completed);
        let result = board.result(&id).await.unwrap();
        assert!(result.success);
        assert_eq!(
            result.data["mini_librarians_used"],
            json!(["file-indexer", "component-analyzer"])
        );
        board.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_task_type_uses_general_assistant() {
        let dir = tempdir().unwrap();
        prepare_project(dir.path());
        let board =
            TaskBoard::new(dir.path(), TaskBoardConfig::default(), HandlerRegistry::new()).await;

        let id = board
            .submit("never_seen_type", json!({}), TaskPriority::Low, None)
            .await;
        let record = wait_terminal(&board, &id).await;
        assert_eq!(record.status, TaskStatus::Completed);
        let result = board.result(&id).await.unwrap();
        assert_eq!(result.data["mini_librarians_used"], json!(["general-assistant"]));
        assert_eq!(result.data["used_fallback"], json!(true));
        board.shutdown().await;
    }

    #[tokio::test]
    async fn registered_handlers_take_precedence() {
        let dir = tempdir().unwrap();
        prepare_project(dir.path());
        let mut handlers = HandlerRegistry::new();
        handlers.register("custom", |_ctx, params| {
            Ok(json!({"echo": params.clone()}))
        });
        let board = TaskBoard::new(dir.path(), TaskBoardConfig::default(), handlers).await;

        let id = board
            .submit("custom", json!({"x": 1}), TaskPriority::Medium, None)
            .await;
        let record = wait_terminal(&board, &id).await;
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.result.unwrap().data["echo"]["x"], json!(1));
        board.shutdown().await;
    }

    #[tokio::test]
    async fn handler_failure_becomes_a_terminal_record() {
        let dir = tempdir().unwrap();
        prepare_project(dir.path());
        let mut handlers = HandlerRegistry::new();
        handlers.register("broken", |_ctx, _params| Err("boom".to_string()));
        let board = TaskBoard::new(dir.path(), TaskBoardConfig::default(), handlers).await;

        let id = board
            .submit("broken", json!({}), TaskPriority::Medium, None)
            .await;
        let record = wait_terminal(&board, &id).await;
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("boom"));
        let result = board.result(&id).await.unwrap();
        assert!(!result.success);
        board.shutdown().await;
    }

    #[tokio::test]
    async fn slow_handler_times_out_exactly_once() {
        let dir = tempdir().unwrap();
        prepare_project(dir.path());
        let mut handlers = HandlerRegistry::new();
        handlers.register("slow", |ctx, _params| {
            for _ in 0..100 {
                if ctx.is_cancelled() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(100));
            }
            Ok(Value::Null)
        });
        let board = TaskBoard::new(dir.path(), TaskBoardConfig::default(), handlers).await;

        let id = board
            .submit("slow", json!({}), TaskPriority::High, Some(1))
            .await;
        let record = wait_terminal(&board, &id).await;
        assert_eq!(record.status, TaskStatus::Timeout);
        assert!(record.error.unwrap().contains("timed out after 1 seconds"));
        assert!(record.cancelled_at.is_none());
        board.shutdown().await;
    }

    #[tokio::test]
    async fn only_pending_tasks_can_be_cancelled() {
        let dir = tempdir().unwrap();
        prepare_project(dir.path());
        // No workers picking tasks up: use a board whose worker is busy.
        let mut handlers = HandlerRegistry::new();
        handlers.register("block", |_ctx, _params| {
            std::thread::sleep(Duration::from_millis(500));
            Ok(Value::Null)
        });
        let board = TaskBoard::new(dir.path(), TaskBoardConfig::default(), handlers).await;

        let blocker = board
            .submit("block", json!({}), TaskPriority::High, None)
            .await;
        let victim = board
            .submit("block", json!({}), TaskPriority::Low, None)
            .await;

        assert!(board.cancel(&victim).await);
        let record = board.status(&victim).await.unwrap();
        assert_eq!(record.status, TaskStatus::Cancelled);
        assert!(record.cancelled_at.is_some());
        assert!(record.completed_at.is_none());

        // Cancelling twice (or cancelling a finished task) fails.
        assert!(!board.cancel(&victim).await);
        wait_terminal(&board, &blocker).await;
        assert!(!board.cancel(&blocker).await);
        board.shutdown().await;
    }

    #[tokio::test]
    async fn pending_tasks_survive_a_restart() {
        let dir = tempdir().unwrap();
        prepare_project(dir.path());

        // First life: submit while no worker can finish before shutdown.
        let mut handlers = HandlerRegistry::new();
        handlers.register("block", |_ctx, _params| {
            std::thread::sleep(Duration::from_millis(300));
            Ok(Value::Null)
        });
        let board = TaskBoard::new(dir.path(), TaskBoardConfig::default(), handlers).await;
        let running = board
            .submit("block", json!({}), TaskPriority::High, None)
            .await;
        let still_pending = board
            .submit("find_usages", json!({"file": "a.py"}), TaskPriority::Low, None)
            .await;
        // Let the first task start, then drop the board mid-flight.
        tokio::time::sleep(Duration::from_millis(50)).await;
        board.shutdown().await;
        let _ = running;

        // Second life over the same directory: the pending record is
        // requeued and completes.
        let board = TaskBoard::new(
            dir.path(),
            TaskBoardConfig::default(),
            HandlerRegistry::new(),
        )
        .await;
        let record = wait_terminal(&board, &still_pending).await;
        assert_eq!(record.status, TaskStatus::Completed);
        board.shutdown().await;
    }

    #[tokio::test]
    async fn expired_terminal_records_are_purged_at_startup() {
        let dir = tempdir().unwrap();
        prepare_project(dir.path());
        let tasks_dir = dir.path().join(".ai_reference/task_board/tasks");
        fs::create_dir_all(&tasks_dir).unwrap();
        let old = json!({
            "id": "task-deadbeef",
            "task_type": "file_search",
            "parameters": {},
            "priority": "low",
            "status": "completed",
            "created_at": "2020-01-01T00:00:00Z",
            "completed_at": "2020-01-01T00:00:10Z",
            "timeout": 120,
        });
        fs::write(
            tasks_dir.join("task-deadbeef.json"),
            serde_json::to_string_pretty(&old).unwrap(),
        )
        .unwrap();

        let board =
            TaskBoard::new(dir.path(), TaskBoardConfig::default(), HandlerRegistry::new()).await;
        assert!(board.status("task-deadbeef").await.is_none());
        assert!(!tasks_dir.join("task-deadbeef.json").exists());
        board.shutdown().await;
    }

    #[tokio::test]
    async fn list_filters_by_status_and_type() {
        let dir = tempdir().unwrap();
        prepare_project(dir.path());
        let board =
            TaskBoard::new(dir.path(), TaskBoardConfig::default(), HandlerRegistry::new()).await;

        let a = board
            .submit("file_search", json!({}), TaskPriority::High, None)
            .await;
        let b = board
            .submit("component_analysis", json!({}), TaskPriority::Medium, None)
            .await;
        wait_terminal(&board, &a).await;
        wait_terminal(&board, &b).await;

        let all = board.list(None, None, 100).await;
        assert_eq!(all.len(), 2);
        let only_search = board.list(None, Some("file_search"), 100).await;
        assert_eq!(only_search.len(), 1);
        let completed = board.list(Some(TaskStatus::Completed), None, 100).await;
        assert_eq!(completed.len(), 2);
        board.shutdown().await;
    }
}
