//! Recovery after a process restart: the state file brings projects back
//! under monitoring and the task board requeues work that never ran.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use librarian_core::AllowedRoots;
use librarian_core::IndexEngine;
use librarian_core::state::ProcessState;
use librarian_core::state::load_state;
use librarian_core::state::save_state;
use librarian_server::Facade;
use librarian_server::build_catalog;
use serde_json::json;
use tempfile::TempDir;

#[tokio::test]
async fn active_projects_resume_from_the_state_file() {
    let dir = TempDir::new().unwrap();
    let project = dir.path().join("p1");
    fs::create_dir(&project).unwrap();
    fs::write(project.join("a.py"), "def f(): pass\n").unwrap();

    // First life: initialize and persist the process state.
    let engine = IndexEngine::new(AllowedRoots::new(vec![dir.path().to_path_buf()]));
    engine.initialize(&project).await.unwrap();

    let state_path = dir.path().join("librarian_state.json");
    let state = ProcessState {
        active_projects: engine
            .active_projects()
            .await
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect(),
        last_update: engine.last_update_epochs().await,
    };
    save_state(&state_path, &state).unwrap();
    drop(engine);

    // Second life: restore the state the way the binary does at startup.
    let engine = IndexEngine::new(AllowedRoots::new(vec![dir.path().to_path_buf()]));
    let restored = load_state(&state_path);
    assert_eq!(restored.active_projects.len(), 1);
    for entry in &restored.active_projects {
        let path = PathBuf::from(entry);
        if path.is_dir() && engine.allowed_roots().is_allowed(&path) {
            engine.reindex(&path).await.unwrap();
        }
    }
    assert!(engine.is_active(&project).await);
}

#[tokio::test]
async fn a_task_pending_at_shutdown_runs_after_restart() {
    let dir = TempDir::new().unwrap();
    let project = dir.path().join("p1");
    fs::create_dir(&project).unwrap();
    fs::write(project.join("a.py"), "def f(): pass\n").unwrap();

    let facade = Facade::new(
        IndexEngine::new(AllowedRoots::new(vec![dir.path().to_path_buf()])),
        build_catalog(),
    );
    facade
        .handle(
            "initialize_librarian",
            &json!({"project_path": project.to_string_lossy()}),
        )
        .await;

    // A record the previous process persisted but never started.
    let tasks_dir = project.join(".ai_reference/task_board/tasks");
    fs::create_dir_all(&tasks_dir).unwrap();
    let orphan = json!({
        "id": "task-0ddba11c",
        "task_type": "find_usages",
        "parameters": {"file": "a.py"},
        "priority": "high",
        "status": "pending",
        "created_at": "2026-07-01T00:00:00Z",
        "timeout": 120,
    });
    fs::write(
        tasks_dir.join("task-0ddba11c.json"),
        serde_json::to_string_pretty(&orphan).unwrap(),
    )
    .unwrap();

    // First board touch restores the records and requeues the orphan.
    let status_args = json!({
        "project_path": project.to_string_lossy(),
        "task_id": "task-0ddba11c",
    });
    let mut terminal = None;
    for _ in 0..200 {
        let record = facade.handle("get_task_status", &status_args).await;
        let status = record["status"].as_str().unwrap_or_default().to_string();
        if ["completed", "failed", "timeout", "cancelled"].contains(&status.as_str()) {
            terminal = Some(record);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let record = terminal.expect("restored task should finish");
    assert_eq!(record["status"], "completed");
    assert_eq!(
        record["result"]["data"]["mini_librarians_used"],
        json!(["file-indexer", "component-analyzer"])
    );

    facade.shutdown_boards().await;
}
