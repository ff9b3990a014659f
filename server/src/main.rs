//! Server binary: restore persisted state, start the background loops and
//! serve newline-delimited JSON tool calls over stdio.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use librarian_core::AllowedRoots;
use librarian_core::IndexEngine;
use librarian_core::monitor;
use librarian_core::paths::normalize;
use librarian_core::state::ProcessState;
use librarian_core::state::default_state_path;
use librarian_core::state::load_state;
use librarian_core::state::save_state;
use librarian_server::Facade;
use librarian_server::build_catalog;
use serde_json::Value;
use serde_json::json;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

/// Code-comprehension index server.
#[derive(Debug, Parser)]
#[command(name = "librarian-server", version)]
struct Cli {
    /// Directories the server is allowed to access.
    roots: Vec<PathBuf>,
}

fn resolve_roots(args: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = args
        .into_iter()
        .filter(|p| {
            let keep = p.exists();
            if !keep {
                tracing::warn!("ignoring nonexistent root {}", p.display());
            }
            keep
        })
        .map(|p| normalize(&p))
        .collect();

    if roots.is_empty() {
        // Fall back to the parent of the executable's own directory.
        if let Ok(exe) = std::env::current_exe() {
            if let Some(parent) = exe.parent().and_then(Path::parent) {
                roots.push(parent.to_path_buf());
            }
        }
    }
    roots
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let roots = resolve_roots(cli.roots);
    for root in &roots {
        tracing::info!("allowed root: {}", root.display());
    }

    let engine = IndexEngine::new(AllowedRoots::new(roots));

    // Restore previously active projects and resume monitoring them.
    let state_path = default_state_path();
    let state = load_state(&state_path);
    for project in &state.active_projects {
        let path = PathBuf::from(project);
        if !path.is_dir() {
            tracing::warn!("previously active project not found: {project}");
            continue;
        }
        if !engine.allowed_roots().is_allowed(&path) {
            tracing::warn!("previously active project outside allowed roots: {project}");
            continue;
        }
        tracing::info!("reloading project: {project}");
        if let Err(err) = engine.reindex(&path).await {
            tracing::error!("failed to reload {project}: {err}");
        }
    }

    let facade = Arc::new(Facade::new(engine.clone(), build_catalog()));
    let monitor_task = monitor::spawn(engine.clone());
    let refresh_task = librarian_refs::spawn_refresh(facade.context_cache(), engine.clone());

    // Transport: one JSON request per line on stdin, one JSON result per
    // line on stdout. Framing beyond that belongs to the host.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Value>(&line) {
            Ok(request) => {
                let tool = request
                    .get("tool")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let arguments = request
                    .get("arguments")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                facade.handle(&tool, &arguments).await
            }
            Err(err) => json!({
                "status": "error",
                "message": format!("invalid request: {err}"),
            }),
        };
        let body = serde_json::to_string(&response).context("serialising response")?;
        stdout.write_all(body.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    // EOF from the host: persist process state and stop the loops.
    tracing::info!("shutting down librarian server");
    let state = ProcessState {
        active_projects: engine
            .active_projects()
            .await
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect(),
        last_update: engine.last_update_epochs().await,
    };
    if let Err(err) = save_state(&state_path, &state) {
        tracing::error!("failed to save state: {err}");
    }
    facade.shutdown_boards().await;
    monitor_task.abort();
    refresh_task.abort();
    Ok(())
}
