//! Change monitor: a single long-lived background task that detects file
//! adds, removes and modifications and triggers a reindex per project.
//!
//! The loop ticks every 5 seconds, throttles to one check per project per
//! 30 seconds, and sleeps in 1-second increments while the cooperative
//! pause flag is set by the facade. A failure in one project's check never
//! halts the loop.

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::engine::IndexEngine;

const TICK_INTERVAL: Duration = Duration::from_secs(5);
const PAUSED_INTERVAL: Duration = Duration::from_secs(1);
const PROJECT_CHECK_INTERVAL_SECS: f64 = 30.0;

pub fn spawn(engine: IndexEngine) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("starting project monitor");
        run(engine).await;
    })
}

async fn run(engine: IndexEngine) {
    loop {
        if engine.is_paused() {
            tokio::time::sleep(PAUSED_INTERVAL).await;
            continue;
        }

        // Snapshot so project registration during the sweep is safe.
        let projects = engine.active_projects().await;
        for project in projects {
            if !project.exists() {
                tracing::warn!("project path no longer exists: {}", project.display());
                engine.remove_project(&project).await;
                continue;
            }
            if !engine
                .needs_check(&project, PROJECT_CHECK_INTERVAL_SECS)
                .await
            {
                continue;
            }

            if engine.check_for_changes(&project).await {
                tracing::info!("changes detected in project: {}", project.display());
                if let Err(err) = engine.reindex(&project).await {
                    tracing::error!("reindex of {} failed: {err}", project.display());
                }
            }
            engine.touch_last_check(&project).await;
        }

        tokio::time::sleep(TICK_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::AllowedRoots;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn monitor_survives_a_vanishing_project() {
        let dir = tempdir().unwrap();
        let project = dir.path().join("p1");
        fs::create_dir(&project).unwrap();
        fs::write(project.join("a.py"), "def f(): pass\n").unwrap();

        let engine = IndexEngine::new(AllowedRoots::new(vec![dir.path().to_path_buf()]));
        engine.initialize(&project).await.unwrap();
        assert!(engine.is_active(&project).await);

        fs::remove_dir_all(&project).unwrap();

        // One sweep of the loop body: the vanished project is dropped from
        // the active set and the loop keeps going.
        let handle = spawn(engine.clone());
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.abort();

        assert!(!engine.is_active(&project).await);
    }
}
