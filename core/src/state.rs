//! Process-level persisted state: the set of active projects and their last
//! update times, restored on startup so monitoring resumes where it left off.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::error::Result;
use crate::store::write_json;

pub const STATE_FILE_NAME: &str = "librarian_state.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProcessState {
    pub active_projects: Vec<String>,
    /// Project path -> last update as seconds since the epoch.
    pub last_update: BTreeMap<String, f64>,
}

/// The state file lives next to the executable; when that location is not
/// available the current directory is used.
pub fn default_state_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(STATE_FILE_NAME)
}

/// A missing or corrupt state file is an empty state, never an error.
pub fn load_state(path: &Path) -> ProcessState {
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!("ignoring corrupt state file {}: {err}", path.display());
                ProcessState::default()
            }
        },
        Err(_) => ProcessState::default(),
    }
}

pub fn save_state(path: &Path, state: &ProcessState) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    write_json(path, state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn state_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(STATE_FILE_NAME);

        let mut state = ProcessState::default();
        state.active_projects.push("/tmp/p1".to_string());
        state.last_update.insert("/tmp/p1".to_string(), 1723456789.5);

        save_state(&path, &state).unwrap();
        assert_eq!(load_state(&path), state);
    }

    #[test]
    fn missing_or_corrupt_state_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(STATE_FILE_NAME);
        assert_eq!(load_state(&path), ProcessState::default());

        fs::write(&path, "{not json").unwrap();
        assert_eq!(load_state(&path), ProcessState::default());
    }
}
