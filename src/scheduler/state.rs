//! Persisted scheduler state

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

const STATE_FILE: &str = "scheduler_state.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerState {
    /// End of the last window that was examined
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_eligible_run: Option<DateTime<Utc>>,
    /// Status of the most recent cycle, determinate or not
    #[serde(default)]
    pub last_status: Option<String>,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(STATE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or corrupt state reads as a fresh start
    pub fn load(&self) -> SchedulerState {
        let Ok(contents) = fs::read_to_string(&self.path) else {
            return SchedulerState::default();
        };
        serde_json::from_str(&contents).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "Scheduler state is corrupt; starting fresh");
            SchedulerState::default()
        })
    }

    pub fn save(&self, state: &SchedulerState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create data directory")?;
        }
        let contents = serde_json::to_string_pretty(state).context("Failed to serialize scheduler state")?;
        fs::write(&self.path, contents).context("Failed to write scheduler state")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_state_is_default() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(StateStore::new(dir.path()).load(), SchedulerState::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let state = SchedulerState {
            last_run_at: Some(Utc::now()),
            next_eligible_run: None,
            last_status: Some("applied".into()),
            last_attempt_at: None,
        };
        store.save(&state).unwrap();
        assert_eq!(store.load(), state);
    }

    #[test]
    fn test_corrupt_state_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        fs::write(store.path(), "{\"last_run_at\": 12").unwrap();
        assert_eq!(store.load(), SchedulerState::default());
    }
}
